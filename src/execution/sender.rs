//! Transaction sender
//!
//! Drives one signed transaction through `Pending -> Broadcast -> {Confirmed | Failed | Expired}`:
//! - broadcast through the pool with failover and backoff
//! - poll signature status until the requested commitment is reached
//! - stop as Expired once the chain passes the blockhash's last valid height
//! - rebroadcast the same signed bytes while waiting
//!
//! A timeout or cancellation leaves the record in `Broadcast`: the transaction
//! may still land, so callers must query [`TransactionSender::signature_status`]
//! before building a replacement.

use crate::api::ConnectionPool;
use crate::config::SenderConfig;
use crate::error::{CoreError, Result, RetryPolicy};
use crate::execution::builder::TransactionTemplate;
use crate::solana::rpc::SignatureStatus;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::CommitmentLevel, signature::Signature, transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionState {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
    Expired,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Confirmed | SubmissionState::Failed | SubmissionState::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub commitment: CommitmentLevel,
    /// Broadcast retries on transient errors, across endpoints.
    pub max_retries: u32,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub skip_preflight: bool,
    pub rebroadcast_interval: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub cancel: Option<CancellationToken>,
}

impl From<&SenderConfig> for SendOptions {
    fn from(config: &SenderConfig) -> Self {
        Self {
            commitment: config.commitment,
            max_retries: config.max_retries,
            confirmation_timeout: config.confirmation_timeout,
            poll_interval: config.poll_interval,
            skip_preflight: config.skip_preflight,
            rebroadcast_interval: config.rebroadcast_interval,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            cancel: None,
        }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::from(&SenderConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub id: Uuid,
    /// Set on the first broadcast attempt.
    pub signature: Option<Signature>,
    pub state: SubmissionState,
    /// Broadcast attempts beyond the first.
    pub retries: u32,
    /// Endpoint that accepted the broadcast.
    pub endpoint: Option<String>,
    pub slot: Option<u64>,
    pub last_error: Option<CoreError>,
}

impl SubmissionResult {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            signature: None,
            state: SubmissionState::Pending,
            retries: 0,
            endpoint: None,
            slot: None,
            last_error: None,
        }
    }

    fn finish(mut self, state: SubmissionState, error: Option<CoreError>) -> Self {
        self.state = state;
        if error.is_some() {
            self.last_error = error;
        }
        self
    }

    /// Signature when confirmed, otherwise the error that ended the submission.
    pub fn into_result(self) -> Result<Signature> {
        match (self.state, self.signature) {
            (SubmissionState::Confirmed, Some(signature)) => Ok(signature),
            (state, signature) => Err(self.last_error.unwrap_or_else(|| CoreError::Transaction {
                signature: signature.map(|s| s.to_string()).unwrap_or_else(|| "n/a".to_string()),
                message: format!("submission ended in state {:?}", state),
            })),
        }
    }
}

pub struct TransactionSender {
    pool: Arc<ConnectionPool>,
    config: SenderConfig,
}

impl TransactionSender {
    pub fn new(pool: Arc<ConnectionPool>, config: SenderConfig) -> Self {
        Self { pool, config }
    }

    pub fn default_options(&self) -> SendOptions {
        SendOptions::from(&self.config)
    }

    pub async fn send(
        &self,
        template: &TransactionTemplate,
        signed: &VersionedTransaction,
        options: &SendOptions,
    ) -> SubmissionResult {
        let mut record = SubmissionResult::new();
        let cancel = match &options.cancel {
            Some(token) => token.clone(),
            None => self.pool.shutdown_token().child_token(),
        };

        let signature = match signed.signatures.first() {
            Some(sig) if signed.message == template.message => *sig,
            Some(_) => {
                return record.finish(
                    SubmissionState::Failed,
                    Some(CoreError::InvalidInput(
                        "signed transaction does not match its template".to_string(),
                    )),
                );
            }
            None => {
                return record.finish(
                    SubmissionState::Failed,
                    Some(CoreError::InvalidInput("transaction is not signed".to_string())),
                );
            }
        };

        let height = match self.block_height(&cancel).await {
            Ok(height) => height,
            Err(e) => return record.finish(SubmissionState::Pending, Some(e)),
        };
        if template.is_expired(height) {
            info!(
                "⌛ Blockhash already expired ({} > {}), not broadcasting",
                height, template.last_valid_block_height
            );
            return record.finish(
                SubmissionState::Expired,
                Some(CoreError::BlockhashExpired {
                    last_valid_block_height: template.last_valid_block_height,
                    current_block_height: height,
                }),
            );
        }

        record.signature = Some(signature);
        let policy = RetryPolicy::new(options.max_retries, options.backoff_base, options.backoff_max);
        let mut attempts = 0u32;
        let skip_preflight = options.skip_preflight;
        let broadcast = self
            .pool
            .execute("send_transaction", &policy, &cancel, |transport| {
                attempts += 1;
                async move {
                    transport.send_transaction(signed, skip_preflight).await?;
                    Ok(transport.endpoint().to_string())
                }
            })
            .await;
        record.retries = attempts.saturating_sub(1);

        match broadcast {
            Ok(endpoint) => {
                info!("📤 Broadcast {} via {}", signature, endpoint);
                record.endpoint = Some(endpoint);
                record.state = SubmissionState::Broadcast;
            }
            Err(e @ CoreError::Simulation { .. }) | Err(e @ CoreError::Transaction { .. }) => {
                warn!("❌ {} rejected: {}", signature, e);
                return record.finish(SubmissionState::Failed, Some(e));
            }
            Err(e) => {
                warn!("❌ Broadcast of {} failed: {}", signature, e);
                return record.finish(SubmissionState::Pending, Some(e));
            }
        }

        self.await_confirmation(record, template, signed, options, &cancel)
            .await
    }

    async fn await_confirmation(
        &self,
        mut record: SubmissionResult,
        template: &TransactionTemplate,
        signed: &VersionedTransaction,
        options: &SendOptions,
        cancel: &CancellationToken,
    ) -> SubmissionResult {
        let Some(signature) = record.signature else {
            return record;
        };
        let endpoint = record.endpoint.clone().unwrap_or_default();
        let started = Instant::now();
        let deadline = started + options.confirmation_timeout;
        let mut last_broadcast = started;

        loop {
            if cancel.is_cancelled() {
                return record.finish(
                    SubmissionState::Broadcast,
                    Some(CoreError::Cancelled(format!("confirmation of {}", signature))),
                );
            }
            if Instant::now() >= deadline {
                warn!(
                    "⏰ {} not confirmed within {:?}",
                    signature, options.confirmation_timeout
                );
                return record.finish(
                    SubmissionState::Broadcast,
                    Some(CoreError::Timeout {
                        endpoint,
                        message: format!(
                            "{} not confirmed within {:?}; check its status before resubmitting",
                            signature, options.confirmation_timeout
                        ),
                    }),
                );
            }

            match self.status_with_cancel(signature, cancel).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        warn!("❌ {} failed on-chain at slot {}: {}", signature, status.slot, err);
                        record.slot = Some(status.slot);
                        return record.finish(
                            SubmissionState::Failed,
                            Some(CoreError::Transaction {
                                signature: signature.to_string(),
                                message: err,
                            }),
                        );
                    }
                    if status.satisfies(options.commitment) {
                        info!(
                            "✅ {} reached {:?} at slot {} after {:?}",
                            signature,
                            options.commitment,
                            status.slot,
                            started.elapsed()
                        );
                        record.slot = Some(status.slot);
                        return record.finish(SubmissionState::Confirmed, None);
                    }
                }
                Ok(None) => {}
                Err(CoreError::Cancelled(msg)) => {
                    return record.finish(SubmissionState::Broadcast, Some(CoreError::Cancelled(msg)));
                }
                Err(e) => {
                    debug!("Status poll for {} failed: {}", signature, e);
                    record.last_error = Some(e);
                }
            }

            match self.block_height(cancel).await {
                Ok(height) if template.is_expired(height) => {
                    warn!(
                        "⌛ {} expired unconfirmed (height {} > {})",
                        signature, height, template.last_valid_block_height
                    );
                    return record.finish(
                        SubmissionState::Expired,
                        Some(CoreError::BlockhashExpired {
                            last_valid_block_height: template.last_valid_block_height,
                            current_block_height: height,
                        }),
                    );
                }
                Ok(_) => {}
                Err(e) => debug!("Block height poll failed: {}", e),
            }

            if let Some(interval) = options.rebroadcast_interval {
                if last_broadcast.elapsed() >= interval {
                    self.rebroadcast(signed, cancel).await;
                    last_broadcast = Instant::now();
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(options.poll_interval.min(remaining)) => {}
            }
        }
    }

    /// Resends the identical signed transaction; duplicates are dropped by the cluster.
    async fn rebroadcast(&self, signed: &VersionedTransaction, cancel: &CancellationToken) {
        let result = self
            .pool
            .execute("rebroadcast", &RetryPolicy::immediate(0), cancel, |transport| async move {
                transport.send_transaction(signed, true).await
            })
            .await;
        match result {
            Ok(sig) => debug!("🔁 Rebroadcast {}", sig),
            Err(e) => debug!("Rebroadcast failed: {}", e),
        }
    }

    async fn block_height(&self, cancel: &CancellationToken) -> Result<u64> {
        self.pool
            .execute("get_block_height", self.pool.retry_policy(), cancel, |transport| async move {
                transport.get_block_height().await
            })
            .await
    }

    async fn status_with_cancel(
        &self,
        signature: Signature,
        cancel: &CancellationToken,
    ) -> Result<Option<SignatureStatus>> {
        let statuses = self
            .pool
            .execute(
                "get_signature_statuses",
                self.pool.retry_policy(),
                cancel,
                |transport| async move { transport.get_signature_statuses(&[signature]).await },
            )
            .await?;
        Ok(statuses.into_iter().next().flatten())
    }

    /// Current status of a signature, for re-checking after a timeout.
    pub async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let cancel = self.pool.shutdown_token().child_token();
        self.status_with_cancel(*signature, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionState::Pending.is_terminal());
        assert!(!SubmissionState::Broadcast.is_terminal());
        assert!(SubmissionState::Confirmed.is_terminal());
        assert!(SubmissionState::Failed.is_terminal());
        assert!(SubmissionState::Expired.is_terminal());
    }

    #[test]
    fn test_into_result_surfaces_last_error() {
        let expired = SubmissionResult::new().finish(
            SubmissionState::Expired,
            Some(CoreError::BlockhashExpired {
                last_valid_block_height: 1,
                current_block_height: 2,
            }),
        );
        assert!(matches!(
            expired.into_result(),
            Err(CoreError::BlockhashExpired { .. })
        ));

        let mut confirmed = SubmissionResult::new().finish(SubmissionState::Confirmed, None);
        let signature = Signature::new_unique();
        confirmed.signature = Some(signature);
        assert_eq!(confirmed.into_result().unwrap(), signature);
    }

    #[test]
    fn test_options_follow_config() {
        let config = SenderConfig {
            max_retries: 7,
            ..SenderConfig::default()
        };
        let options = SendOptions::from(&config);
        assert_eq!(options.max_retries, 7);
        assert_eq!(options.commitment, CommitmentLevel::Confirmed);
        assert!(options.cancel.is_none());
    }
}
