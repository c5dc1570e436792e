//! Jito bundle submission
//!
//! Bundles of up to five signed transactions are sent to a block-engine relay
//! for all-or-nothing inclusion. Exactly one transaction must pay the tip to a
//! relay tip account; that is checked locally before anything goes on the wire.
//! Landing is tracked through the relay's own status endpoint, separately from
//! regular signature polling.

use crate::config::BundleConfig;
use crate::error::{CoreError, Result, RetryPolicy};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Signature, system_instruction,
    system_instruction::SystemInstruction, system_program, transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

/// JSON-RPC codes for requests the block engine will never accept as sent.
const PARSE_ERROR_CODE: i64 = -32700;
const INVALID_REQUEST_CODE: i64 = -32600;
const INVALID_PARAMS_CODE: i64 = -32602;
/// Block engine code for a globally rate-limited endpoint.
const RELAY_RATE_LIMIT_CODE: i64 = -32097;

/// Landing state reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Pending,
    Landed { slot: u64 },
    /// Not selected in its slot window. Rebuild with a fresh blockhash and tip, then retry.
    NotLanded { reason: String },
}

impl BundleStatus {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BundleStatus::NotLanded { .. })
    }
}

/// Raw status as reported by a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayBundleStatus {
    /// Relay has no record of the bundle (yet).
    Invalid,
    Pending,
    Failed { reason: String },
    Landed { slot: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSubmission {
    pub bundle_id: String,
    pub signatures: Vec<String>,
    pub tip_account: String,
    pub tip_lamports: u64,
    pub tip_transaction_index: usize,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait BundleRelay: Send + Sync {
    fn name(&self) -> &str;

    /// Submits base64-encoded transactions, returning the relay's bundle id.
    async fn send_bundle(&self, encoded_transactions: &[String]) -> Result<String>;

    async fn bundle_status(&self, bundle_id: &str) -> Result<RelayBundleStatus>;
}

/// JSON-RPC client for a Jito block engine.
pub struct JitoHttpRelay {
    client: Client,
    bundles_url: String,
}

impl JitoHttpRelay {
    pub fn new(block_engine_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("cannot build relay client: {}", e)))?;
        Ok(Self {
            client,
            bundles_url: format!("{}/api/v1/bundles", block_engine_url.trim_end_matches('/')),
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        let response = self
            .client
            .post(&self.bundles_url)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CoreError::RateLimited {
                endpoint: self.bundles_url.clone(),
                message: format!("{} throttled", method),
            });
        }
        if status.is_server_error() {
            return Err(CoreError::Relay(format!("{} returned HTTP {}", method, status)));
        }
        let body: serde_json::Value = response.json().await?;
        if let Some(error) = body.get("error") {
            return Err(classify_relay_error(&self.bundles_url, method, error));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| CoreError::Relay(format!("{} returned no result: {}", method, body)))
    }
}

#[async_trait]
impl BundleRelay for JitoHttpRelay {
    fn name(&self) -> &str {
        &self.bundles_url
    }

    async fn send_bundle(&self, encoded_transactions: &[String]) -> Result<String> {
        let result = self
            .call(
                "sendBundle",
                json!([encoded_transactions, { "encoding": "base64" }]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Relay(format!("sendBundle returned {}", result)))
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<RelayBundleStatus> {
        let result = self
            .call("getInflightBundleStatuses", json!([[bundle_id]]))
            .await?;
        let entry = match result
            .get("value")
            .and_then(|v| v.as_array())
            .and_then(|v| v.first())
        {
            Some(entry) => entry,
            None => return Ok(RelayBundleStatus::Invalid),
        };
        Ok(match entry.get("status").and_then(|s| s.as_str()) {
            Some("Landed") => RelayBundleStatus::Landed {
                slot: entry
                    .get("landed_slot")
                    .and_then(|s| s.as_u64())
                    .unwrap_or_default(),
            },
            Some("Pending") => RelayBundleStatus::Pending,
            Some("Failed") => RelayBundleStatus::Failed {
                reason: "relay reported bundle failed".to_string(),
            },
            _ => RelayBundleStatus::Invalid,
        })
    }
}

/// Maps a relay JSON-RPC `error` object into the core taxonomy.
///
/// Rejections of the request itself are permanent; anything else is treated
/// as a transient relay failure.
pub fn classify_relay_error(endpoint: &str, method: &str, error: &serde_json::Value) -> CoreError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("no message");
    match error.get("code").and_then(|c| c.as_i64()) {
        Some(code @ (PARSE_ERROR_CODE | INVALID_REQUEST_CODE | INVALID_PARAMS_CODE)) => {
            CoreError::InvalidBundle(format!("{} rejected: {} (code {})", method, message, code))
        }
        Some(RELAY_RATE_LIMIT_CODE) => CoreError::RateLimited {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        },
        _ => CoreError::Relay(format!("{} failed: {}", method, error)),
    }
}

/// Picks a random tip account.
pub fn select_tip_account(tip_accounts: &[Pubkey]) -> Result<Pubkey> {
    tip_accounts
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| CoreError::Config("no tip accounts configured".to_string()))
}

/// Creates a system transfer instruction that tips the relay.
pub fn create_tip_instruction(from: &Pubkey, tip_lamports: u64, tip_account: &Pubkey) -> Instruction {
    system_instruction::transfer(from, tip_account, tip_lamports)
}

/// `(from, to, lamports)` of a system transfer instruction.
fn decode_transfer(program_id: &Pubkey, accounts: &[Pubkey], data: &[u8]) -> Option<(Pubkey, Pubkey, u64)> {
    if *program_id != system_program::id() || accounts.len() < 2 {
        return None;
    }
    match bincode::deserialize::<SystemInstruction>(data).ok()? {
        SystemInstruction::Transfer { lamports } => Some((accounts[0], accounts[1], lamports)),
        _ => None,
    }
}

/// Whether `tx` carries the transfer `from -> to` of `lamports`.
fn contains_transfer(tx: &VersionedTransaction, from: &Pubkey, to: &Pubkey, lamports: u64) -> bool {
    let keys = tx.message.static_account_keys();
    tx.message.instructions().iter().any(|ix| {
        let Some(program_id) = keys.get(ix.program_id_index as usize) else {
            return false;
        };
        // Tip accounts are always static keys; lookup-table indices cannot match.
        let accounts: Option<Vec<Pubkey>> = ix
            .accounts
            .iter()
            .map(|i| keys.get(*i as usize).copied())
            .collect();
        match accounts {
            Some(accounts) => decode_transfer(program_id, &accounts, &ix.data)
                == Some((*from, *to, lamports)),
            None => false,
        }
    })
}

pub struct BundleSender {
    relay: Arc<dyn BundleRelay>,
    config: BundleConfig,
    tip_accounts: Vec<Pubkey>,
    shutdown: CancellationToken,
}

impl BundleSender {
    pub fn new(relay: Arc<dyn BundleRelay>, config: BundleConfig) -> Result<Self> {
        let tip_accounts = config
            .tip_accounts
            .iter()
            .map(|s| {
                Pubkey::from_str(s)
                    .map_err(|e| CoreError::Config(format!("invalid tip account {}: {}", s, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        if tip_accounts.is_empty() {
            return Err(CoreError::Config("no tip accounts configured".to_string()));
        }
        info!(
            "🎯 Bundle sender ready: relay {}, {} tip accounts, min tip {} lamports",
            relay.name(),
            tip_accounts.len(),
            config.min_tip_lamports
        );
        Ok(Self {
            relay,
            config,
            tip_accounts,
            shutdown: CancellationToken::new(),
        })
    }

    /// Ties submissions and landing waits to `shutdown` in addition to per-call tokens.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn tip_accounts(&self) -> &[Pubkey] {
        &self.tip_accounts
    }

    pub fn select_tip_account(&self) -> Result<Pubkey> {
        select_tip_account(&self.tip_accounts)
    }

    /// Tip instruction for `payer` using the configured default tip.
    pub fn default_tip_instruction(&self, payer: &Pubkey) -> Result<Instruction> {
        let tip_account = self.select_tip_account()?;
        Ok(create_tip_instruction(
            payer,
            self.config.default_tip_lamports.max(self.config.min_tip_lamports),
            &tip_account,
        ))
    }

    /// Checks bundle shape and tip placement; returns `(tip_account, lamports, tip_tx_index)`.
    pub fn validate(
        &self,
        transactions: &[VersionedTransaction],
        tip_instruction: &Instruction,
    ) -> Result<(Pubkey, u64, usize)> {
        if transactions.is_empty() || transactions.len() > MAX_BUNDLE_TRANSACTIONS {
            return Err(CoreError::InvalidBundle(format!(
                "bundle must hold 1..={} transactions, got {}",
                MAX_BUNDLE_TRANSACTIONS,
                transactions.len()
            )));
        }

        let tip_keys: Vec<Pubkey> = tip_instruction.accounts.iter().map(|m| m.pubkey).collect();
        let (from, to, lamports) = decode_transfer(&tip_instruction.program_id, &tip_keys, &tip_instruction.data)
            .ok_or_else(|| {
                CoreError::InvalidBundle("tip instruction must be a system transfer".to_string())
            })?;
        if !self.tip_accounts.contains(&to) {
            return Err(CoreError::InvalidBundle(format!(
                "{} is not a relay tip account",
                to
            )));
        }
        if lamports == 0 || lamports < self.config.min_tip_lamports {
            return Err(CoreError::InvalidBundle(format!(
                "tip of {} lamports is below the minimum of {}",
                lamports, self.config.min_tip_lamports
            )));
        }

        for (i, tx) in transactions.iter().enumerate() {
            let required = tx.message.header().num_required_signatures as usize;
            if tx.signatures.len() != required
                || tx.signatures.iter().any(|s| *s == Signature::default())
            {
                return Err(CoreError::InvalidBundle(format!(
                    "transaction {} is not fully signed",
                    i
                )));
            }
        }

        let carriers: Vec<usize> = transactions
            .iter()
            .enumerate()
            .filter(|(_, tx)| contains_transfer(tx, &from, &to, lamports))
            .map(|(i, _)| i)
            .collect();
        match carriers.as_slice() {
            [index] => Ok((to, lamports, *index)),
            other => Err(CoreError::InvalidBundle(format!(
                "exactly one transaction must carry the tip, found {}",
                other.len()
            ))),
        }
    }

    pub async fn send_bundle(
        &self,
        transactions: &[VersionedTransaction],
        tip_instruction: &Instruction,
        cancel: &CancellationToken,
    ) -> Result<BundleSubmission> {
        let (tip_account, tip_lamports, tip_index) = self.validate(transactions, tip_instruction)?;

        let encoded = transactions
            .iter()
            .map(|tx| {
                bincode::serialize(tx)
                    .map(|bytes| STANDARD.encode(bytes))
                    .map_err(|e| CoreError::Parse(format!("cannot serialize transaction: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let policy = RetryPolicy::new(
            self.config.max_retries,
            Duration::from_millis(200),
            Duration::from_secs(2),
        );
        let cancelled = || CoreError::Cancelled("bundle submission".to_string());
        let mut attempt = 0u32;
        let bundle_id = loop {
            attempt += 1;
            let submit = tokio::time::timeout(
                self.config.submission_timeout,
                self.relay.send_bundle(&encoded),
            );
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = self.shutdown.cancelled() => return Err(cancelled()),
                outcome = submit => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::Timeout {
                        endpoint: self.relay.name().to_string(),
                        message: format!("sendBundle exceeded {:?}", self.config.submission_timeout),
                    }),
                },
            };
            match result {
                Ok(id) => break id,
                Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                    warn!("⚠️ Bundle submission attempt {} failed: {}", attempt, e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(cancelled()),
                        _ = self.shutdown.cancelled() => return Err(cancelled()),
                        _ = tokio::time::sleep(policy.delay_for_attempt(attempt)) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "📦 Bundle {} submitted ({} txs, tip {} lamports to {})",
            bundle_id,
            transactions.len(),
            tip_lamports,
            tip_account
        );

        Ok(BundleSubmission {
            bundle_id,
            signatures: transactions
                .iter()
                .filter_map(|tx| tx.signatures.first().map(|s| s.to_string()))
                .collect(),
            tip_account: tip_account.to_string(),
            tip_lamports,
            tip_transaction_index: tip_index,
            attempts: attempt,
            submitted_at: Utc::now(),
        })
    }

    /// One relay status lookup.
    pub async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus> {
        Ok(match self.relay.bundle_status(bundle_id).await? {
            RelayBundleStatus::Landed { slot } => BundleStatus::Landed { slot },
            RelayBundleStatus::Failed { reason } => BundleStatus::NotLanded { reason },
            RelayBundleStatus::Pending | RelayBundleStatus::Invalid => BundleStatus::Pending,
        })
    }

    /// Polls until the bundle lands, the relay drops it, or the landing timeout elapses.
    pub async fn wait_for_landing(
        &self,
        bundle_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BundleStatus> {
        let started = Instant::now();
        loop {
            match self.bundle_status(bundle_id).await {
                Ok(BundleStatus::Pending) => {}
                Ok(status) => {
                    info!("📦 Bundle {} resolved: {:?}", bundle_id, status);
                    return Ok(status);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Failed to get bundle status for {}: {}. Retrying...", bundle_id, e);
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= self.config.landing_timeout {
                debug!("Bundle {} unseen after {:?}", bundle_id, self.config.landing_timeout);
                return Ok(BundleStatus::NotLanded {
                    reason: format!("not landed within {:?}", self.config.landing_timeout),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CoreError::Cancelled(format!("waiting for bundle {}", bundle_id)));
                }
                _ = self.shutdown.cancelled() => {
                    return Err(CoreError::Cancelled(format!("waiting for bundle {}", bundle_id)));
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRelay;
    use solana_sdk::{
        hash::Hash,
        message::{v0, VersionedMessage},
        signature::{Keypair, Signer},
    };

    fn signed(payer: &Keypair, ixs: &[Instruction]) -> VersionedTransaction {
        let message = v0::Message::try_compile(&payer.pubkey(), ixs, &[], Hash::new_unique()).unwrap();
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[payer]).unwrap()
    }

    fn sender(relay: Arc<MockRelay>) -> BundleSender {
        let config = BundleConfig {
            poll_interval: Duration::from_millis(5),
            landing_timeout: Duration::from_millis(40),
            ..BundleConfig::default()
        };
        BundleSender::new(relay, config).unwrap()
    }

    #[tokio::test]
    async fn test_zero_tip_rejected_before_network() {
        let relay = Arc::new(MockRelay::new());
        let sender = sender(relay.clone());
        let payer = Keypair::new();
        let tip = create_tip_instruction(&payer.pubkey(), 0, &sender.tip_accounts()[0]);
        let tx = signed(&payer, &[tip.clone()]);

        let err = sender
            .send_bundle(&[tx], &tip, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidBundle(_)));
        assert_eq!(relay.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_tip_must_be_in_exactly_one_transaction() {
        let relay = Arc::new(MockRelay::new());
        let sender = sender(relay.clone());
        let payer = Keypair::new();
        let tip = create_tip_instruction(&payer.pubkey(), 10_000, &sender.tip_accounts()[0]);
        let other = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);

        let none = sender.validate(&[signed(&payer, &[other.clone()])], &tip);
        assert!(matches!(none, Err(CoreError::InvalidBundle(_))));

        let twice = sender.validate(
            &[signed(&payer, &[tip.clone()]), signed(&payer, &[tip.clone()])],
            &tip,
        );
        assert!(matches!(twice, Err(CoreError::InvalidBundle(_))));

        let (_, lamports, index) = sender
            .validate(&[signed(&payer, &[other]), signed(&payer, &[tip.clone()])], &tip)
            .unwrap();
        assert_eq!(lamports, 10_000);
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn test_unknown_tip_account_rejected() {
        let relay = Arc::new(MockRelay::new());
        let sender = sender(relay);
        let payer = Keypair::new();
        let tip = create_tip_instruction(&payer.pubkey(), 10_000, &Pubkey::new_unique());
        let result = sender.validate(&[signed(&payer, &[tip.clone()])], &tip);
        assert!(matches!(result, Err(CoreError::InvalidBundle(_))));
    }

    #[tokio::test]
    async fn test_transient_relay_errors_are_retried() {
        let relay = Arc::new(MockRelay::new());
        relay.fail_next(1, CoreError::Relay("busy".to_string()));
        let sender = sender(relay.clone());
        let payer = Keypair::new();
        let tip = sender.default_tip_instruction(&payer.pubkey()).unwrap();

        let submission = sender
            .send_bundle(&[signed(&payer, &[tip.clone()])], &tip, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(submission.attempts, 2);
        assert_eq!(relay.submitted_count(), 1);
    }

    #[test]
    fn test_relay_rejections_are_permanent() {
        let url = "https://relay/api/v1/bundles";
        let rejected = classify_relay_error(
            url,
            "sendBundle",
            &json!({ "code": -32602, "message": "bundle contains an already processed transaction" }),
        );
        assert!(matches!(rejected, CoreError::InvalidBundle(_)));
        assert!(!rejected.is_retryable());

        let malformed = classify_relay_error(url, "sendBundle", &json!({ "code": -32600, "message": "bad request" }));
        assert!(matches!(malformed, CoreError::InvalidBundle(_)));

        let throttled = classify_relay_error(
            url,
            "sendBundle",
            &json!({ "code": -32097, "message": "Network congested. Endpoint is globally rate limited." }),
        );
        assert!(matches!(throttled, CoreError::RateLimited { .. }));
        assert!(throttled.is_retryable());

        let internal = classify_relay_error(url, "sendBundle", &json!({ "code": -32603, "message": "internal" }));
        assert!(matches!(internal, CoreError::Relay(_)));
        assert!(internal.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_submission_backoff() {
        let relay = Arc::new(MockRelay::new());
        relay.fail_next(1, CoreError::Relay("busy".to_string()));
        let config = BundleConfig {
            max_retries: 3,
            ..BundleConfig::default()
        };
        let shutdown = CancellationToken::new();
        let sender = BundleSender::new(relay.clone(), config)
            .unwrap()
            .with_shutdown(shutdown.clone());
        let payer = Keypair::new();
        let tip = sender.default_tip_instruction(&payer.pubkey()).unwrap();
        let bundle = [signed(&payer, &[tip.clone()])];

        // First attempt fails, so the loop is parked in its backoff sleep.
        let cancel_later = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_later.cancel();
        });
        let err = sender
            .send_bundle(&bundle, &tip, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled(_)));
        assert_eq!(relay.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_unseen_bundle_reported_not_landed() {
        let relay = Arc::new(MockRelay::new());
        let sender = sender(relay);
        let status = sender
            .wait_for_landing("missing", &CancellationToken::new())
            .await
            .unwrap();
        assert!(status.is_retryable());
    }
}
