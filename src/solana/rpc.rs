// src/solana/rpc.rs
//! The narrow RPC capability the connection pool drives.
//!
//! Everything above the pool talks to the cluster through [`RpcTransport`], so
//! endpoints can be swapped, scored and faked in tests without touching the
//! components that use them.

use crate::error::{classify_client_error, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use log::debug;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::rpc_client::RpcClient as NonBlockingRpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcSendTransactionConfig, RpcSimulateTransactionConfig},
};
use solana_sdk::{
    account::Account,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::time::Duration;

/// `getMultipleAccounts` accepts at most this many keys per request.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashInfo {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// `None` once the transaction is rooted.
    pub confirmations: Option<usize>,
    pub err: Option<String>,
    pub confirmation_status: Option<TransactionConfirmationStatus>,
}

impl SignatureStatus {
    /// Whether the observed status has reached `level`.
    pub fn satisfies(&self, level: CommitmentLevel) -> bool {
        let observed = match &self.confirmation_status {
            Some(status) => status.clone(),
            None if self.confirmations.is_none() => TransactionConfirmationStatus::Finalized,
            None => TransactionConfirmationStatus::Processed,
        };
        match level {
            CommitmentLevel::Finalized => observed == TransactionConfirmationStatus::Finalized,
            CommitmentLevel::Confirmed => matches!(
                observed,
                TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized
            ),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Endpoint URL, used for logging and error context.
    fn endpoint(&self) -> &str;

    async fn get_slot(&self) -> Result<u64>;

    async fn get_block_height(&self) -> Result<u64>;

    async fn get_latest_blockhash(&self, commitment: CommitmentLevel) -> Result<BlockhashInfo>;

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;

    /// Recent per-slot prioritization fees (micro-lamports per CU), optionally
    /// scoped to transactions that lock `accounts` as writable.
    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>>;

    async fn simulate_transaction(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome>;

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature>;

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>>;
}

/// [`RpcTransport`] over the nonblocking solana-client.
pub struct SolanaRpcTransport {
    client: NonBlockingRpcClient,
    url: String,
}

impl SolanaRpcTransport {
    pub fn new(url: &str, timeout: Duration, commitment: CommitmentLevel) -> Self {
        Self {
            client: NonBlockingRpcClient::new_with_timeout_and_commitment(
                url.to_string(),
                timeout,
                CommitmentConfig { commitment },
            ),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl RpcTransport for SolanaRpcTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_slot(&self) -> Result<u64> {
        self.client
            .get_slot()
            .await
            .map_err(|e| classify_client_error(&self.url, e))
    }

    async fn get_block_height(&self) -> Result<u64> {
        self.client
            .get_block_height()
            .await
            .map_err(|e| classify_client_error(&self.url, e))
    }

    async fn get_latest_blockhash(&self, commitment: CommitmentLevel) -> Result<BlockhashInfo> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(CommitmentConfig { commitment })
            .await
            .map_err(|e| classify_client_error(&self.url, e))?;
        Ok(BlockhashInfo {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        // Chunks go out concurrently; try_join_all keeps their order.
        let chunks = addresses.chunks(MAX_MULTIPLE_ACCOUNTS).map(|chunk| {
            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64Zstd),
                commitment: Some(self.client.commitment()),
                data_slice: None,
                min_context_slot: None,
            };
            async move {
                self.client
                    .get_multiple_accounts_with_config(chunk, config)
                    .await
                    .map(|response| response.value)
                    .map_err(|e| classify_client_error(&self.url, e))
            }
        });
        let responses = try_join_all(chunks).await?;
        Ok(responses.into_iter().flatten().collect())
    }

    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>> {
        let fees = self
            .client
            .get_recent_prioritization_fees(accounts)
            .await
            .map_err(|e| classify_client_error(&self.url, e))?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn simulate_transaction(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::processed()),
            encoding: Some(UiTransactionEncoding::Base64),
            accounts: None,
            min_context_slot: None,
            inner_instructions: false,
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| classify_client_error(&self.url, e))?;
        let value = response.value;
        debug!(
            "Simulation on {} consumed {:?} CU (err: {:?})",
            self.url, value.units_consumed, value.err
        );
        Ok(SimulationOutcome {
            err: value.err.map(|e| e.to_string()),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.client.commitment().commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            // The sender drives rebroadcasts itself.
            max_retries: Some(0),
            min_context_slot: None,
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| classify_client_error(&self.url, e))
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>> {
        let response = self
            .client
            .get_signature_statuses(signatures)
            .await
            .map_err(|e| classify_client_error(&self.url, e))?;
        Ok(response
            .value
            .into_iter()
            .map(|status| {
                status.map(|s| SignatureStatus {
                    slot: s.slot,
                    confirmations: s.confirmations,
                    err: s.err.map(|e| e.to_string()),
                    confirmation_status: s.confirmation_status,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(
        confirmations: Option<usize>,
        level: Option<TransactionConfirmationStatus>,
    ) -> SignatureStatus {
        SignatureStatus {
            slot: 1,
            confirmations,
            err: None,
            confirmation_status: level,
        }
    }

    #[test]
    fn test_commitment_ordering() {
        let processed = status(Some(0), Some(TransactionConfirmationStatus::Processed));
        assert!(processed.satisfies(CommitmentLevel::Processed));
        assert!(!processed.satisfies(CommitmentLevel::Confirmed));

        let confirmed = status(Some(3), Some(TransactionConfirmationStatus::Confirmed));
        assert!(confirmed.satisfies(CommitmentLevel::Confirmed));
        assert!(!confirmed.satisfies(CommitmentLevel::Finalized));

        // Rooted statuses from older nodes carry no confirmation_status.
        let rooted = status(None, None);
        assert!(rooted.satisfies(CommitmentLevel::Finalized));
    }
}
