//! In-memory RPC transport
//!
//! Scriptable stand-in for a cluster endpoint with:
//! - Configurable latency and injected failures
//! - Account, blockhash, fee and simulation fixtures
//! - Signature statuses that can be set directly or produced on send

use crate::error::{CoreError, Result};
use crate::solana::rpc::{BlockhashInfo, RpcTransport, SignatureStatus, SimulationOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account, commitment_config::CommitmentLevel, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::VersionedTransaction,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct MockRpcTransport {
    url: String,
    latency: Mutex<Duration>,
    slot: AtomicU64,
    block_height: AtomicU64,
    /// Added to the block height after every `get_block_height` call.
    height_step: AtomicU64,
    blockhash: Mutex<BlockhashInfo>,
    accounts: DashMap<Pubkey, Account>,
    prioritization_fees: Mutex<Vec<u64>>,
    simulation: Mutex<SimulationOutcome>,
    always_fail: Mutex<Option<CoreError>>,
    scripted_failures: Mutex<VecDeque<CoreError>>,
    send_error: Mutex<Option<CoreError>>,
    status_on_send: Mutex<Option<SignatureStatus>>,
    statuses: DashMap<Signature, SignatureStatus>,
    sent: Mutex<Vec<VersionedTransaction>>,
    calls: AtomicU64,
}

impl MockRpcTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            latency: Mutex::new(Duration::ZERO),
            slot: AtomicU64::new(1_000),
            block_height: AtomicU64::new(900),
            height_step: AtomicU64::new(0),
            blockhash: Mutex::new(BlockhashInfo {
                blockhash: Hash::new_unique(),
                last_valid_block_height: 1_050,
            }),
            accounts: DashMap::new(),
            prioritization_fees: Mutex::new(Vec::new()),
            simulation: Mutex::new(SimulationOutcome {
                err: None,
                logs: Vec::new(),
                units_consumed: Some(100_000),
            }),
            always_fail: Mutex::new(None),
            scripted_failures: Mutex::new(VecDeque::new()),
            send_error: Mutex::new(None),
            status_on_send: Mutex::new(None),
            statuses: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Every call fails with `err` until [`MockRpcTransport::recover`].
    pub fn fail_always(&self, err: CoreError) {
        *self.always_fail.lock() = Some(err);
    }

    /// The next `count` calls fail with `err`.
    pub fn fail_next(&self, count: usize, err: CoreError) {
        let mut scripted = self.scripted_failures.lock();
        for _ in 0..count {
            scripted.push_back(err.clone());
        }
    }

    pub fn recover(&self) {
        *self.always_fail.lock() = None;
        self.scripted_failures.lock().clear();
    }

    pub fn set_slot(&self, slot: u64) {
        self.slot.store(slot, Ordering::SeqCst);
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    pub fn advance_height_per_call(&self, step: u64) {
        self.height_step.store(step, Ordering::SeqCst);
    }

    pub fn set_blockhash(&self, info: BlockhashInfo) {
        *self.blockhash.lock() = info;
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn set_prioritization_fees(&self, fees: Vec<u64>) {
        *self.prioritization_fees.lock() = fees;
    }

    pub fn set_simulation(&self, outcome: SimulationOutcome) {
        *self.simulation.lock() = outcome;
    }

    /// Rejects sends with `err` without recording the transaction.
    pub fn set_send_error(&self, err: Option<CoreError>) {
        *self.send_error.lock() = err;
    }

    /// Status recorded for every transaction accepted by `send_transaction`.
    pub fn set_status_on_send(&self, status: Option<SignatureStatus>) {
        *self.status_on_send.lock() = status;
    }

    pub fn set_signature_status(&self, signature: Signature, status: SignatureStatus) {
        self.statuses.insert(signature, status);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent_transactions(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().clone()
    }

    pub fn confirmed_status(slot: u64) -> SignatureStatus {
        SignatureStatus {
            slot,
            confirmations: Some(1),
            err: None,
            confirmation_status: Some(
                solana_transaction_status::TransactionConfirmationStatus::Confirmed,
            ),
        }
    }

    async fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.always_fail.lock().clone() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl RpcTransport for MockRpcTransport {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_slot(&self) -> Result<u64> {
        self.begin_call().await?;
        Ok(self.slot.load(Ordering::SeqCst))
    }

    async fn get_block_height(&self) -> Result<u64> {
        self.begin_call().await?;
        let step = self.height_step.load(Ordering::SeqCst);
        Ok(self.block_height.fetch_add(step, Ordering::SeqCst))
    }

    async fn get_latest_blockhash(&self, _commitment: CommitmentLevel) -> Result<BlockhashInfo> {
        self.begin_call().await?;
        Ok(*self.blockhash.lock())
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.begin_call().await?;
        Ok(addresses
            .iter()
            .map(|a| self.accounts.get(a).map(|acc| acc.value().clone()))
            .collect())
    }

    async fn get_recent_prioritization_fees(&self, _accounts: &[Pubkey]) -> Result<Vec<u64>> {
        self.begin_call().await?;
        Ok(self.prioritization_fees.lock().clone())
    }

    async fn simulate_transaction(&self, _tx: &VersionedTransaction) -> Result<SimulationOutcome> {
        self.begin_call().await?;
        Ok(self.simulation.lock().clone())
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        _skip_preflight: bool,
    ) -> Result<Signature> {
        self.begin_call().await?;
        if let Some(err) = self.send_error.lock().clone() {
            return Err(err);
        }
        let signature = tx.signatures.first().copied().unwrap_or_default();
        self.sent.lock().push(tx.clone());
        if let Some(status) = self.status_on_send.lock().clone() {
            self.statuses.insert(signature, status);
        }
        Ok(signature)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>> {
        self.begin_call().await?;
        Ok(signatures
            .iter()
            .map(|s| self.statuses.get(s).map(|st| st.value().clone()))
            .collect())
    }
}
