// src/api/connection_pool.rs
//! RPC connection pool with health-scored endpoint selection and failover.
//!
//! Provides:
//! - Endpoint registry for RPC and WebSocket endpoints
//! - Selection of the healthiest non-quarantined endpoint
//! - Probe calls that re-qualify quarantined endpoints
//! - A cancellable failover loop every chain operation runs through
//! - Background health checks

use crate::api::endpoint::{Endpoint, EndpointState, HealthSnapshot, ProbeGuard, ScoringParams};
use crate::config::{EndpointRole, PoolConfig};
use crate::error::{CoreError, FailureKind, Result, RetryPolicy};
use crate::solana::rpc::{BlockhashInfo, RpcTransport, SimulationOutcome, SolanaRpcTransport};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    account::Account, commitment_config::CommitmentLevel, pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const NO_PREFERRED: usize = usize::MAX;

/// Endpoint handed out by [`ConnectionPool::pick_endpoint`].
///
/// A probe pick holds the endpoint's probe slot until an outcome is recorded
/// for it or the last clone of the pick is dropped.
#[derive(Debug, Clone)]
pub struct EndpointPick {
    pub index: usize,
    pub endpoint: Arc<Endpoint>,
    /// Every candidate was quarantined; this is the least recently failed one.
    pub degraded: bool,
    /// The call made with this pick is the endpoint's re-qualification probe.
    pub probe: bool,
    claim: Option<Arc<ProbeGuard>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub quarantined_endpoints: usize,
    pub preferred_endpoint: Option<String>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failovers: u64,
    pub degraded_picks: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} endpoints healthy ({} quarantined), preferred {}, {} requests, {} failed, {} failovers, {} degraded picks",
            self.healthy_endpoints,
            self.total_endpoints,
            self.quarantined_endpoints,
            self.preferred_endpoint.as_deref().unwrap_or("none"),
            self.total_requests,
            self.failed_requests,
            self.failovers,
            self.degraded_picks
        )
    }
}

pub struct ConnectionPool {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    params: ScoringParams,
    retry: RetryPolicy,
    attempts_per_endpoint: u32,
    preferred: AtomicUsize,
    failovers: AtomicU64,
    degraded_picks: AtomicU64,
    shutdown: CancellationToken,
}

impl ConnectionPool {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            params: ScoringParams::from(config),
            retry: config.retry.clone(),
            attempts_per_endpoint: config.attempts_per_endpoint.max(1),
            preferred: AtomicUsize::new(NO_PREFERRED),
            failovers: AtomicU64::new(0),
            degraded_picks: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds a pool whose RPC endpoints talk to the cluster over solana-client.
    pub fn from_config(config: &PoolConfig, commitment: CommitmentLevel) -> Self {
        let pool = Self::new(config);
        for endpoint in &config.endpoints {
            let registered = match endpoint.role {
                EndpointRole::Rpc => Endpoint::rpc(
                    &endpoint.name,
                    Arc::new(SolanaRpcTransport::new(
                        &endpoint.url,
                        config.request_timeout,
                        commitment,
                    )),
                ),
                EndpointRole::WebSocket => Endpoint::websocket(&endpoint.name, &endpoint.url),
            };
            pool.register(registered);
        }
        info!(
            "🏊 Connection pool ready with {} endpoints",
            pool.endpoints.read().len()
        );
        pool
    }

    /// Adds an endpoint. Registration order breaks score ties.
    pub fn register(&self, endpoint: Endpoint) -> Arc<Endpoint> {
        let endpoint = Arc::new(endpoint);
        let mut endpoints = self.endpoints.write();
        endpoints.push(endpoint.clone());
        info!(
            "📡 Registered {:?} endpoint {} ({}) at position {}",
            endpoint.role(),
            endpoint.name(),
            endpoint.url(),
            endpoints.len() - 1
        );
        endpoint
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Root token cancelled by [`ConnectionPool::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Highest-scoring RPC endpoint, a pending probe, or a degraded fallback.
    pub fn pick_endpoint(&self) -> Option<EndpointPick> {
        self.pick_excluding(EndpointRole::Rpc, &HashSet::new())
    }

    /// Best WebSocket endpoint for subscription clients.
    pub fn pick_websocket(&self) -> Option<EndpointPick> {
        self.pick_excluding(EndpointRole::WebSocket, &HashSet::new())
    }

    fn pick_excluding(&self, role: EndpointRole, exclude: &HashSet<usize>) -> Option<EndpointPick> {
        let now = Instant::now();
        let candidates: Vec<(usize, Arc<Endpoint>)> = self
            .endpoints
            .read()
            .iter()
            .enumerate()
            .filter(|(i, ep)| ep.role() == role && !exclude.contains(i))
            .map(|(i, ep)| (i, ep.clone()))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        // An endpoint whose window elapsed gets exactly one probe call.
        for (index, endpoint) in &candidates {
            if let Some(guard) = endpoint.try_claim_probe(now, &self.params) {
                debug!("🔍 Probing quarantined endpoint {}", endpoint.name());
                return Some(EndpointPick {
                    index: *index,
                    endpoint: endpoint.clone(),
                    degraded: false,
                    probe: true,
                    claim: Some(Arc::new(guard)),
                });
            }
        }

        let mut best: Option<(usize, &Arc<Endpoint>, f64)> = None;
        for (index, endpoint) in &candidates {
            if endpoint.state() != EndpointState::Healthy {
                continue;
            }
            let score = endpoint.health_score();
            // Strictly greater keeps the earlier registration on ties.
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((*index, endpoint, score));
            }
        }

        if let Some((index, endpoint, score)) = best {
            if role == EndpointRole::Rpc {
                let previous = self.preferred.swap(index, Ordering::Relaxed);
                if previous != index && previous != NO_PREFERRED {
                    info!(
                        "🔄 Switched primary endpoint to: {} (score {:.3})",
                        endpoint.name(),
                        score
                    );
                }
            }
            return Some(EndpointPick {
                index,
                endpoint: endpoint.clone(),
                degraded: false,
                probe: false,
                claim: None,
            });
        }

        // Everything is quarantined: least recently failed, never blocking.
        let (index, endpoint) = candidates
            .iter()
            .min_by_key(|(_, ep)| ep.last_failure())
            .map(|(i, ep)| (*i, ep.clone()))?;
        self.degraded_picks.fetch_add(1, Ordering::Relaxed);
        warn!(
            "⚠️ All {:?} endpoints quarantined, using {} in degraded mode",
            role,
            endpoint.name()
        );
        Some(EndpointPick {
            index,
            endpoint,
            degraded: true,
            probe: false,
            claim: None,
        })
    }

    pub fn record_success(&self, endpoint: &Endpoint, latency: Duration) {
        endpoint.record_success(latency, &self.params);
    }

    pub fn record_failure(&self, endpoint: &Endpoint, kind: FailureKind) {
        endpoint.record_failure(kind, &self.params);
    }

    pub fn all_endpoint_health(&self) -> Vec<HealthSnapshot> {
        self.endpoints.read().iter().map(|ep| ep.snapshot()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let snapshots = self.all_endpoint_health();
        let preferred = self.preferred.load(Ordering::Relaxed);
        PoolStats {
            total_endpoints: snapshots.len(),
            healthy_endpoints: snapshots
                .iter()
                .filter(|s| s.state == EndpointState::Healthy)
                .count(),
            quarantined_endpoints: snapshots
                .iter()
                .filter(|s| s.state != EndpointState::Healthy)
                .count(),
            preferred_endpoint: snapshots.get(preferred).map(|s| s.name.clone()),
            total_requests: snapshots.iter().map(|s| s.total_requests).sum(),
            failed_requests: snapshots.iter().map(|s| s.failed_requests).sum(),
            failovers: self.failovers.load(Ordering::Relaxed),
            degraded_picks: self.degraded_picks.load(Ordering::Relaxed),
        }
    }

    /// Runs `call` against the best endpoint, failing over on transient errors.
    ///
    /// Each endpoint may be tried `attempts_per_endpoint` times per operation and
    /// the whole operation at most `policy.max_retries + 1` times. Errors that
    /// are not retryable are returned as-is and never charged to the endpoint.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.endpoint_count() == 0 {
            return Err(CoreError::NoEndpoints(operation.to_string()));
        }

        let mut attempts_by_endpoint: HashMap<usize, u32> = HashMap::new();
        let mut exhausted: HashSet<usize> = HashSet::new();
        let mut retries = 0u32;
        let mut total_attempts = 0u32;
        let mut last_failed: Option<usize> = None;
        let mut last_error: Option<(String, CoreError)> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled(operation.to_string()));
            }

            // Rotate away from the endpoint that just failed when another one remains.
            let pick = match last_failed {
                Some(failed) => {
                    let mut avoid = exhausted.clone();
                    avoid.insert(failed);
                    self.pick_excluding(EndpointRole::Rpc, &avoid)
                        .or_else(|| self.pick_excluding(EndpointRole::Rpc, &exhausted))
                }
                None => self.pick_excluding(EndpointRole::Rpc, &exhausted),
            };

            let pick = match pick {
                Some(pick) => pick,
                None => {
                    return Err(match last_error {
                        Some((endpoint, err)) => CoreError::AllEndpointsDown {
                            operation: operation.to_string(),
                            attempts: total_attempts,
                            last_endpoint: endpoint,
                            last_error: err.to_string(),
                        },
                        None => CoreError::NoEndpoints(format!(
                            "{}: no RPC endpoint registered",
                            operation
                        )),
                    });
                }
            };

            let endpoint = pick.endpoint.clone();
            let transport = match endpoint.transport() {
                Some(t) => t,
                None => {
                    exhausted.insert(pick.index);
                    continue;
                }
            };

            if let Some(failed) = last_failed {
                if failed != pick.index {
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "🔀 {} failing over to {} (retry {})",
                        operation,
                        endpoint.name(),
                        retries
                    );
                }
            }

            let started = Instant::now();
            total_attempts += 1;
            let result = tokio::select! {
                biased;
                // Dropping the pick frees an unsettled probe slot.
                _ = cancel.cancelled() => {
                    return Err(CoreError::Cancelled(operation.to_string()));
                }
                result = call(transport) => result,
            };

            let err = match result {
                Ok(value) => {
                    self.record_success(&endpoint, started.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.failure_kind() {
                Some(kind) => self.record_failure(&endpoint, kind),
                // The endpoint answered; the request itself was rejected.
                None => self.record_success(&endpoint, started.elapsed()),
            }

            if !err.is_retryable() {
                debug!("{} on {} failed permanently: {}", operation, endpoint.name(), err);
                return Err(err);
            }

            warn!(
                "❌ {} failed on {} (attempt {}): {}",
                operation,
                endpoint.name(),
                total_attempts,
                err
            );

            let used = attempts_by_endpoint.entry(pick.index).or_insert(0);
            *used += 1;
            if *used >= self.attempts_per_endpoint || pick.degraded {
                exhausted.insert(pick.index);
            }
            last_failed = Some(pick.index);

            if retries >= policy.max_retries {
                return Err(CoreError::RetriesExhausted {
                    operation: operation.to_string(),
                    retries,
                    endpoint: endpoint.name().to_string(),
                    last_error: Box::new(err),
                });
            }
            last_error = Some((endpoint.name().to_string(), err));
            retries += 1;

            let delay = policy.delay_for_attempt(retries);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CoreError::Cancelled(operation.to_string()));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    pub async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let cancel = self.shutdown.child_token();
        self.execute("get_multiple_accounts", &self.retry, &cancel, |t| async move {
            t.get_multiple_accounts(addresses).await
        })
        .await
    }

    pub async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let mut accounts = self.get_multiple_accounts(std::slice::from_ref(address)).await?;
        Ok(accounts.pop().flatten())
    }

    pub async fn latest_blockhash(&self, commitment: CommitmentLevel) -> Result<BlockhashInfo> {
        let cancel = self.shutdown.child_token();
        self.execute("get_latest_blockhash", &self.retry, &cancel, |t| async move {
            t.get_latest_blockhash(commitment).await
        })
        .await
    }

    pub async fn block_height(&self) -> Result<u64> {
        let cancel = self.shutdown.child_token();
        self.execute("get_block_height", &self.retry, &cancel, |t| async move {
            t.get_block_height().await
        })
        .await
    }

    pub async fn recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>> {
        let cancel = self.shutdown.child_token();
        self.execute(
            "get_recent_prioritization_fees",
            &self.retry,
            &cancel,
            |t| async move { t.get_recent_prioritization_fees(accounts).await },
        )
        .await
    }

    pub async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome> {
        let cancel = self.shutdown.child_token();
        self.execute("simulate_transaction", &self.retry, &cancel, |t| async move {
            t.simulate_transaction(tx).await
        })
        .await
    }

    /// One `getSlot` per RPC endpoint, recorded like any other call.
    ///
    /// Quarantined endpoints are only checked once their window elapsed, and the
    /// check then counts as their probe.
    pub async fn check_health(&self) {
        let endpoints: Vec<Arc<Endpoint>> = self.endpoints.read().clone();
        let now = Instant::now();
        for endpoint in endpoints {
            let Some(transport) = endpoint.transport() else {
                continue;
            };
            // Held across the call so an aborted check frees the slot.
            let probe = match endpoint.state() {
                EndpointState::Healthy => None,
                _ => match endpoint.try_claim_probe(now, &self.params) {
                    Some(guard) => Some(guard),
                    None => continue,
                },
            };
            let probing = probe.is_some();
            let started = Instant::now();
            match transport.get_slot().await {
                Ok(slot) => {
                    self.record_success(&endpoint, started.elapsed());
                    debug!("💓 {} healthy at slot {}", endpoint.name(), slot);
                }
                Err(err) => {
                    let kind = err.failure_kind().unwrap_or(FailureKind::Transport);
                    self.record_failure(&endpoint, kind);
                    warn!(
                        "💔 Health check failed for {}{}: {}",
                        endpoint.name(),
                        if probing { " (probe)" } else { "" },
                        err
                    );
                }
            }
        }
    }

    /// Periodic health checks until the pool shuts down.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("🛑 Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => pool.check_health().await,
                }
            }
        })
    }
}
