// src/api/endpoint.rs
//! Endpoint health tracking.
//!
//! Each endpoint owns its statistics behind its own lock, so outcomes recorded
//! for one endpoint never contend with another. The health score blends two
//! exponential moving averages:
//!
//! - latency, normalized as `ref / (ref + latency_ms)`
//! - reliability, `1 - failure_rate`
//!
//! Reaching the consecutive-failure threshold quarantines the endpoint for a
//! window that doubles with every re-quarantine. When the window elapses the
//! endpoint is handed out for exactly one probe call; success re-qualifies it.
//! The probe slot is held by a [`ProbeGuard`]. Dropping the guard before an
//! outcome is recorded frees the slot, and a claim older than the request
//! timeout is treated as abandoned.

use crate::config::{EndpointRole, PoolConfig};
use crate::error::FailureKind;
use crate::solana::rpc::RpcTransport;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scoring and quarantine parameters shared by every endpoint in a pool.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub alpha: f64,
    pub reference_latency_ms: f64,
    pub latency_weight: f64,
    pub quarantine_threshold: u32,
    pub quarantine_base: Duration,
    pub quarantine_max: Duration,
    /// Age after which an unsettled probe claim is considered abandoned.
    pub probe_timeout: Duration,
}

impl From<&PoolConfig> for ScoringParams {
    fn from(config: &PoolConfig) -> Self {
        Self {
            alpha: config.ema_alpha,
            reference_latency_ms: config.reference_latency_ms,
            latency_weight: config.latency_weight.clamp(0.0, 1.0),
            quarantine_threshold: config.quarantine_threshold.max(1),
            quarantine_base: config.quarantine_base,
            quarantine_max: config.quarantine_max,
            probe_timeout: config.request_timeout,
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl ScoringParams {
    /// Quarantine window for the `level`-th consecutive quarantine (0-based).
    pub fn quarantine_window(&self, level: u32) -> Duration {
        let factor = 2_u32.saturating_pow(level.min(16));
        self.quarantine_base
            .saturating_mul(factor)
            .min(self.quarantine_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    Healthy,
    /// Quarantine window still running.
    Quarantined,
    /// Window elapsed, waiting for (or running) its probe call.
    Probing,
}

#[derive(Debug, Clone, Copy)]
struct ProbeClaim {
    id: u64,
    claimed_at: Instant,
}

#[derive(Debug, Clone)]
struct EndpointStats {
    latency_ema_ms: Option<f64>,
    failure_rate: f64,
    consecutive_failures: u32,
    health_score: f64,
    total_requests: u64,
    failed_requests: u64,
    quarantine_until: Option<Instant>,
    quarantine_level: u32,
    probe: Option<ProbeClaim>,
    next_probe_id: u64,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    last_failure_kind: Option<FailureKind>,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self {
            latency_ema_ms: None,
            failure_rate: 0.0,
            consecutive_failures: 0,
            health_score: 1.0,
            total_requests: 0,
            failed_requests: 0,
            quarantine_until: None,
            quarantine_level: 0,
            probe: None,
            next_probe_id: 0,
            last_success: None,
            last_failure: None,
            last_failure_kind: None,
        }
    }
}

impl EndpointStats {
    fn recompute_score(&mut self, params: &ScoringParams) {
        let latency_score = match self.latency_ema_ms {
            Some(latency) => params.reference_latency_ms / (params.reference_latency_ms + latency.max(0.0)),
            None => 1.0,
        };
        let reliability = 1.0 - self.failure_rate;
        self.health_score = (params.latency_weight * latency_score
            + (1.0 - params.latency_weight) * reliability)
            .clamp(0.0, 1.0);
    }

    fn state(&self, now: Instant) -> EndpointState {
        match self.quarantine_until {
            None => EndpointState::Healthy,
            Some(until) if now < until => EndpointState::Quarantined,
            Some(_) => EndpointState::Probing,
        }
    }
}

/// Serializable view of one endpoint's health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub name: String,
    pub url: String,
    pub role: EndpointRole,
    pub state: EndpointState,
    pub health_score: f64,
    pub latency_ms: Option<f64>,
    pub failure_rate: f64,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub quarantine_remaining_ms: Option<u64>,
    pub last_failure_kind: Option<FailureKind>,
    pub last_success_ago_secs: Option<u64>,
    pub last_failure_ago_secs: Option<u64>,
}

impl std::fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:?}/{:?}] score {:.3}, {}ms avg, failures {}/{} ({} consecutive)",
            self.name,
            self.role,
            self.state,
            self.health_score,
            self.latency_ms.map(|l| l as u64).unwrap_or(0),
            self.failed_requests,
            self.total_requests,
            self.consecutive_failures
        )
    }
}

/// A registered RPC or WebSocket endpoint.
pub struct Endpoint {
    name: String,
    url: String,
    role: EndpointRole,
    transport: Option<Arc<dyn RpcTransport>>,
    stats: Mutex<EndpointStats>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("role", &self.role)
            .finish()
    }
}

impl Endpoint {
    pub fn rpc(name: &str, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            name: name.to_string(),
            url: transport.endpoint().to_string(),
            role: EndpointRole::Rpc,
            transport: Some(transport),
            stats: Mutex::new(EndpointStats::default()),
        }
    }

    /// Subscription endpoints are tracked and scored but carry no request transport.
    pub fn websocket(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            role: EndpointRole::WebSocket,
            transport: None,
            stats: Mutex::new(EndpointStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn transport(&self) -> Option<Arc<dyn RpcTransport>> {
        self.transport.clone()
    }

    pub fn health_score(&self) -> f64 {
        self.stats.lock().health_score
    }

    pub fn state(&self) -> EndpointState {
        self.stats.lock().state(Instant::now())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.stats.lock().consecutive_failures
    }

    pub(crate) fn last_failure(&self) -> Option<Instant> {
        self.stats.lock().last_failure
    }

    pub fn record_success(&self, latency: Duration, params: &ScoringParams) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut stats = self.stats.lock();

        stats.total_requests += 1;
        stats.latency_ema_ms = Some(match stats.latency_ema_ms {
            Some(prev) => params.alpha * latency_ms + (1.0 - params.alpha) * prev,
            None => latency_ms,
        });
        stats.failure_rate *= 1.0 - params.alpha;
        stats.consecutive_failures = 0;
        stats.last_success = Some(Instant::now());

        if stats.quarantine_until.take().is_some() {
            stats.quarantine_level = 0;
            stats.probe = None;
            info!("✅ Endpoint {} re-qualified after probe", self.name);
        }

        stats.recompute_score(params);
        debug!(
            "✅ {} ok in {:.1}ms (score {:.3})",
            self.name, latency_ms, stats.health_score
        );
    }

    pub fn record_failure(&self, kind: FailureKind, params: &ScoringParams) {
        let now = Instant::now();
        let mut stats = self.stats.lock();

        stats.total_requests += 1;
        stats.failed_requests += 1;
        stats.failure_rate = params.alpha + (1.0 - params.alpha) * stats.failure_rate;
        stats.consecutive_failures += 1;
        stats.last_failure = Some(now);
        stats.last_failure_kind = Some(kind);
        stats.probe = None;

        if stats.consecutive_failures >= params.quarantine_threshold {
            let window = params.quarantine_window(stats.quarantine_level);
            stats.quarantine_until = Some(now + window);
            stats.quarantine_level = stats.quarantine_level.saturating_add(1);
            warn!(
                "🚫 Endpoint {} quarantined for {:?} after {} consecutive failures ({:?})",
                self.name, window, stats.consecutive_failures, kind
            );
        }

        stats.recompute_score(params);
    }

    /// Claims the single probe slot of an endpoint whose quarantine elapsed.
    pub(crate) fn try_claim_probe(
        self: &Arc<Self>,
        now: Instant,
        params: &ScoringParams,
    ) -> Option<ProbeGuard> {
        let mut stats = self.stats.lock();
        if stats.state(now) != EndpointState::Probing {
            return None;
        }
        if let Some(claim) = stats.probe {
            if now.saturating_duration_since(claim.claimed_at) < params.probe_timeout {
                return None;
            }
            warn!(
                "⏳ Probe claim on {} went unsettled for {:?}, reclaiming",
                self.name, params.probe_timeout
            );
        }
        let id = stats.next_probe_id;
        stats.next_probe_id = stats.next_probe_id.wrapping_add(1);
        stats.probe = Some(ProbeClaim { id, claimed_at: now });
        Some(ProbeGuard {
            endpoint: Arc::clone(self),
            id,
        })
    }

    /// Frees probe claim `id` unless an outcome already settled or replaced it.
    fn release_probe(&self, id: u64) {
        let mut stats = self.stats.lock();
        if stats.probe.map(|claim| claim.id) == Some(id) {
            stats.probe = None;
            debug!("🔓 Probe slot of {} released without an outcome", self.name);
        }
    }

    /// Whether a probe call currently holds the endpoint's probe slot.
    pub fn probe_claimed(&self) -> bool {
        self.stats.lock().probe.is_some()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let stats = self.stats.lock();
        HealthSnapshot {
            name: self.name.clone(),
            url: self.url.clone(),
            role: self.role,
            state: stats.state(now),
            health_score: stats.health_score,
            latency_ms: stats.latency_ema_ms,
            failure_rate: stats.failure_rate,
            consecutive_failures: stats.consecutive_failures,
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            quarantine_remaining_ms: stats
                .quarantine_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            last_failure_kind: stats.last_failure_kind,
            last_success_ago_secs: stats.last_success.map(|t| now.duration_since(t).as_secs()),
            last_failure_ago_secs: stats.last_failure.map(|t| now.duration_since(t).as_secs()),
        }
    }
}

/// Holds an endpoint's probe slot until an outcome is recorded or the guard drops.
#[derive(Debug)]
pub struct ProbeGuard {
    endpoint: Arc<Endpoint>,
    id: u64,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.endpoint.release_probe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn params() -> ScoringParams {
        ScoringParams {
            alpha: 0.5,
            reference_latency_ms: 100.0,
            latency_weight: 0.5,
            quarantine_threshold: 2,
            quarantine_base: Duration::from_millis(20),
            quarantine_max: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_score_blends_latency_and_reliability() {
        let p = params();
        let ep = Endpoint::websocket("ws", "wss://example.com");
        assert_approx_eq!(ep.health_score(), 1.0);

        ep.record_success(Duration::from_millis(100), &p);
        // latency score 0.5, reliability 1.0
        assert_approx_eq!(ep.health_score(), 0.75);

        ep.record_failure(FailureKind::Timeout, &p);
        // failure rate 0.5 -> reliability 0.5
        assert_approx_eq!(ep.health_score(), 0.5);
    }

    #[test]
    fn test_quarantine_window_doubles_and_caps() {
        let p = params();
        assert_eq!(p.quarantine_window(0), Duration::from_millis(20));
        assert_eq!(p.quarantine_window(1), Duration::from_millis(40));
        assert_eq!(p.quarantine_window(2), Duration::from_millis(50));
    }

    #[test]
    fn test_threshold_quarantines_and_probe_is_single_use() {
        let p = params();
        let ep = Arc::new(Endpoint::websocket("ws", "wss://example.com"));
        ep.record_failure(FailureKind::Rpc, &p);
        assert_eq!(ep.state(), EndpointState::Healthy);
        ep.record_failure(FailureKind::Rpc, &p);
        assert_eq!(ep.state(), EndpointState::Quarantined);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ep.state(), EndpointState::Probing);
        let now = Instant::now();
        let guard = ep.try_claim_probe(now, &p);
        assert!(guard.is_some());
        assert!(ep.try_claim_probe(now, &p).is_none());

        ep.record_success(Duration::from_millis(10), &p);
        drop(guard);
        assert_eq!(ep.state(), EndpointState::Healthy);
        assert_eq!(ep.consecutive_failures(), 0);
        assert!(!ep.probe_claimed());
    }

    #[test]
    fn test_dropped_guard_frees_the_slot() {
        let p = params();
        let ep = Arc::new(Endpoint::websocket("ws", "wss://example.com"));
        ep.record_failure(FailureKind::Rpc, &p);
        ep.record_failure(FailureKind::Rpc, &p);
        std::thread::sleep(Duration::from_millis(30));

        let guard = ep.try_claim_probe(Instant::now(), &p).unwrap();
        assert!(ep.probe_claimed());
        drop(guard);
        assert!(!ep.probe_claimed());
        assert!(ep.try_claim_probe(Instant::now(), &p).is_some());
    }

    #[test]
    fn test_stale_claim_is_reclaimed() {
        let p = ScoringParams {
            probe_timeout: Duration::from_millis(10),
            ..params()
        };
        let ep = Arc::new(Endpoint::websocket("ws", "wss://example.com"));
        ep.record_failure(FailureKind::Rpc, &p);
        ep.record_failure(FailureKind::Rpc, &p);
        std::thread::sleep(Duration::from_millis(30));

        let leaked = ep.try_claim_probe(Instant::now(), &p).unwrap();
        assert!(ep.try_claim_probe(Instant::now(), &p).is_none());
        std::thread::sleep(Duration::from_millis(15));
        let fresh = ep.try_claim_probe(Instant::now(), &p).unwrap();

        // The superseded guard must not free the newer claim.
        drop(leaked);
        assert!(ep.probe_claimed());
        drop(fresh);
        assert!(!ep.probe_claimed());
    }

    #[test]
    fn test_failed_probe_requarantines_longer() {
        let p = params();
        let ep = Arc::new(Endpoint::websocket("ws", "wss://example.com"));
        ep.record_failure(FailureKind::Rpc, &p);
        ep.record_failure(FailureKind::Rpc, &p);
        std::thread::sleep(Duration::from_millis(30));
        let _guard = ep.try_claim_probe(Instant::now(), &p).unwrap();

        ep.record_failure(FailureKind::Timeout, &p);
        let snap = ep.snapshot();
        assert_eq!(snap.state, EndpointState::Quarantined);
        assert!(snap.quarantine_remaining_ms.unwrap() > 20);
    }
}
