use crate::error::{CoreError, RetryPolicy};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentLevel;
use std::env;
use std::time::Duration;

/// Mainnet Jito tip accounts.
pub const DEFAULT_TIP_ACCOUNTS: &[&str] = &[
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointRole {
    Rpc,
    WebSocket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub role: EndpointRole,
}

impl EndpointConfig {
    pub fn rpc(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            role: EndpointRole::Rpc,
        }
    }

    pub fn websocket(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            role: EndpointRole::WebSocket,
        }
    }
}

/// Endpoint registry and failover parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub endpoints: Vec<EndpointConfig>,
    /// EMA weight given to the newest outcome.
    pub ema_alpha: f64,
    /// Latency at which the latency component of the score is 0.5.
    pub reference_latency_ms: f64,
    pub latency_weight: f64,
    pub quarantine_threshold: u32,
    pub quarantine_base: Duration,
    pub quarantine_max: Duration,
    /// Attempts a single endpoint may consume inside one operation.
    pub attempts_per_endpoint: u32,
    pub request_timeout: Duration,
    pub health_check_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            ema_alpha: 0.2,
            reference_latency_ms: 250.0,
            latency_weight: 0.4,
            quarantine_threshold: 3,
            quarantine_base: Duration::from_secs(5),
            quarantine_max: Duration::from_secs(300),
            attempts_per_endpoint: 2,
            request_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Static tiers (low, medium, high, turbo) in micro-lamports per CU.
    pub fallback_tiers: [u64; 4],
    /// Sample percentiles used for each tier.
    pub tier_percentiles: [f64; 4],
    pub compute_unit_multiplier: f64,
    /// Used when simulation does not report consumed units.
    pub default_compute_units: u32,
    pub tiers_ttl: Duration,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fallback_tiers: [1_000, 10_000, 100_000, 1_000_000],
            tier_percentiles: [25.0, 50.0, 75.0, 95.0],
            compute_unit_multiplier: 1.1,
            default_compute_units: 200_000,
            tiers_ttl: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Lookup tables are only applied above this many unique account keys.
    pub compression_key_threshold: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            compression_key_threshold: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    pub commitment: CommitmentLevel,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub rebroadcast_interval: Option<Duration>,
    pub skip_preflight: bool,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentLevel::Confirmed,
            max_retries: 3,
            poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
            rebroadcast_interval: Some(Duration::from_secs(2)),
            skip_preflight: false,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    pub block_engine_url: String,
    pub tip_accounts: Vec<String>,
    pub min_tip_lamports: u64,
    pub default_tip_lamports: u64,
    pub submission_timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
    /// Wait after which an unseen bundle is reported as not landed.
    pub landing_timeout: Duration,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            block_engine_url: "https://mainnet.block-engine.jito.wtf".to_string(),
            tip_accounts: DEFAULT_TIP_ACCOUNTS.iter().map(|s| s.to_string()).collect(),
            min_tip_lamports: 1_000,
            default_tip_lamports: 10_000,
            submission_timeout: Duration::from_secs(5),
            max_retries: 3,
            poll_interval: Duration::from_millis(500),
            landing_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCacheConfig {
    pub ttl: Duration,
}

impl Default for PoolCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    pub fees: FeeConfig,
    pub builder: BuilderConfig,
    pub sender: SenderConfig,
    pub bundle: BundleConfig,
    pub pool_cache: PoolCacheConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();

        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8899".to_string());
        config
            .pool
            .endpoints
            .push(EndpointConfig::rpc("primary", &rpc_url));

        if let Ok(backups) = env::var("RPC_URL_BACKUP") {
            for (i, url) in backups
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .enumerate()
            {
                config
                    .pool
                    .endpoints
                    .push(EndpointConfig::rpc(&format!("backup-{}", i + 1), url));
            }
        }

        if let Ok(ws_url) = env::var("WS_URL") {
            config
                .pool
                .endpoints
                .push(EndpointConfig::websocket("primary-ws", &ws_url));
        }

        if let Some(retries) = env_parse::<u32>("RPC_MAX_RETRIES") {
            config.pool.retry.max_retries = retries;
        }
        if let Some(delay_ms) = env_parse::<u64>("RPC_RETRY_DELAY_MS") {
            config.pool.retry.base_delay = Duration::from_millis(delay_ms);
        }
        if let Some(timeout_ms) = env_parse::<u64>("RPC_TIMEOUT_MS") {
            config.pool.request_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(threshold) = env_parse::<u32>("QUARANTINE_THRESHOLD") {
            config.pool.quarantine_threshold = threshold;
        }
        if let Ok(tiers) = env::var("PRIORITY_FEE_FALLBACK_MICROLAMPORTS") {
            let parsed: Vec<u64> = tiers
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect();
            if let [low, medium, high, turbo] = parsed[..] {
                config.fees.fallback_tiers = [low, medium, high, turbo];
            } else {
                log::warn!(
                    "PRIORITY_FEE_FALLBACK_MICROLAMPORTS needs 4 values, got '{}'; keeping defaults",
                    tiers
                );
            }
        }
        if let Some(secs) = env_parse::<u64>("CONFIRMATION_TIMEOUT_SECS") {
            config.sender.confirmation_timeout = Duration::from_secs(secs);
        }
        if let Ok(url) = env::var("JITO_BLOCK_ENGINE_URL") {
            config.bundle.block_engine_url = url;
        }
        if let Some(tip) = env_parse::<u64>("JITO_MIN_TIP_LAMPORTS") {
            config.bundle.min_tip_lamports = tip;
        }
        if let Some(secs) = env_parse::<u64>("BUNDLE_LANDING_TIMEOUT_SECS") {
            config.bundle.landing_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("POOL_CACHE_TTL_SECS") {
            config.pool_cache.ttl = Duration::from_secs(secs);
        }

        config
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self
            .pool
            .endpoints
            .iter()
            .any(|e| e.role == EndpointRole::Rpc)
        {
            return Err(CoreError::Config(
                "at least one RPC endpoint is required".to_string(),
            ));
        }
        for endpoint in &self.pool.endpoints {
            let parsed = url::Url::parse(&endpoint.url).map_err(|e| {
                CoreError::Config(format!("invalid URL for {}: {}", endpoint.name, e))
            })?;
            let scheme_ok = match endpoint.role {
                EndpointRole::Rpc => matches!(parsed.scheme(), "http" | "https"),
                EndpointRole::WebSocket => matches!(parsed.scheme(), "ws" | "wss"),
            };
            if !scheme_ok {
                return Err(CoreError::Config(format!(
                    "endpoint {} has scheme '{}' which does not match role {:?}",
                    endpoint.name,
                    parsed.scheme(),
                    endpoint.role
                )));
            }
        }
        url::Url::parse(&self.bundle.block_engine_url)
            .map_err(|e| CoreError::Config(format!("invalid block engine URL: {}", e)))?;
        if !(0.0..=1.0).contains(&self.pool.ema_alpha) || self.pool.ema_alpha == 0.0 {
            return Err(CoreError::Config("ema_alpha must be in (0, 1]".to_string()));
        }
        if self.pool.quarantine_threshold == 0 {
            return Err(CoreError::Config(
                "quarantine_threshold must be at least 1".to_string(),
            ));
        }
        if self.fees.compute_unit_multiplier < 1.0 {
            return Err(CoreError::Config(
                "compute_unit_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_and_log(&self) -> Result<(), CoreError> {
        self.validate()?;
        log::info!(
            "⚙️ Configuration loaded: {} endpoints, commitment {:?}, relay {}",
            self.pool.endpoints.len(),
            self.sender.commitment,
            self.bundle.block_engine_url
        );
        log::debug!("Full configuration: {:?}", self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_rpc_endpoint() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_role_scheme_mismatch_rejected() {
        let mut config = Config::default();
        config
            .pool
            .endpoints
            .push(EndpointConfig::rpc("bad", "wss://example.com"));
        assert!(config.validate().is_err());

        config.pool.endpoints[0] = EndpointConfig::rpc("good", "https://example.com");
        config
            .pool
            .endpoints
            .push(EndpointConfig::websocket("ws", "wss://example.com"));
        assert!(config.validate().is_ok());
    }
}
