// src/error/mod.rs
use log::debug;
use rand::Rng;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC code a node returns when it is behind or otherwise unhealthy.
const NODE_UNHEALTHY_CODE: i64 = -32005;
/// JSON-RPC code some providers use for throttling instead of HTTP 429.
const PROVIDER_RATE_LIMIT_CODE: i64 = -32429;
/// Preflight failure reported without simulation details.
const PREFLIGHT_FAILURE_CODE: i64 = -32002;

/// JSON-RPC codes for requests every endpoint would reject the same way.
const REJECTED_REQUEST_CODES: &[(i64, &str)] = &[
    (-32700, "parse error"),
    (-32600, "invalid request"),
    (-32602, "invalid params"),
    (-32003, "signature verification failure"),
    (-32013, "signature length mismatch"),
    (-32015, "unsupported transaction version"),
];

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Every endpoint exhausted its attempt budget within one operation.
    #[error("All endpoints down during {operation} after {attempts} attempts (last endpoint: {last_endpoint}): {last_error}")]
    AllEndpointsDown {
        operation: String,
        attempts: u32,
        last_endpoint: String,
        last_error: String,
    },

    /// The operation-wide retry budget ran out before any endpoint succeeded.
    #[error("Retries exhausted during {operation} after {retries} retries on {endpoint}: {last_error}")]
    RetriesExhausted {
        operation: String,
        retries: u32,
        endpoint: String,
        last_error: Box<CoreError>,
    },

    /// No endpoint registered for the requested role.
    #[error("No endpoints configured: {0}")]
    NoEndpoints(String),

    /// Protocol-level error returned by an endpoint.
    #[error("RPC Error on {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("Rate limited by {endpoint}: {message}")]
    RateLimited { endpoint: String, message: String },

    #[error("Timeout on {endpoint}: {message}")]
    Timeout { endpoint: String, message: String },

    /// Cluster reported an execution error for a landed or simulated transaction.
    #[error("Transaction Error ({signature}): {message}")]
    Transaction { signature: String, message: String },

    #[error("Blockhash expired: block height {current_block_height} > last valid {last_valid_block_height}")]
    BlockhashExpired {
        last_valid_block_height: u64,
        current_block_height: u64,
    },

    #[error("Simulation Failed: {message}")]
    Simulation { message: String, logs: Vec<String> },

    #[error("Invalid Bundle: {0}")]
    InvalidBundle(String),

    #[error("Relay Error: {0}")]
    Relay(String),

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("Account Not Found: {0}")]
    AccountNotFound(String),

    #[error("Parse Error: {0}")]
    Parse(String),

    #[error("Signer Error: {0}")]
    Signer(String),

    /// Capability exists in the interface but has no backing adapter yet.
    #[error("Not Implemented: {0}")]
    NotImplemented(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Kind of failure recorded against an endpoint's health statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Transport,
    Rpc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    Network,
    Trading,
    Data,
    Configuration,
    Infrastructure,
}

impl CoreError {
    /// Transient infrastructure errors that may succeed on another attempt or endpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Rpc { .. } => true,
            CoreError::RateLimited { .. } => true,
            CoreError::Timeout { .. } => true,
            CoreError::Relay(_) => true,
            CoreError::AllEndpointsDown { .. } => false, // budget already spent
            CoreError::RetriesExhausted { .. } => false,
            CoreError::NoEndpoints(_) => false,
            CoreError::Transaction { .. } => false, // could double-submit
            CoreError::BlockhashExpired { .. } => false, // needs a rebuilt template
            CoreError::Simulation { .. } => false,
            CoreError::InvalidBundle(_) => false,
            CoreError::InvalidInput(_) => false,
            CoreError::AccountNotFound(_) => false,
            CoreError::Parse(_) => false,
            CoreError::Signer(_) => false,
            CoreError::NotImplemented(_) => false,
            CoreError::Config(_) => false,
            CoreError::Cancelled(_) => false,
        }
    }

    /// How this error should be charged against the endpoint that produced it.
    /// `None` means the endpoint behaved correctly (semantic failure).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CoreError::Timeout { .. } => Some(FailureKind::Timeout),
            CoreError::RateLimited { .. } => Some(FailureKind::RateLimited),
            CoreError::Rpc { .. } => Some(FailureKind::Rpc),
            CoreError::Relay(_) => Some(FailureKind::Transport),
            _ => None,
        }
    }

    pub fn categorize(&self) -> ErrorCategory {
        match self {
            CoreError::AllEndpointsDown { .. }
            | CoreError::RetriesExhausted { .. }
            | CoreError::Rpc { .. }
            | CoreError::RateLimited { .. }
            | CoreError::Timeout { .. }
            | CoreError::Relay(_) => ErrorCategory::Network,
            CoreError::Transaction { .. }
            | CoreError::BlockhashExpired { .. }
            | CoreError::Simulation { .. }
            | CoreError::InvalidBundle(_) => ErrorCategory::Trading,
            CoreError::AccountNotFound(_) | CoreError::Parse(_) | CoreError::InvalidInput(_) => {
                ErrorCategory::Data
            }
            CoreError::NoEndpoints(_) | CoreError::Config(_) | CoreError::NotImplemented(_) => {
                ErrorCategory::Configuration
            }
            CoreError::Signer(_) | CoreError::Cancelled(_) => ErrorCategory::Infrastructure,
        }
    }
}

/// Splits a solana-client error into the core taxonomy, keeping the endpoint for context.
pub fn classify_client_error(endpoint: &str, err: ClientError) -> CoreError {
    let endpoint = endpoint.to_string();
    match err.kind() {
        ClientErrorKind::Reqwest(reqwest_err) => {
            if reqwest_err.is_timeout() {
                CoreError::Timeout {
                    endpoint,
                    message: reqwest_err.to_string(),
                }
            } else if reqwest_err.status().map(|s| s.as_u16()) == Some(429) {
                CoreError::RateLimited {
                    endpoint,
                    message: reqwest_err.to_string(),
                }
            } else {
                CoreError::Rpc {
                    endpoint,
                    message: reqwest_err.to_string(),
                }
            }
        }
        ClientErrorKind::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                CoreError::Timeout {
                    endpoint,
                    message: io_err.to_string(),
                }
            } else {
                CoreError::Rpc {
                    endpoint,
                    message: io_err.to_string(),
                }
            }
        }
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code,
            message,
            data,
        }) => match data {
            RpcResponseErrorData::SendTransactionPreflightFailure(sim) => CoreError::Simulation {
                message: sim
                    .err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| message.clone()),
                logs: sim.logs.clone().unwrap_or_default(),
            },
            _ if *code == PROVIDER_RATE_LIMIT_CODE => CoreError::RateLimited {
                endpoint,
                message: message.clone(),
            },
            _ if *code == NODE_UNHEALTHY_CODE => CoreError::Rpc {
                endpoint,
                message: format!("node unhealthy: {}", message),
            },
            _ if *code == PREFLIGHT_FAILURE_CODE => CoreError::Simulation {
                message: message.clone(),
                logs: Vec::new(),
            },
            _ => match REJECTED_REQUEST_CODES.iter().find(|(c, _)| c == code) {
                Some((_, reason)) => {
                    CoreError::InvalidInput(format!("{}: {} (code {})", reason, message, code))
                }
                None => CoreError::Rpc {
                    endpoint,
                    message: format!("{} (code {})", message, code),
                },
            },
        },
        ClientErrorKind::TransactionError(tx_err) => CoreError::Transaction {
            signature: "n/a".to_string(),
            message: tx_err.to_string(),
        },
        ClientErrorKind::SerdeJson(e) => CoreError::Parse(e.to_string()),
        ClientErrorKind::SigningError(e) => CoreError::Signer(e.to_string()),
        _ => CoreError::Rpc {
            endpoint,
            message: err.to_string(),
        },
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "relay".to_string());
        if err.is_timeout() {
            CoreError::Timeout {
                endpoint,
                message: err.to_string(),
            }
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            CoreError::RateLimited {
                endpoint,
                message: err.to_string(),
            }
        } else {
            CoreError::Relay(err.to_string())
        }
    }
}

impl From<ClientError> for CoreError {
    fn from(err: ClientError) -> Self {
        let endpoint = err
            .request
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        classify_client_error(&endpoint, err)
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of random jitter as a fraction of the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Policy that never waits between attempts; used by tests and probes.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Backoff before retry number `attempt` (1-based); zero for the first try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let exp = 2_u128.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay.as_millis().saturating_mul(exp);
        let capped_ms = delay_ms.min(self.max_delay.as_millis()) as u64;

        let jitter_ms = if self.jitter > 0.0 && capped_ms > 0 {
            let bound = ((capped_ms as f64) * self.jitter).max(1.0) as u64;
            rand::thread_rng().gen_range(0..bound)
        } else {
            0
        };

        let delay = Duration::from_millis(capped_ms.saturating_add(jitter_ms));
        debug!("Retry attempt {}: delay = {:?}", attempt, delay);
        delay
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        let transient = CoreError::RateLimited {
            endpoint: "a".into(),
            message: "429".into(),
        };
        assert!(transient.is_retryable());
        assert_eq!(transient.failure_kind(), Some(FailureKind::RateLimited));

        let semantic = CoreError::Transaction {
            signature: "sig".into(),
            message: "insufficient funds".into(),
        };
        assert!(!semantic.is_retryable());
        assert_eq!(semantic.failure_kind(), None);

        let expired = CoreError::BlockhashExpired {
            last_valid_block_height: 10,
            current_block_height: 11,
        };
        assert!(!expired.is_retryable());
        assert_eq!(expired.categorize(), ErrorCategory::Trading);
    }

    fn response_error(code: i64, message: &str) -> ClientError {
        ClientError::from(ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code,
            message: message.to_string(),
            data: RpcResponseErrorData::Empty,
        }))
    }

    #[test]
    fn test_rejected_requests_are_not_retryable() {
        for code in [-32003, -32602, -32600, -32700] {
            let err = classify_client_error("http://rpc", response_error(code, "rejected"));
            assert!(matches!(err, CoreError::InvalidInput(_)), "code {}: {:?}", code, err);
            assert!(!err.is_retryable());
            assert_eq!(err.failure_kind(), None);
        }

        let preflight = classify_client_error("http://rpc", response_error(-32002, "preflight failed"));
        assert!(matches!(preflight, CoreError::Simulation { .. }));
        assert!(!preflight.is_retryable());
    }

    #[test]
    fn test_endpoint_trouble_stays_retryable() {
        let behind = classify_client_error("http://rpc", response_error(-32005, "node is behind"));
        assert!(behind.is_retryable());
        assert_eq!(behind.failure_kind(), Some(FailureKind::Rpc));

        let throttled = classify_client_error("http://rpc", response_error(-32429, "slow down"));
        assert_eq!(throttled.failure_kind(), Some(FailureKind::RateLimited));

        let internal = classify_client_error("http://rpc", response_error(-32603, "internal"));
        assert!(matches!(internal, CoreError::Rpc { .. }));
        assert!(internal.is_retryable());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..50 {
            let d = policy.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(125));
        }
    }
}
