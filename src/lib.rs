pub mod api;
pub mod config;
pub mod dex;
pub mod engine;
pub mod error;
pub mod execution;
pub mod solana;
pub mod testing; // Scriptable transport and relay fakes
pub mod utils;

pub use api::{ConnectionPool, Endpoint, EndpointState, HealthSnapshot, PoolStats};
pub use config::{load_config, Config};
pub use dex::{DexKind, PoolState, PoolStateService};
pub use engine::ChainEngine;
pub use error::{CoreError, ErrorCategory, FailureKind, Result, RetryPolicy};
pub use execution::{
    BuildOptions, BundleSender, BundleStatus, FeeEstimator, FeeTier, SendOptions,
    SubmissionResult, SubmissionState, TransactionBuilder, TransactionSender, TransactionTemplate,
};
pub use solana::{KeypairSigner, RpcTransport, TransactionSigner};
