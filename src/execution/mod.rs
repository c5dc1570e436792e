//! Transaction pipeline: fee estimation, building, sending and bundles.

pub mod builder;
pub mod fee_manager;
pub mod jito_client;
pub mod sender;

pub use builder::{calculate_transaction_fee, BuildOptions, TransactionBuilder, TransactionTemplate};
pub use fee_manager::{FeeEstimator, FeeTier, PriorityFeeTiers, MAX_COMPUTE_UNITS};
pub use jito_client::{
    classify_relay_error, create_tip_instruction, select_tip_account, BundleRelay, BundleSender,
    BundleStatus,
    BundleSubmission, JitoHttpRelay, RelayBundleStatus, MAX_BUNDLE_TRANSACTIONS,
};
pub use sender::{SendOptions, SubmissionResult, SubmissionState, TransactionSender};
