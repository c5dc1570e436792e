pub mod settings;

pub use settings::{
    BuilderConfig, BundleConfig, Config, EndpointConfig, EndpointRole, FeeConfig, PoolCacheConfig,
    PoolConfig, SenderConfig,
};

use crate::error::CoreError;
use std::sync::Arc;

/// Loads `.env` (if present), reads the environment and validates the result.
pub fn load_config() -> Result<Arc<Config>, CoreError> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    config.validate_and_log()?;

    Ok(Arc::new(config))
}
