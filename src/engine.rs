// src/engine.rs
//! Explicitly constructed core shared by reference.
//!
//! One [`ChainEngine`] owns the connection pool and every component built on
//! top of it. Dropping it does not stop background work; call
//! [`ChainEngine::shutdown`].

use crate::api::{ConnectionPool, PoolStats};
use crate::config::Config;
use crate::dex::pool_management::PoolStateService;
use crate::error::{CoreError, Result};
use crate::execution::{
    BundleRelay, BundleSender, FeeEstimator, JitoHttpRelay, TransactionBuilder, TransactionSender,
};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct ChainEngine {
    config: Arc<Config>,
    pool: Arc<ConnectionPool>,
    fees: Arc<FeeEstimator>,
    builder: Arc<TransactionBuilder>,
    sender: Arc<TransactionSender>,
    bundles: Arc<BundleSender>,
    pools: Arc<PoolStateService>,
    health_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ChainEngine {
    /// Wires the engine against the configured RPC endpoints and block engine.
    ///
    /// Must be called inside a tokio runtime: the health monitor is spawned here.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::from_config(&config.pool, config.sender.commitment));
        let relay: Arc<dyn BundleRelay> = Arc::new(JitoHttpRelay::new(
            &config.bundle.block_engine_url,
            config.bundle.submission_timeout,
        )?);
        Self::with_components(config, pool, relay)
    }

    /// Same wiring around a caller-supplied pool and relay.
    pub fn with_components(
        config: Arc<Config>,
        pool: Arc<ConnectionPool>,
        relay: Arc<dyn BundleRelay>,
    ) -> Result<Self> {
        if pool.endpoint_count() == 0 {
            return Err(CoreError::NoEndpoints("engine needs at least one endpoint".to_string()));
        }

        let fees = Arc::new(FeeEstimator::new(pool.clone(), config.fees.clone()));
        let builder = Arc::new(TransactionBuilder::new(
            pool.clone(),
            fees.clone(),
            config.builder.clone(),
        ));
        let sender = Arc::new(TransactionSender::new(pool.clone(), config.sender.clone()));
        let bundles = Arc::new(
            BundleSender::new(relay, config.bundle.clone())?.with_shutdown(pool.shutdown_token()),
        );
        let pools = Arc::new(PoolStateService::new(pool.clone(), &config.pool_cache));
        let health_monitor = pool.spawn_health_monitor(config.pool.health_check_interval);

        info!("🚀 Chain engine started with {} endpoints", pool.endpoint_count());
        Ok(Self {
            config,
            pool,
            fees,
            builder,
            sender,
            bundles,
            pools,
            health_monitor: Mutex::new(Some(health_monitor)),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn fees(&self) -> &Arc<FeeEstimator> {
        &self.fees
    }

    pub fn builder(&self) -> &Arc<TransactionBuilder> {
        &self.builder
    }

    pub fn sender(&self) -> &Arc<TransactionSender> {
        &self.sender
    }

    pub fn bundles(&self) -> &Arc<BundleSender> {
        &self.bundles
    }

    pub fn pools(&self) -> &Arc<PoolStateService> {
        &self.pools
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.shutdown_token().is_cancelled()
    }

    /// Cancels the root token and waits for the health monitor to stop.
    ///
    /// In-flight polls and backoffs observe the same token and return
    /// `Cancelled`.
    pub async fn shutdown(&self) {
        self.pool.shutdown();
        let handle = self.health_monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("🛑 Chain engine shut down. {}", self.pool.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::testing::{MockRelay, MockRpcTransport};

    #[tokio::test]
    async fn test_empty_pool_is_rejected() {
        let config = Arc::new(Config::default());
        let pool = Arc::new(ConnectionPool::new(&config.pool));
        let err = ChainEngine::with_components(config, pool, Arc::new(MockRelay::new()))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::NoEndpoints(_)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_root_token() {
        let config = Arc::new(Config::default());
        let pool = Arc::new(ConnectionPool::new(&config.pool));
        pool.register(Endpoint::rpc("mock", Arc::new(MockRpcTransport::new("mock"))));
        let engine = ChainEngine::with_components(config, pool, Arc::new(MockRelay::new())).unwrap();

        assert!(!engine.is_shut_down());
        engine.shutdown().await;
        assert!(engine.is_shut_down());
        // second call is a no-op
        engine.shutdown().await;
    }
}
