// src/dex/pool_management.rs
//! Pool-state service: fetch, decode by owning program, enrich from vaults and
//! mints, and keep a TTL hot cache. Expired entries are dropped on read.

use crate::api::ConnectionPool;
use crate::config::PoolCacheConfig;
use crate::dex::pool::{assemble_pool_state, DexKind, PoolState};
use crate::error::{CoreError, Result};
use dashmap::DashMap;
use log::{debug, info, warn};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedPool {
    state: Arc<PoolState>,
    fetched_at: Instant,
}

pub struct PoolStateService {
    pool: Arc<ConnectionPool>,
    ttl: Duration,
    hot_cache: DashMap<Pubkey, CachedPool>,
}

impl PoolStateService {
    pub fn new(pool: Arc<ConnectionPool>, config: &PoolCacheConfig) -> Self {
        Self {
            pool,
            ttl: config.ttl,
            hot_cache: DashMap::new(),
        }
    }

    /// Cached state when younger than the TTL, otherwise a fresh fetch.
    ///
    /// `Ok(None)` means the account exists but is not a pool any decoder understands.
    pub async fn get_pool(&self, address: &Pubkey) -> Result<Option<Arc<PoolState>>> {
        if let Some(state) = self.cached(address) {
            debug!("Pool cache hit for {}", address);
            return Ok(Some(state));
        }
        self.refresh_pool(address).await
    }

    /// Fetches and decodes `address`, bypassing and then replacing any cached entry.
    pub async fn refresh_pool(&self, address: &Pubkey) -> Result<Option<Arc<PoolState>>> {
        let account = self
            .pool
            .get_account(address)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound(format!("pool {}", address)))?;

        let Some(dex) = DexKind::from_program_id(&account.owner) else {
            debug!("{} is owned by {}, not a supported DEX", address, account.owner);
            return Ok(None);
        };
        let Some(layout) = dex.decode(address, &account.data) else {
            debug!("{} is not decodable as {}", address, dex);
            return Ok(None);
        };

        let dependents = layout.dependent_accounts();
        let accounts = self.pool.get_multiple_accounts(&dependents).await?;
        let data: Vec<&[u8]> = dependents
            .iter()
            .zip(&accounts)
            .map(|(key, account)| {
                account
                    .as_ref()
                    .map(|a| a.data.as_slice())
                    .ok_or_else(|| CoreError::AccountNotFound(format!("{} of pool {}", key, address)))
            })
            .collect::<Result<_>>()?;

        let state = match assemble_pool_state(
            &layout,
            data[0],
            data[1],
            data.get(2).copied(),
            data.get(3).copied(),
        ) {
            Some(state) => Arc::new(state),
            None => {
                warn!("⚠️ {} pool {} has undecodable vault or mint accounts", dex, address);
                return Ok(None);
            }
        };

        info!(
            "🏊 Loaded {} pool {}: reserves {}/{}, fee {:.2} bps",
            dex,
            address,
            state.reserve_a,
            state.reserve_b,
            state.fee_bps()
        );
        self.hot_cache.insert(
            *address,
            CachedPool {
                state: state.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(Some(state))
    }

    fn cached(&self, address: &Pubkey) -> Option<Arc<PoolState>> {
        let fresh = {
            let entry = self.hot_cache.get(address)?;
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.state.clone())
        };
        if fresh.is_none() {
            let ttl = self.ttl;
            self.hot_cache
                .remove_if(address, |_, cached| cached.fetched_at.elapsed() >= ttl);
        }
        fresh
    }

    pub fn invalidate(&self, address: &Pubkey) -> bool {
        self.hot_cache.remove(address).is_some()
    }

    pub fn cached_len(&self) -> usize {
        self.hot_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::config::PoolConfig;
    use crate::error::RetryPolicy;
    use crate::testing::{fixtures, MockRpcTransport};

    fn service(transport: Arc<MockRpcTransport>, ttl: Duration) -> PoolStateService {
        let pool = ConnectionPool::new(&PoolConfig {
            retry: RetryPolicy::immediate(0),
            ..PoolConfig::default()
        });
        pool.register(Endpoint::rpc("mock", transport));
        PoolStateService::new(Arc::new(pool), &PoolCacheConfig { ttl })
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        let fixture = fixtures::raydium_fixture(1_000_000_000, 100_000_000, 9, 6);
        fixture.install(&transport);
        let service = service(transport.clone(), Duration::from_secs(60));

        service.get_pool(&fixture.address).await.unwrap().unwrap();
        let calls = transport.call_count();
        service.get_pool(&fixture.address).await.unwrap().unwrap();
        assert_eq!(transport.call_count(), calls);
        assert_eq!(service.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_is_not_a_pool() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        let address = Pubkey::new_unique();
        transport.set_account(address, fixtures::program_account(Pubkey::new_unique(), vec![0; 64]));
        let service = service(transport, Duration::from_secs(60));

        assert!(service.get_pool(&address).await.unwrap().is_none());
        assert_eq!(service.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_account_is_an_error() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        let service = service(transport, Duration::from_secs(60));
        let err = service.get_pool(&Pubkey::new_unique()).await.unwrap_err();
        assert!(matches!(err, CoreError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        let fixture = fixtures::raydium_fixture(10, 20, 6, 6);
        fixture.install(&transport);
        let service = service(transport, Duration::from_secs(60));

        service.get_pool(&fixture.address).await.unwrap();
        assert!(service.invalidate(&fixture.address));
        assert!(!service.invalidate(&fixture.address));
        assert_eq!(service.cached_len(), 0);
    }
}
