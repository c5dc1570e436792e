use assert_approx_eq::assert_approx_eq;
use defi_chain_core::api::{ConnectionPool, Endpoint};
use defi_chain_core::config::{PoolCacheConfig, PoolConfig};
use defi_chain_core::dex::{DexKind, PoolPricing, PoolStateService};
use defi_chain_core::error::{CoreError, RetryPolicy};
use defi_chain_core::testing::{fixtures, MockRpcTransport};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn service(ttl: Duration) -> (Arc<MockRpcTransport>, PoolStateService) {
    let transport = Arc::new(MockRpcTransport::new("http://mock"));
    let pool = ConnectionPool::new(&PoolConfig {
        retry: RetryPolicy::immediate(0),
        ..PoolConfig::default()
    });
    pool.register(Endpoint::rpc("mock", transport.clone()));
    (transport, PoolStateService::new(Arc::new(pool), &PoolCacheConfig { ttl }))
}

#[tokio::test]
async fn test_every_supported_dex_decodes_to_a_populated_pool() {
    let fixtures = [
        (DexKind::RaydiumAmmV4, fixtures::raydium_fixture(1_000_000_000, 100_000_000, 9, 6)),
        (DexKind::OrcaWhirlpool, fixtures::whirlpool_fixture(1_000_000_000, 100_000_000, 9, 6)),
        (DexKind::MeteoraDlmm, fixtures::meteora_fixture(1_000_000_000, 100_000_000, 9, 6)),
    ];
    let (transport, service) = service(Duration::from_secs(60));

    for (dex, fixture) in &fixtures {
        fixture.install(&transport);
        let state = service.get_pool(&fixture.address).await.unwrap().unwrap();

        assert_eq!(state.dex, *dex);
        assert_eq!(state.address, fixture.address);
        assert_eq!((state.mint_a, state.mint_b), (fixture.mint_a, fixture.mint_b));
        assert_eq!((state.reserve_a, state.reserve_b), (1_000_000_000, 100_000_000));
        assert_eq!((state.decimals_a, state.decimals_b), (9, 6));
        assert!(state.fee_bps() > 0.0);
        // 1 A against 100 B
        assert_approx_eq!(state.price().unwrap(), 100.0);
    }
    assert_eq!(service.cached_len(), 3);
}

#[tokio::test]
async fn test_fee_models_follow_each_program() {
    let (transport, service) = service(Duration::from_secs(60));
    let raydium = fixtures::raydium_fixture(10, 10, 6, 6);
    let whirlpool = fixtures::whirlpool_fixture(10, 10, 6, 6);
    let meteora = fixtures::meteora_fixture(10, 10, 6, 6);
    for fixture in [&raydium, &whirlpool, &meteora] {
        fixture.install(&transport);
    }

    let bps = |state: Arc<defi_chain_core::dex::PoolState>| state.fee_bps();
    assert_approx_eq!(bps(service.get_pool(&raydium.address).await.unwrap().unwrap()), 25.0);
    assert_approx_eq!(bps(service.get_pool(&whirlpool.address).await.unwrap().unwrap()), 30.0);
    assert_approx_eq!(bps(service.get_pool(&meteora.address).await.unwrap().unwrap()), 25.0);

    let state = service.get_pool(&whirlpool.address).await.unwrap().unwrap();
    assert!(matches!(state.pricing, PoolPricing::Concentrated { tick_spacing: 64, .. }));
}

#[tokio::test]
async fn test_truncated_pool_account_is_not_a_pool() {
    let (transport, service) = service(Duration::from_secs(60));
    for mut fixture in [
        fixtures::raydium_fixture(1, 1, 6, 6),
        fixtures::whirlpool_fixture(1, 1, 6, 6),
        fixtures::meteora_fixture(1, 1, 6, 6),
    ] {
        fixture.pool_account.data.truncate(64);
        fixture.install(&transport);
        assert!(service.get_pool(&fixture.address).await.unwrap().is_none());
    }
    assert_eq!(service.cached_len(), 0);
}

#[tokio::test]
async fn test_missing_vault_is_reported() {
    let (transport, service) = service(Duration::from_secs(60));
    let mut fixture = fixtures::raydium_fixture(1, 1, 6, 6);
    fixture.accounts.pop();
    fixture.install(&transport);

    let err = service.get_pool(&fixture.address).await.unwrap_err();
    assert!(matches!(err, CoreError::AccountNotFound(_)));
}

#[tokio::test]
async fn test_expired_entries_are_refetched() {
    let (transport, service) = service(Duration::from_millis(40));
    let fixture = fixtures::raydium_fixture(1_000, 2_000, 6, 6);
    fixture.install(&transport);
    let (vault_a, _) = &fixture.accounts[0];

    let first = service.get_pool(&fixture.address).await.unwrap().unwrap();
    assert_eq!(first.reserve_a, 1_000);

    transport.set_account(*vault_a, fixtures::token_account(&fixture.mint_a, 5_000));
    let cached = service.get_pool(&fixture.address).await.unwrap().unwrap();
    assert_eq!(cached.reserve_a, 1_000);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let refreshed = service.get_pool(&fixture.address).await.unwrap().unwrap();
    assert_eq!(refreshed.reserve_a, 5_000);
    assert!(refreshed.last_updated > first.last_updated);
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let (transport, service) = service(Duration::from_secs(60));
    let fixture = fixtures::whirlpool_fixture(1_000, 2_000, 6, 6);
    fixture.install(&transport);
    let (vault_b, _) = &fixture.accounts[1];

    service.get_pool(&fixture.address).await.unwrap().unwrap();
    transport.set_account(*vault_b, fixtures::token_account(&fixture.mint_b, 0));

    let refreshed = service.refresh_pool(&fixture.address).await.unwrap().unwrap();
    assert_eq!(refreshed.reserve_b, 0);
    assert_approx_eq!(refreshed.price().unwrap(), 0.0);
}

#[test]
fn test_decoding_dispatches_on_owner_program() {
    let fixture = fixtures::meteora_fixture(1, 1, 6, 6);
    let dex = DexKind::from_program_id(&fixture.pool_account.owner).unwrap();
    assert_eq!(dex, DexKind::MeteoraDlmm);

    let layout = dex.decode(&fixture.address, &fixture.pool_account.data).unwrap();
    assert_eq!(layout.dependent_accounts().len(), 4);
    // Raydium stores decimals in the pool, so only the vaults are needed.
    let raydium = fixtures::raydium_fixture(1, 1, 6, 6);
    let layout = DexKind::RaydiumAmmV4
        .decode(&raydium.address, &raydium.pool_account.data)
        .unwrap();
    assert_eq!(layout.dependent_accounts().len(), 2);
    // A pool account decoded as the wrong program is rejected.
    assert!(DexKind::OrcaWhirlpool
        .decode(&raydium.address, &raydium.pool_account.data)
        .is_none());
}
