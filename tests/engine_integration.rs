use defi_chain_core::api::{ConnectionPool, Endpoint};
use defi_chain_core::config::{Config, SenderConfig};
use defi_chain_core::error::{CoreError, RetryPolicy};
use defi_chain_core::execution::{BuildOptions, SubmissionState};
use defi_chain_core::solana::{KeypairSigner, TransactionSigner};
use defi_chain_core::testing::{fixtures, MockRelay, MockRpcTransport};
use defi_chain_core::ChainEngine;
use pretty_assertions::assert_eq;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use std::sync::Arc;
use std::time::Duration;

fn engine(transport: Arc<MockRpcTransport>) -> ChainEngine {
    let mut config = Config::default();
    config.pool.retry = RetryPolicy::immediate(1);
    config.sender = SenderConfig {
        poll_interval: Duration::from_millis(10),
        confirmation_timeout: Duration::from_secs(5),
        rebroadcast_interval: None,
        ..SenderConfig::default()
    };
    let config = Arc::new(config);

    let pool = Arc::new(ConnectionPool::new(&config.pool));
    pool.register(Endpoint::rpc("mock", transport));
    ChainEngine::with_components(config, pool, Arc::new(MockRelay::new())).unwrap()
}

#[tokio::test]
async fn test_engine_builds_sends_and_tips_through_shared_pool() {
    let transport = Arc::new(MockRpcTransport::new("http://mock"));
    transport.set_status_on_send(Some(MockRpcTransport::confirmed_status(10)));
    let engine = engine(transport.clone());

    let keypair = Keypair::new();
    let payer = keypair.pubkey();
    let signer = KeypairSigner::new(keypair);

    let tip = engine.bundles().default_tip_instruction(&payer).unwrap();
    let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 5);
    let template = engine
        .builder()
        .build(&[ix, tip], &payer, &BuildOptions::default())
        .await
        .unwrap();
    let signed = template.sign(&[&signer as &dyn TransactionSigner]).await.unwrap();

    let result = engine
        .sender()
        .send(&template, &signed, &engine.sender().default_options())
        .await;
    assert_eq!(result.state, SubmissionState::Confirmed);

    let stats = engine.stats();
    assert_eq!(stats.total_endpoints, 1);
    assert_eq!(stats.failed_requests, 0);
    assert!(stats.total_requests >= 5);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_engine_pool_service_reads_pools() {
    let transport = Arc::new(MockRpcTransport::new("http://mock"));
    let fixture = fixtures::whirlpool_fixture(2_000_000, 1_000_000, 6, 6);
    fixture.install(&transport);
    let engine = engine(transport);

    let state = engine.pools().get_pool(&fixture.address).await.unwrap().unwrap();
    assert_eq!(state.reserve_a, 2_000_000);
    assert_eq!(state.price(), Some(0.5));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_calls_after_shutdown_are_cancelled() {
    let transport = Arc::new(MockRpcTransport::new("http://mock"));
    let engine = engine(transport);
    engine.shutdown().await;

    assert!(engine.is_shut_down());
    let err = engine.pool().block_height().await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled(_)));
}
