// src/dex/mod.rs
//! Pool-state decoding for the supported AMMs and the cached pool service.

pub mod meteora;
pub mod orca;
pub mod pool;
pub mod pool_management;
pub mod raydium;

pub use pool::{
    assemble_pool_state, calculate_price, calculate_tvl, DexKind, PoolLayout, PoolPricing,
    PoolState,
};
pub use pool_management::PoolStateService;
