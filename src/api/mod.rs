// src/api/mod.rs
//! Endpoint health registry and the failover connection pool.

pub mod connection_pool;
pub mod endpoint;

pub use connection_pool::{ConnectionPool, EndpointPick, PoolStats};
pub use endpoint::{Endpoint, EndpointState, HealthSnapshot, ProbeGuard, ScoringParams};
