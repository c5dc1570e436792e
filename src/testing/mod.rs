//! Test doubles
//!
//! Deterministic stand-ins for the network edges of the crate:
//! - `MockRpcTransport` for cluster endpoints
//! - `MockRelay` for the bundle relay
//! - raw account fixtures for the supported pool layouts

pub mod fixtures;
pub mod mock_relay;
pub mod mock_rpc;

pub use mock_relay::MockRelay;
pub use mock_rpc::MockRpcTransport;
