pub mod rpc;
pub mod signer;

pub use rpc::{BlockhashInfo, RpcTransport, SignatureStatus, SimulationOutcome, SolanaRpcTransport};
pub use signer::{KeypairSigner, TransactionSigner, UnavailableSigner};
