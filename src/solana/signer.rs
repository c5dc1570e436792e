// src/solana/signer.rs
//! Signer capability. The core never holds key material itself; it hands the
//! serialized message to a [`TransactionSigner`] and gets a signature back.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use log::{error, info};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
};

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    async fn sign_message(&self, message: &[u8]) -> Result<Signature>;
}

/// Local keypair adapter, mainly for tooling and tests.
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        match read_keypair_file(path) {
            Ok(keypair) => {
                info!("Successfully loaded keypair from: {}", path);
                Ok(Self { keypair })
            }
            Err(e) => {
                error!("Failed to load keypair from path '{}': {}", path, e);
                Err(CoreError::Signer(format!(
                    "failed to load keypair from '{}': {}",
                    path, e
                )))
            }
        }
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        self.keypair
            .try_sign_message(message)
            .map_err(|e| CoreError::Signer(e.to_string()))
    }
}

/// Placeholder for a custody backend (HSM, remote wallet) that is not wired up.
pub struct UnavailableSigner {
    pubkey: Pubkey,
    backend: String,
}

impl UnavailableSigner {
    pub fn new(pubkey: Pubkey, backend: &str) -> Self {
        Self {
            pubkey,
            backend: backend.to_string(),
        }
    }
}

#[async_trait]
impl TransactionSigner for UnavailableSigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Signature> {
        Err(CoreError::NotImplemented(format!(
            "signer backend '{}' is not available",
            self.backend
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keypair_signer_verifies() {
        let signer = KeypairSigner::new(Keypair::new());
        let message = b"chain-core";
        let signature = signer.sign_message(message).await.unwrap();
        assert!(signature.verify(signer.pubkey().as_ref(), message));
    }

    #[tokio::test]
    async fn test_unavailable_signer_reports_not_implemented() {
        let signer = UnavailableSigner::new(Pubkey::new_unique(), "hsm");
        let err = signer.sign_message(b"x").await.unwrap_err();
        assert!(matches!(err, CoreError::NotImplemented(_)));
    }
}
