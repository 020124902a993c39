//! The governance chain boundary.
//!
//! The governance chain anchors DID ownership independently of the document
//! ledger: it records which address owns a DID, the transaction id of the
//! DID's identity root, key rotations and token balances.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error at the governance chain boundary.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// The chain transport is unreachable or rejected the extrinsic.
    #[error("Governance chain unavailable: {0}.")]
    Unavailable(String),
    /// The DID is not registered on the governance chain.
    #[error("Unknown DID: {0}.")]
    UnknownDid(String),
}

/// On-chain data recorded for a DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidData {
    /// Address (hex public key) currently owning the DID.
    pub owner: String,
    /// Trust level assigned at registration.
    pub level: u16,
}

/// Asynchronous client for the DID governance chain.
#[async_trait]
pub trait Governance: Send + Sync {
    /// Registers a DID under an owner address with a trust level.
    async fn register_did(
        &self,
        did: &str,
        owner: &str,
        level: u16,
    ) -> Result<(), GovernanceError>;

    /// Anchors the ledger transaction id of the DID's identity root.
    async fn register_did_document(
        &self,
        did: &str,
        create_tx_id: &str,
    ) -> Result<(), GovernanceError>;

    /// Returns the anchored identity-root transaction id for a DID.
    async fn did_document_tx(&self, did: &str) -> Result<String, GovernanceError>;

    /// Returns the on-chain record for a DID.
    async fn did_data(&self, did: &str) -> Result<DidData, GovernanceError>;

    /// Records a new public key for the DID, replacing the old one.
    async fn rotate_key(&self, did: &str, new_public: &str) -> Result<(), GovernanceError>;

    /// Re-assigns DID ownership to a different address.
    async fn change_owner(&self, did: &str, new_owner: &str) -> Result<(), GovernanceError>;

    /// Transfers tokens to an address.
    async fn transfer_tokens(&self, address: &str, amount: u128) -> Result<(), GovernanceError>;

    /// Resolves once the named on-chain event has been observed. No internal
    /// timeout; the caller imposes its own.
    async fn wait_for_event(&self, name: &str) -> Result<(), GovernanceError>;
}
