//! The document-storage ledger boundary.
//!
//! The ledger offers exactly two write primitives: create an asset and
//! transfer ownership of an asset. Everything richer (versioned documents,
//! registries, audit logs) is layered on top by [`crate::chain`].
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::payload::Payload;
use crate::utils;

/// An error at the ledger boundary.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger transport is unreachable or rejected the request outright.
    #[error("Ledger unavailable: {0}.")]
    Unavailable(String),
    /// The transfer does not consume the current chain head; the caller must
    /// re-fetch the head and retry.
    #[error("Transfer does not consume the current chain head.")]
    StaleHead,
    /// The signature does not belong to the current owner of the chain head.
    #[error("Signer does not own the current chain head.")]
    NotOwner,
    /// No transaction with the given id.
    #[error("No such transaction: {0}.")]
    NotFound(String),
    /// Wrapped serialization error.
    #[error("Malformed ledger payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ledger entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Transfer,
}

/// One committed ledger transaction.
///
/// CREATE entries carry their initial payload in `asset`; TRANSFER entries
/// carry a typed [`Payload`] in `metadata`. `owner` is the hex-encoded public
/// key controlling the entry's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub chain_id: String,
    pub operation: Operation,
    pub asset: Value,
    pub metadata: Option<Payload>,
    pub owner: String,
}

impl LedgerEntry {
    pub fn is_transfer(&self) -> bool {
        self.operation == Operation::Transfer
    }
}

/// Canonical byte content signed by a chain owner to authorize a transfer.
///
/// Both the submitting client and a verifying ledger rebuild this string, so
/// it must be deterministic (JCS) and cover everything the transfer commits.
pub fn transfer_signing_input(
    consumed_tx_id: &str,
    metadata: &Payload,
    new_owner: &str,
) -> Result<String, serde_json::Error> {
    utils::canonicalize(&json!({
        "consumes": consumed_tx_id,
        "metadata": metadata,
        "newOwner": new_owner,
    }))
}

/// Asynchronous client for the append-only storage ledger.
///
/// Implementations must map "transfer input already spent" rejections to
/// [`LedgerError::StaleHead`] and signature rejections to
/// [`LedgerError::NotOwner`], and must never retry internally.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Commits a CREATE entry and returns its transaction id, which also
    /// identifies the new chain.
    async fn create_asset(
        &self,
        owner_public: &str,
        asset: Value,
        signature: &str,
    ) -> Result<String, LedgerError>;

    /// Commits a TRANSFER consuming `consumed_tx_id`, re-assigning ownership
    /// to `new_owner` and carrying `metadata`.
    async fn transfer_asset(
        &self,
        consumed_tx_id: &str,
        metadata: Payload,
        new_owner: &str,
        signature: &str,
    ) -> Result<String, LedgerError>;

    /// Fetches a single transaction by id.
    async fn get_transaction(&self, tx_id: &str) -> Result<LedgerEntry, LedgerError>;

    /// Fetches the head (latest entry) of a chain.
    async fn get_last_transaction(&self, chain_id: &str) -> Result<LedgerEntry, LedgerError>;

    /// Lists a chain's entries in commit order, oldest first.
    async fn list_transactions(&self, chain_id: &str) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Ledger-wide search for transfer entries whose metadata subject
    /// contains `text`.
    async fn search_metadata(&self, text: &str) -> Result<Vec<LedgerEntry>, LedgerError>;
}
