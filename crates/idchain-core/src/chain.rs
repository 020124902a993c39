//! The AssetChain primitive.
//!
//! An asset chain is the sequence of TRANSFER entries descending from one
//! CREATE entry, each consuming its predecessor. Appending re-assigns
//! ownership to the writer's own key, so a chain has exactly one writer at a
//! time and its history is totally ordered by the ledger.
use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::key_manager::{Keypair, KeyManagerError};
use crate::ledger::{transfer_signing_input, Ledger, LedgerEntry, LedgerError};
use crate::payload::{Payload, TxType};

/// An error relating to asset chain operations.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Wrapped ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    /// Wrapped key manager error.
    #[error("Key error: {0}")]
    Key(#[from] KeyManagerError),
    /// A chain head carried an unexpected payload tag.
    #[error("Expected a {expected:?} payload, found {found}.")]
    SchemaMismatch { expected: TxType, found: String },
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Client-side view of one asset chain on a ledger.
///
/// Holds no state beyond the ledger handle; every operation reads the current
/// head fresh. Concurrency is resolved by the ledger: an append that loses a
/// race surfaces [`LedgerError::StaleHead`] and is never retried here.
pub struct AssetChain<'a> {
    ledger: &'a dyn Ledger,
}

impl<'a> AssetChain<'a> {
    pub fn new(ledger: &'a dyn Ledger) -> Self {
        Self { ledger }
    }

    /// Creates a new chain rooted at `asset`, owned by `key`. Returns the
    /// CREATE transaction id, which identifies the chain from then on.
    pub async fn create(&self, key: &Keypair, asset: Value) -> Result<String, ChainError> {
        let signature = key.sign_canonical(&asset)?;
        let tx_id = self
            .ledger
            .create_asset(&key.public_hex(), asset, &signature)
            .await?;
        debug!("Created chain {}", tx_id);
        Ok(tx_id)
    }

    /// Appends a payload to the chain, keeping ownership under `key`.
    pub async fn append(
        &self,
        key: &Keypair,
        chain_id: &str,
        payload: Payload,
    ) -> Result<String, ChainError> {
        self.append_to(key, chain_id, payload, &key.public_hex()).await
    }

    /// Appends a payload and re-assigns the chain to `new_owner`. Used during
    /// key rotation; `key` must own the current head.
    pub async fn append_to(
        &self,
        key: &Keypair,
        chain_id: &str,
        payload: Payload,
        new_owner: &str,
    ) -> Result<String, ChainError> {
        let head = self.ledger.get_last_transaction(chain_id).await?;
        let signing_input = transfer_signing_input(&head.id, &payload, new_owner)?;
        let signature = key.sign_hex(signing_input.as_bytes());
        let tx_id = self
            .ledger
            .transfer_asset(&head.id, payload, new_owner, &signature)
            .await?;
        debug!("Appended {} to chain {}", tx_id, chain_id);
        Ok(tx_id)
    }

    /// Fetches the latest entry of a chain.
    pub async fn head(&self, chain_id: &str) -> Result<LedgerEntry, ChainError> {
        Ok(self.ledger.get_last_transaction(chain_id).await?)
    }

    /// Fetches a chain's entries in commit order, oldest first.
    pub async fn history(&self, chain_id: &str) -> Result<Vec<LedgerEntry>, ChainError> {
        Ok(self.ledger.list_transactions(chain_id).await?)
    }

    /// Fetches the head of a chain and checks its payload tag.
    pub async fn typed_head(
        &self,
        chain_id: &str,
        expected: TxType,
    ) -> Result<(LedgerEntry, Payload), ChainError> {
        let head = self.ledger.get_last_transaction(chain_id).await?;
        let payload = match &head.metadata {
            Some(payload) if payload.tx_type == expected => payload.clone(),
            Some(payload) => {
                return Err(ChainError::SchemaMismatch {
                    expected,
                    found: format!("{:?}", payload.tx_type),
                })
            }
            None => {
                return Err(ChainError::SchemaMismatch {
                    expected,
                    found: "CREATE entry".to_string(),
                })
            }
        };
        Ok((head, payload))
    }

    /// Ledger-wide search for transfer entries whose subject mentions `text`.
    pub async fn search_by_reference(&self, text: &str) -> Result<Vec<LedgerEntry>, ChainError> {
        Ok(self.ledger.search_metadata(text).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Operation;
    use crate::memory::MemoryLedger;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_append_grows_history() {
        let ledger = MemoryLedger::new();
        let chain = AssetChain::new(&ledger);
        let key = Keypair::generate();

        let chain_id = chain.create(&key, json!({"kind": "list"})).await.unwrap();
        chain
            .append(&key, &chain_id, Payload::new(TxType::Info, json!({"n": 1})))
            .await
            .unwrap();
        chain
            .append(&key, &chain_id, Payload::new(TxType::Info, json!({"n": 2})))
            .await
            .unwrap();

        let history = chain.history(&chain_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].operation, Operation::Create);
        assert!(history[1].is_transfer());

        // Head agrees with the last element of history.
        let head = chain.head(&chain_id).await.unwrap();
        assert_eq!(head.id, history.last().unwrap().id);
        assert_eq!(head.metadata.as_ref().unwrap().subject["n"], 2);
    }

    #[tokio::test]
    async fn test_typed_head_mismatch() {
        let ledger = MemoryLedger::new();
        let chain = AssetChain::new(&ledger);
        let key = Keypair::generate();

        let chain_id = chain.create(&key, json!({})).await.unwrap();
        chain
            .append(&key, &chain_id, Payload::new(TxType::Info, json!({})))
            .await
            .unwrap();

        let result = chain.typed_head(&chain_id, TxType::DidDoc).await;
        assert!(matches!(result, Err(ChainError::SchemaMismatch { .. })));
        assert!(chain.typed_head(&chain_id, TxType::Info).await.is_ok());
    }

    #[tokio::test]
    async fn test_append_to_reassigns_ownership() {
        let ledger = MemoryLedger::new();
        let chain = AssetChain::new(&ledger);
        let old_key = Keypair::generate();
        let new_key = Keypair::generate();

        let chain_id = chain.create(&old_key, json!({})).await.unwrap();
        chain
            .append_to(
                &old_key,
                &chain_id,
                Payload::new(TxType::Info, json!({})),
                &new_key.public_hex(),
            )
            .await
            .unwrap();

        // Old key no longer owns the head.
        let stale = chain
            .append(&old_key, &chain_id, Payload::new(TxType::Info, json!({})))
            .await;
        assert!(matches!(stale, Err(ChainError::Ledger(LedgerError::NotOwner))));

        // New key does.
        chain
            .append(&new_key, &chain_id, Payload::new(TxType::Info, json!({})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_losing_writer_gets_stale_head() {
        let ledger = MemoryLedger::new();
        let chain = AssetChain::new(&ledger);
        let key = Keypair::generate();

        let chain_id = chain.create(&key, json!({})).await.unwrap();
        let head = chain.head(&chain_id).await.unwrap();

        chain
            .append(&key, &chain_id, Payload::new(TxType::Info, json!({"winner": true})))
            .await
            .unwrap();

        // A competing transfer still consuming the old head must lose.
        let payload = Payload::new(TxType::Info, json!({"winner": false}));
        let input = transfer_signing_input(&head.id, &payload, &key.public_hex()).unwrap();
        let signature = key.sign_hex(input.as_bytes());
        let result = ledger
            .transfer_asset(&head.id, payload, &key.public_hex(), &signature)
            .await;
        assert!(matches!(result, Err(LedgerError::StaleHead)));

        // The winner's entry is the head; history is unaffected by the loser.
        let history = chain.history(&chain_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.last().unwrap().metadata.as_ref().unwrap().subject["winner"],
            true
        );
    }
}
