//! In-memory reference implementations of the ledger and governance
//! boundaries, used by tests and local development.
//!
//! [`MemoryLedger`] enforces the same rules a real ledger would: transfers
//! must consume the current chain head, and signatures must verify under the
//! key owning the consumed output.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::governance::{DidData, Governance, GovernanceError};
use crate::key_manager;
use crate::ledger::{transfer_signing_input, Ledger, LedgerEntry, LedgerError, Operation};
use crate::payload::Payload;
use crate::utils;

#[derive(Default)]
struct LedgerState {
    entries: HashMap<String, LedgerEntry>,
    // Chain id -> ordered entry ids.
    chains: HashMap<String, Vec<String>>,
    spent: HashSet<String>,
    sequence: u64,
}

/// An in-memory append-only ledger.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_asset(
        &self,
        owner_public: &str,
        asset: Value,
        signature: &str,
    ) -> Result<String, LedgerError> {
        let signing_input = utils::canonicalize(&asset)?;
        let verified = key_manager::verify(owner_public, signing_input.as_bytes(), signature)
            .unwrap_or(false);
        if !verified {
            return Err(LedgerError::NotOwner);
        }
        let mut state = self.state.lock().unwrap();
        state.sequence += 1;
        let tx_id = utils::hash(&format!("{}:{}", state.sequence, signing_input));
        let entry = LedgerEntry {
            id: tx_id.clone(),
            chain_id: tx_id.clone(),
            operation: Operation::Create,
            asset,
            metadata: None,
            owner: owner_public.to_string(),
        };
        state.entries.insert(tx_id.clone(), entry);
        state.chains.insert(tx_id.clone(), vec![tx_id.clone()]);
        Ok(tx_id)
    }

    async fn transfer_asset(
        &self,
        consumed_tx_id: &str,
        metadata: Payload,
        new_owner: &str,
        signature: &str,
    ) -> Result<String, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let consumed = state
            .entries
            .get(consumed_tx_id)
            .ok_or_else(|| LedgerError::NotFound(consumed_tx_id.to_string()))?
            .clone();
        if state.spent.contains(consumed_tx_id) {
            return Err(LedgerError::StaleHead);
        }
        let signing_input = transfer_signing_input(consumed_tx_id, &metadata, new_owner)?;
        let verified = key_manager::verify(&consumed.owner, signing_input.as_bytes(), signature)
            .unwrap_or(false);
        if !verified {
            return Err(LedgerError::NotOwner);
        }
        state.sequence += 1;
        let tx_id = utils::hash(&format!("{}:{}", state.sequence, signing_input));
        let entry = LedgerEntry {
            id: tx_id.clone(),
            chain_id: consumed.chain_id.clone(),
            operation: Operation::Transfer,
            asset: consumed.asset.clone(),
            metadata: Some(metadata),
            owner: new_owner.to_string(),
        };
        state.spent.insert(consumed_tx_id.to_string());
        state.entries.insert(tx_id.clone(), entry);
        state
            .chains
            .get_mut(&consumed.chain_id)
            .ok_or_else(|| LedgerError::NotFound(consumed.chain_id.clone()))?
            .push(tx_id.clone());
        Ok(tx_id)
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<LedgerEntry, LedgerError> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(tx_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(tx_id.to_string()))
    }

    async fn get_last_transaction(&self, chain_id: &str) -> Result<LedgerEntry, LedgerError> {
        let state = self.state.lock().unwrap();
        let ids = state
            .chains
            .get(chain_id)
            .ok_or_else(|| LedgerError::NotFound(chain_id.to_string()))?;
        let last = ids.last().ok_or_else(|| LedgerError::NotFound(chain_id.to_string()))?;
        Ok(state.entries[last].clone())
    }

    async fn list_transactions(&self, chain_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().unwrap();
        let ids = state
            .chains
            .get(chain_id)
            .ok_or_else(|| LedgerError::NotFound(chain_id.to_string()))?;
        Ok(ids.iter().map(|id| state.entries[id].clone()).collect())
    }

    async fn search_metadata(&self, text: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().unwrap();
        let mut matches: Vec<LedgerEntry> = Vec::new();
        for ids in state.chains.values() {
            for id in ids {
                let entry = &state.entries[id];
                if let Some(payload) = &entry.metadata {
                    if payload.subject.to_string().contains(text) {
                        matches.push(entry.clone());
                    }
                }
            }
        }
        Ok(matches)
    }
}

#[derive(Default)]
struct GovernanceState {
    dids: HashMap<String, DidData>,
    document_txs: HashMap<String, String>,
    balances: HashMap<String, u128>,
    events: HashSet<String>,
}

/// An in-memory governance chain.
#[derive(Default)]
pub struct MemoryGovernance {
    state: Mutex<GovernanceState>,
    notify: Arc<Notify>,
}

impl MemoryGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token balance of an address.
    pub fn balance(&self, address: &str) -> u128 {
        *self.state.lock().unwrap().balances.get(address).unwrap_or(&0)
    }

    fn record_event(&self, name: &str) {
        self.state.lock().unwrap().events.insert(name.to_string());
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Governance for MemoryGovernance {
    async fn register_did(
        &self,
        did: &str,
        owner: &str,
        level: u16,
    ) -> Result<(), GovernanceError> {
        let mut state = self.state.lock().unwrap();
        state.dids.insert(
            did.to_string(),
            DidData {
                owner: owner.to_string(),
                level,
            },
        );
        drop(state);
        self.record_event("DidRegistered");
        Ok(())
    }

    async fn register_did_document(
        &self,
        did: &str,
        create_tx_id: &str,
    ) -> Result<(), GovernanceError> {
        let mut state = self.state.lock().unwrap();
        if !state.dids.contains_key(did) {
            return Err(GovernanceError::UnknownDid(did.to_string()));
        }
        state
            .document_txs
            .insert(did.to_string(), create_tx_id.to_string());
        Ok(())
    }

    async fn did_document_tx(&self, did: &str) -> Result<String, GovernanceError> {
        self.state
            .lock()
            .unwrap()
            .document_txs
            .get(did)
            .cloned()
            .ok_or_else(|| GovernanceError::UnknownDid(did.to_string()))
    }

    async fn did_data(&self, did: &str) -> Result<DidData, GovernanceError> {
        self.state
            .lock()
            .unwrap()
            .dids
            .get(did)
            .cloned()
            .ok_or_else(|| GovernanceError::UnknownDid(did.to_string()))
    }

    async fn rotate_key(&self, did: &str, new_public: &str) -> Result<(), GovernanceError> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .dids
            .get_mut(did)
            .ok_or_else(|| GovernanceError::UnknownDid(did.to_string()))?;
        data.owner = new_public.to_string();
        drop(state);
        self.record_event("KeyRotated");
        Ok(())
    }

    async fn change_owner(&self, did: &str, new_owner: &str) -> Result<(), GovernanceError> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .dids
            .get_mut(did)
            .ok_or_else(|| GovernanceError::UnknownDid(did.to_string()))?;
        data.owner = new_owner.to_string();
        Ok(())
    }

    async fn transfer_tokens(&self, address: &str, amount: u128) -> Result<(), GovernanceError> {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(address.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn wait_for_event(&self, name: &str) -> Result<(), GovernanceError> {
        loop {
            // Register interest before checking, so a concurrent event
            // between check and wait is not missed.
            let notified = self.notify.notified();
            if self.state.lock().unwrap().events.contains(name) {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_manager::Keypair;
    use crate::payload::TxType;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_rejects_foreign_signature() {
        let ledger = MemoryLedger::new();
        let key = Keypair::generate();
        let other = Keypair::generate();
        let asset = json!({"kind": "list"});
        let signature = other.sign_canonical(&asset).unwrap();
        let result = ledger
            .create_asset(&key.public_hex(), asset, &signature)
            .await;
        assert!(matches!(result, Err(LedgerError::NotOwner)));
    }

    #[tokio::test]
    async fn test_transfer_enforces_head_consumption() {
        let ledger = MemoryLedger::new();
        let key = Keypair::generate();
        let asset = json!({});
        let signature = key.sign_canonical(&asset).unwrap();
        let root = ledger
            .create_asset(&key.public_hex(), asset, &signature)
            .await
            .unwrap();

        let first = Payload::new(TxType::Info, json!({"n": 1}));
        let input = transfer_signing_input(&root, &first, &key.public_hex()).unwrap();
        ledger
            .transfer_asset(&root, first, &key.public_hex(), &key.sign_hex(input.as_bytes()))
            .await
            .unwrap();

        // Consuming the already-spent root again loses.
        let second = Payload::new(TxType::Info, json!({"n": 2}));
        let input = transfer_signing_input(&root, &second, &key.public_hex()).unwrap();
        let result = ledger
            .transfer_asset(&root, second, &key.public_hex(), &key.sign_hex(input.as_bytes()))
            .await;
        assert!(matches!(result, Err(LedgerError::StaleHead)));
    }

    #[tokio::test]
    async fn test_search_metadata_scans_subjects() {
        let ledger = MemoryLedger::new();
        let key = Keypair::generate();
        let asset = json!({});
        let signature = key.sign_canonical(&asset).unwrap();
        let root = ledger
            .create_asset(&key.public_hex(), asset, &signature)
            .await
            .unwrap();

        let payload = Payload::new(TxType::Issued, json!({"holder": "did-p"}));
        let input = transfer_signing_input(&root, &payload, &key.public_hex()).unwrap();
        ledger
            .transfer_asset(&root, payload, &key.public_hex(), &key.sign_hex(input.as_bytes()))
            .await
            .unwrap();

        let hits = ledger.search_metadata("did-p").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(ledger.search_metadata("did-q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_governance_registration_and_events() {
        let governance = MemoryGovernance::new();
        governance.register_did("did-o", "addr-1", 1).await.unwrap();
        governance.wait_for_event("DidRegistered").await.unwrap();

        let data = governance.did_data("did-o").await.unwrap();
        assert_eq!(data.owner, "addr-1");
        assert_eq!(data.level, 1);

        governance
            .register_did_document("did-o", "tx-root")
            .await
            .unwrap();
        assert_eq!(governance.did_document_tx("did-o").await.unwrap(), "tx-root");

        assert!(matches!(
            governance.did_data("did-x").await,
            Err(GovernanceError::UnknownDid(_))
        ));
    }

    #[tokio::test]
    async fn test_token_transfer_accumulates() {
        let governance = MemoryGovernance::new();
        governance.transfer_tokens("addr-1", 500).await.unwrap();
        governance.transfer_tokens("addr-1", 250).await.unwrap();
        assert_eq!(governance.balance("addr-1"), 750);
    }
}
