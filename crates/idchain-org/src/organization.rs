//! Organization identities on the ledger.
//!
//! An organization is an identity root asset plus three satellite chains
//! (DID documents, verified DIDs, applications), all owned by the
//! organization's storage key. The root must be created last: it embeds the
//! satellite chain ids and the self-signed subject credential, so a root that
//! exists always points at chains that exist.
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use idchain_core::chain::{AssetChain, ChainError};
use idchain_core::governance::{Governance, GovernanceError};
use idchain_core::key_manager::{Keypair, KeyManagerError, KeyRing};
use idchain_core::ledger::{Ledger, LedgerError};
use idchain_core::payload::{Payload, TxType};
use idchain_core::vc::{self, Credential, DidDocument, VcError};

use crate::application::{self, ApplicationEntry, KEY_ROTATION_MARKER};
use crate::tax::{self, TaxError};

/// Governance event emitted when a DID registration lands.
pub const DID_REGISTERED_EVENT: &str = "DidRegistered";

/// An error relating to organization operations.
#[derive(Error, Debug)]
pub enum OrgError {
    /// Subject failed local validation.
    #[error("Invalid subject: {0}.")]
    InvalidSubject(String),
    /// Wrapped tax validation error.
    #[error(transparent)]
    Tax(#[from] TaxError),
    /// The identity root names a different DID than the caller expected.
    #[error("DID mismatch: expected {expected}, found {found}.")]
    DidMismatch { expected: String, found: String },
    /// The transaction is not an organization identity root.
    #[error("Transaction {0} is not an identity root.")]
    NotAnIdentityRoot(String),
    /// The operation needs local keys but the organization was loaded
    /// read-only.
    #[error("No keyring attached to this organization.")]
    NoKeyRing,
    /// Wrapped chain error.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Wrapped ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Wrapped governance error.
    #[error(transparent)]
    Governance(#[from] GovernanceError),
    /// Wrapped key manager error.
    #[error(transparent)]
    Key(#[from] KeyManagerError),
    /// Wrapped credential error.
    #[error(transparent)]
    Vc(#[from] VcError),
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Shared handles to the two chains every organization operation needs.
#[derive(Clone)]
pub struct OrgContext {
    pub ledger: Arc<dyn Ledger>,
    pub governance: Arc<dyn Governance>,
}

/// The organization's registered subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSubject {
    pub legal_name: String,
    pub tax_id: String,
    pub country_code: String,
    pub network: String,
    /// Additional information merged in by `save_information` updates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrgSubject {
    pub fn new(legal_name: &str, tax_id: &str, country_code: &str, network: &str) -> Self {
        Self {
            legal_name: legal_name.to_string(),
            tax_id: tax_id.to_string(),
            country_code: country_code.to_string(),
            network: network.to_string(),
            extra: Map::new(),
        }
    }

    fn validate(&self) -> Result<(), OrgError> {
        if self.legal_name.trim().is_empty() {
            return Err(OrgError::InvalidSubject("empty legal name".to_string()));
        }
        if self.network.trim().is_empty() {
            return Err(OrgError::InvalidSubject("empty network".to_string()));
        }
        tax::validate_tax_id(&self.country_code, &self.tax_id)?;
        Ok(())
    }
}

/// Ids of the three satellite chains named by an identity root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgNodes {
    pub diddocument: String,
    pub verified: String,
    pub applications: String,
}

/// An organization identity, either locally controlled (with a keyring) or
/// loaded read-only from the ledger.
pub struct Organization {
    ctx: OrgContext,
    pub did: String,
    pub create_tx_id: String,
    pub subject: OrgSubject,
    pub nodes: OrgNodes,
    pub applications: Vec<ApplicationEntry>,
    pub did_document: DidDocument,
    pub credential: Credential,
    keyring: Option<KeyRing>,
}

impl Organization {
    /// Creates a new organization with a freshly generated keyring.
    pub async fn create(ctx: OrgContext, subject: OrgSubject) -> Result<Self, OrgError> {
        let keyring = KeyRing::generate()?;
        Self::create_with_keyring(ctx, subject, keyring).await
    }

    /// Creates a new organization controlled by an existing keyring.
    ///
    /// Bootstrap order is fixed: satellite chains first, identity root last.
    pub async fn create_with_keyring(
        ctx: OrgContext,
        subject: OrgSubject,
        keyring: KeyRing,
    ) -> Result<Self, OrgError> {
        subject.validate()?;
        let did = keyring.did();
        let chain = AssetChain::new(&*ctx.ledger);
        let storage = keyring.storage();

        let applications = chain
            .create(storage, json!({"type": u8::from(TxType::AppList), "did": &did}))
            .await?;
        let diddocument = chain
            .create(storage, json!({"type": u8::from(TxType::DidDocList), "did": &did}))
            .await?;
        let document = DidDocument::new(&did, &keyring.credential().public_hex(), "");
        chain
            .append(
                storage,
                &diddocument,
                Payload::new(TxType::DidDoc, serde_json::to_value(&document)?),
            )
            .await?;
        let verified = chain
            .create(storage, json!({"type": u8::from(TxType::VerifiedList), "did": &did}))
            .await?;

        let credential = vc::sign_credential(
            serde_json::to_value(&subject)?,
            &did,
            keyring.credential(),
            &document,
        )?;
        let root = json!({
            "did": &did,
            "type": u8::from(TxType::Did),
            "diddocument": &diddocument,
            "verified": &verified,
            "applications": &applications,
            "credential": &credential,
        });
        let create_tx_id = chain.create(storage, root).await?;
        info!("Created organization {} at {}", did, create_tx_id);

        Ok(Self {
            ctx,
            did,
            create_tx_id,
            subject,
            nodes: OrgNodes {
                diddocument,
                verified,
                applications,
            },
            applications: Vec::new(),
            did_document: document,
            credential,
            keyring: Some(keyring),
        })
    }

    /// Loads an organization from its identity root, read-only.
    pub async fn load(ctx: OrgContext, create_tx_id: &str, did: &str) -> Result<Self, OrgError> {
        let root = ctx.ledger.get_transaction(create_tx_id).await?;
        if root.asset.get("type").and_then(Value::as_u64) != Some(u64::from(u8::from(TxType::Did)))
        {
            return Err(OrgError::NotAnIdentityRoot(create_tx_id.to_string()));
        }
        let found = root
            .asset
            .get("did")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if found != did {
            return Err(OrgError::DidMismatch {
                expected: did.to_string(),
                found,
            });
        }
        let nodes = OrgNodes {
            diddocument: require_str(&root.asset, "diddocument", create_tx_id)?,
            verified: require_str(&root.asset, "verified", create_tx_id)?,
            applications: require_str(&root.asset, "applications", create_tx_id)?,
        };
        let credential: Credential = serde_json::from_value(
            root.asset
                .get("credential")
                .cloned()
                .ok_or_else(|| OrgError::NotAnIdentityRoot(create_tx_id.to_string()))?,
        )?;
        let mut subject: OrgSubject =
            serde_json::from_value(credential.credential_subject.clone())?;

        let chain = AssetChain::new(&*ctx.ledger);
        // Later information updates overlay the registered subject.
        let head = chain.head(create_tx_id).await?;
        if let Some(payload) = &head.metadata {
            if payload.tx_type == TxType::Info {
                subject = overlay(subject, &payload.subject)?;
            }
        }

        let applications = application::replay(&chain.history(&nodes.applications).await?);
        let (_, doc_payload) = chain.typed_head(&nodes.diddocument, TxType::DidDoc).await?;
        let did_document: DidDocument = serde_json::from_value(doc_payload.subject)?;
        debug!("Loaded organization {} ({} applications)", did, applications.len());

        Ok(Self {
            ctx,
            did: did.to_string(),
            create_tx_id: create_tx_id.to_string(),
            subject,
            nodes,
            applications,
            did_document,
            credential,
            keyring: None,
        })
    }

    /// Registers the organization's DID on the governance chain and funds it.
    pub async fn register(&self, level: u16, tokens: u128) -> Result<(), OrgError> {
        let keyring = self.keyring()?;
        let owner = keyring.governance().public_hex();
        self.ctx
            .governance
            .register_did(&self.did, &owner, level)
            .await?;
        self.ctx.governance.wait_for_event(DID_REGISTERED_EVENT).await?;
        self.ctx
            .governance
            .register_did_document(&self.did, &self.create_tx_id)
            .await?;
        if tokens > 0 {
            self.ctx.governance.transfer_tokens(&owner, tokens).await?;
        }
        info!("Registered DID {} on the governance chain", self.did);
        Ok(())
    }

    pub fn ctx(&self) -> &OrgContext {
        &self.ctx
    }

    /// The organization's keyring, or [`OrgError::NoKeyRing`] when loaded
    /// read-only.
    pub fn keyring(&self) -> Result<&KeyRing, OrgError> {
        self.keyring.as_ref().ok_or(OrgError::NoKeyRing)
    }

    /// Attaches a keyring to a read-only organization, making it writable.
    pub fn attach_keyring(&mut self, keyring: KeyRing) {
        self.keyring = Some(keyring);
    }

    /// Appends an information update to the identity root chain and merges it
    /// into the local subject.
    pub async fn save_information(&mut self, updates: Map<String, Value>) -> Result<(), OrgError> {
        let merged = overlay(self.subject.clone(), &Value::Object(updates))?;
        let storage = self.keyring()?.storage();
        let chain = AssetChain::new(&*self.ctx.ledger);
        chain
            .append(
                storage,
                &self.create_tx_id,
                Payload::new(TxType::Info, serde_json::to_value(&merged)?),
            )
            .await?;
        self.subject = merged;
        Ok(())
    }

    /// Publishes a new DID document version with the given service endpoint.
    pub async fn save_did_document(&mut self, endpoint: &str) -> Result<(), OrgError> {
        let keyring = self.keyring()?;
        let document = DidDocument::new(&self.did, &keyring.credential().public_hex(), endpoint);
        let chain = AssetChain::new(&*self.ctx.ledger);
        chain
            .append(
                keyring.storage(),
                &self.nodes.diddocument,
                Payload::new(TxType::DidDoc, serde_json::to_value(&document)?),
            )
            .await?;
        self.did_document = document;
        Ok(())
    }

    /// Records another DID as verified by this organization.
    pub async fn save_verified(&self, did: &str) -> Result<(), OrgError> {
        let storage = self.keyring()?.storage();
        let chain = AssetChain::new(&*self.ctx.ledger);
        chain
            .append(
                storage,
                &self.nodes.verified,
                Payload::new(TxType::Verified, json!({"did": did})),
            )
            .await?;
        Ok(())
    }

    /// Replays the verified-DID chain.
    pub async fn verified_dids(&self) -> Result<Vec<String>, OrgError> {
        let chain = AssetChain::new(&*self.ctx.ledger);
        let history = chain.history(&self.nodes.verified).await?;
        Ok(history
            .iter()
            .filter_map(|entry| entry.metadata.as_ref())
            .filter(|payload| payload.subject.get(KEY_ROTATION_MARKER).is_none())
            .filter_map(|payload| payload.subject.get("did").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Re-replays the applications chain into `self.applications`.
    pub async fn refresh_applications(&mut self) -> Result<(), OrgError> {
        let chain = AssetChain::new(&*self.ctx.ledger);
        self.applications = application::replay(&chain.history(&self.nodes.applications).await?);
        Ok(())
    }

    /// Announces an application on the applications chain.
    pub(crate) async fn announce_application(
        &mut self,
        tx_type: TxType,
        subject: Value,
    ) -> Result<(), OrgError> {
        let storage = self.keyring()?.storage();
        let chain = AssetChain::new(&*self.ctx.ledger);
        chain
            .append(
                storage,
                &self.nodes.applications,
                Payload::new(tx_type, subject.clone()),
            )
            .await?;
        self.applications.push(ApplicationEntry {
            tx_type,
            subject,
            datetime: idchain_core::utils::now(),
        });
        Ok(())
    }

    pub(crate) async fn append_payload(
        &self,
        chain_id: &str,
        payload: Payload,
    ) -> Result<String, OrgError> {
        let storage = self.keyring()?.storage();
        let chain = AssetChain::new(&*self.ctx.ledger);
        Ok(chain.append(storage, chain_id, payload).await?)
    }

    pub(crate) async fn create_chain(&self, asset: Value) -> Result<String, OrgError> {
        let storage = self.keyring()?.storage();
        let chain = AssetChain::new(&*self.ctx.ledger);
        Ok(chain.create(storage, asset).await?)
    }

    /// Transfers every live chain head to a new storage key, records the
    /// rotation on the governance chain, then swaps the local key.
    ///
    /// Document chains re-assert their head payload; list chains take a
    /// marker entry that every replay skips. A failure partway through leaves
    /// the untouched chains under the old key; re-running with the same new
    /// key completes the rotation.
    pub async fn rotate_storage_key(&mut self, new_key: Keypair) -> Result<(), OrgError> {
        let old = self.keyring()?.storage().clone();
        let new_public = new_key.public_hex();
        let chain = AssetChain::new(&*self.ctx.ledger);

        // Announced sub-chains first.
        for entry in &self.applications {
            for (chain_id, element_tag) in announced_chains(entry) {
                chain
                    .append_to(
                        &old,
                        &chain_id,
                        Payload::new(element_tag, json!({KEY_ROTATION_MARKER: true})),
                        &new_public,
                    )
                    .await?;
            }
        }
        chain
            .append_to(
                &old,
                &self.nodes.applications,
                Payload::new(TxType::App, json!({KEY_ROTATION_MARKER: true})),
                &new_public,
            )
            .await?;
        chain
            .append_to(
                &old,
                &self.nodes.verified,
                Payload::new(TxType::Verified, json!({KEY_ROTATION_MARKER: true})),
                &new_public,
            )
            .await?;
        chain
            .append_to(
                &old,
                &self.nodes.diddocument,
                Payload::new(TxType::DidDoc, serde_json::to_value(&self.did_document)?),
                &new_public,
            )
            .await?;
        chain
            .append_to(
                &old,
                &self.create_tx_id,
                Payload::new(TxType::Info, serde_json::to_value(&self.subject)?),
                &new_public,
            )
            .await?;

        self.ctx.governance.rotate_key(&self.did, &new_public).await?;
        if let Some(keyring) = self.keyring.as_mut() {
            keyring.rotate_storage(new_key);
        }
        info!("Rotated storage key for {}", self.did);
        Ok(())
    }

    /// Password-encrypted export of the organization's keys.
    pub fn export(&self, password: &str) -> Result<String, OrgError> {
        Ok(self.keyring()?.export(password)?)
    }

    /// Loads an organization and attaches keys from an export blob.
    pub async fn import(
        ctx: OrgContext,
        create_tx_id: &str,
        did: &str,
        exported: &str,
        password: &str,
    ) -> Result<Self, OrgError> {
        let keyring = KeyRing::import(exported, password)?;
        let mut org = Self::load(ctx, create_tx_id, did).await?;
        org.attach_keyring(keyring);
        Ok(org)
    }
}

/// Chains announced by one application entry, with the payload tag their
/// elements (and rotation markers) carry.
fn announced_chains(entry: &ApplicationEntry) -> Vec<(String, TxType)> {
    let keys: &[(&str, TxType)] = match entry.tx_type {
        TxType::Tags => &[
            ("definitions", TxType::TagType),
            ("issued", TxType::Issued),
            ("accepted", TxType::Issued),
        ],
        TxType::Integrity => &[("hashes", TxType::Hash)],
        _ => &[("createTxId", TxType::App)],
    };
    keys.iter()
        .filter_map(|(key, tag)| entry.chain_id(key).map(|id| (id.to_string(), *tag)))
        .collect()
}

fn require_str(asset: &Value, key: &str, tx_id: &str) -> Result<String, OrgError> {
    asset
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OrgError::NotAnIdentityRoot(tx_id.to_string()))
}

/// Merges update fields over a subject, field by field.
fn overlay(subject: OrgSubject, updates: &Value) -> Result<OrgSubject, OrgError> {
    let mut base = match serde_json::to_value(&subject)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Value::Object(updates) = updates {
        for (key, value) in updates {
            base.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::from_value(Value::Object(base))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use idchain_core::memory::{MemoryGovernance, MemoryLedger};

    fn ctx() -> OrgContext {
        OrgContext {
            ledger: Arc::new(MemoryLedger::new()),
            governance: Arc::new(MemoryGovernance::new()),
        }
    }

    fn subject() -> OrgSubject {
        OrgSubject::new("Acme S.L.", "A58818501", "ES", "idspace")
    }

    #[tokio::test]
    async fn test_create_and_load_round_trip() {
        let ctx = ctx();
        let org = Organization::create(ctx.clone(), subject()).await.unwrap();

        let loaded = Organization::load(ctx, &org.create_tx_id, &org.did)
            .await
            .unwrap();
        assert_eq!(loaded.subject, org.subject);
        assert_eq!(loaded.nodes, org.nodes);
        assert_eq!(loaded.did_document, org.did_document);
        assert!(matches!(loaded.keyring(), Err(OrgError::NoKeyRing)));
    }

    #[tokio::test]
    async fn test_load_checks_did() {
        let ctx = ctx();
        let org = Organization::create(ctx.clone(), subject()).await.unwrap();
        let result = Organization::load(ctx, &org.create_tx_id, "deadbeef").await;
        assert!(matches!(result, Err(OrgError::DidMismatch { .. })));
    }

    #[tokio::test]
    async fn test_load_rejects_non_root_transaction() {
        let ctx = ctx();
        let org = Organization::create(ctx.clone(), subject()).await.unwrap();
        // The applications chain root is a valid transaction but not an
        // identity root.
        let result = Organization::load(ctx, &org.nodes.applications, &org.did).await;
        assert!(matches!(result, Err(OrgError::NotAnIdentityRoot(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_tax_id() {
        let result = Organization::create(
            ctx(),
            OrgSubject::new("Acme S.L.", "A58818502", "ES", "idspace"),
        )
        .await;
        assert!(matches!(result, Err(OrgError::Tax(_))));
    }

    #[tokio::test]
    async fn test_save_information_overlays_on_load() {
        let ctx = ctx();
        let mut org = Organization::create(ctx.clone(), subject()).await.unwrap();
        let mut updates = Map::new();
        updates.insert("legalName".to_string(), json!("Acme Renamed S.L."));
        updates.insert("address".to_string(), json!("Calle Mayor 1"));
        org.save_information(updates).await.unwrap();

        let loaded = Organization::load(ctx, &org.create_tx_id, &org.did)
            .await
            .unwrap();
        assert_eq!(loaded.subject.legal_name, "Acme Renamed S.L.");
        assert_eq!(loaded.subject.extra["address"], "Calle Mayor 1");
        // Untouched fields survive the overlay.
        assert_eq!(loaded.subject.tax_id, "A58818501");
    }

    #[tokio::test]
    async fn test_save_did_document_updates_head() {
        let ctx = ctx();
        let mut org = Organization::create(ctx.clone(), subject()).await.unwrap();
        org.save_did_document("https://acme.example/api").await.unwrap();

        let loaded = Organization::load(ctx, &org.create_tx_id, &org.did)
            .await
            .unwrap();
        assert_eq!(
            loaded.did_document.service_endpoint(),
            Some("https://acme.example/api")
        );
    }

    #[tokio::test]
    async fn test_verified_dids_replay() {
        let ctx = ctx();
        let org = Organization::create(ctx.clone(), subject()).await.unwrap();
        org.save_verified("did-a").await.unwrap();
        org.save_verified("did-b").await.unwrap();
        assert_eq!(org.verified_dids().await.unwrap(), vec!["did-a", "did-b"]);
    }

    #[tokio::test]
    async fn test_register_records_did_and_tokens() {
        let governance = Arc::new(MemoryGovernance::new());
        let ctx = OrgContext {
            ledger: Arc::new(MemoryLedger::new()),
            governance: governance.clone(),
        };
        let org = Organization::create(ctx, subject()).await.unwrap();
        org.register(2, 1000).await.unwrap();

        let owner = org.keyring().unwrap().governance().public_hex();
        let data = org.ctx().governance.did_data(&org.did).await.unwrap();
        assert_eq!(data.owner, owner);
        assert_eq!(data.level, 2);
        assert_eq!(
            org.ctx().governance.did_document_tx(&org.did).await.unwrap(),
            org.create_tx_id
        );
        assert_eq!(governance.balance(&owner), 1000);
    }

    #[tokio::test]
    async fn test_export_import_keeps_control() {
        let ctx = ctx();
        let org = Organization::create(ctx.clone(), subject()).await.unwrap();
        let exported = org.export("pw").unwrap();

        let mut imported =
            Organization::import(ctx, &org.create_tx_id, &org.did, &exported, "pw")
                .await
                .unwrap();
        // Imported keys can still write.
        imported.save_did_document("https://acme.example/v2").await.unwrap();
    }
}
