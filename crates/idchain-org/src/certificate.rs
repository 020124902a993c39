//! The certificate registry: definitions, issuances and acceptances.
//!
//! Issuance is dual-entry. The issuer records on its own issued chain; the
//! holder records acceptance on its own accepted chain. Neither side can
//! write the other's ledger state, so `search_incoming` joins the two views
//! and tolerates the window where an issuance is visible before the holder
//! has reacted.
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use idchain_core::chain::{AssetChain, ChainError};
use idchain_core::ledger::LedgerError;
use idchain_core::payload::{Payload, TxType};

use crate::application::{self, KEY_ROTATION_MARKER};
use crate::organization::{OrgError, Organization};

/// An error relating to the certificate registry.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// The organization has no certificate registry yet.
    #[error("Organization has no certificate registry.")]
    NoRegistry,
    /// The organization already has a certificate registry.
    #[error("Organization already has a certificate registry.")]
    AlreadyBootstrapped,
    /// The certificate id does not match any definition.
    #[error("Unknown certificate: {0}.")]
    UnknownCertificate(String),
    /// Wrapped organization error.
    #[error(transparent)]
    Org(#[from] OrgError),
    /// Wrapped chain error.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Wrapped ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Schema.org-flavoured achievement description backing a certificate
/// definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    #[serde(rename = "@type")]
    pub achievement_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_achievement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
}

impl Achievement {
    pub fn new(title: &str) -> Self {
        Self {
            achievement_type: "Achievement".to_string(),
            title: title.to_string(),
            description: None,
            url: None,
            issuer: None,
            learning_achievement: None,
            course: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn issuer(mut self, did: &str) -> Self {
        self.issuer = Some(did.to_string());
        self
    }

    pub fn learning_achievement(mut self, name: &str) -> Self {
        self.learning_achievement = Some(name.to_string());
        self
    }

    pub fn course(mut self, course: &str) -> Self {
        self.course = Some(course.to_string());
        self
    }
}

/// A replayed certificate definition. The certificate id is the ledger
/// transaction id of the definition entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateDefinition {
    pub certificate_id: String,
    pub achievement: Achievement,
    pub datetime: String,
}

/// Issuance status recorded by the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Issued,
    Revoked,
}

/// Acceptance status recorded by the holder. `NotAccepted` is the default
/// for issuances the holder has not reacted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptStatus {
    NotAccepted,
    Accepted,
    Rejected,
}

/// One replayed issuance or acceptance record.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceRecord {
    pub certificate_id: String,
    pub did: String,
    pub status: Value,
    pub datetime: String,
}

/// Which side of the dual-entry history to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySide {
    Issued,
    Accepted,
}

/// An issuance found by a ledger-wide search, joined with the local
/// acceptance state.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCertificate {
    pub certificate_id: String,
    pub issuer: String,
    pub status: IssueStatus,
    pub acceptance: AcceptStatus,
}

/// Ids of the registry's three chains.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryNodes {
    pub definitions: String,
    pub issued: String,
    pub accepted: String,
}

/// An organization's certificate registry.
pub struct CertificateRegistry {
    pub nodes: RegistryNodes,
}

impl CertificateRegistry {
    /// Creates the registry chains and announces them on the applications
    /// chain. Fails if the organization already announced a registry.
    pub async fn bootstrap(org: &mut Organization) -> Result<Self, CertificateError> {
        if application::find_by_type(&org.applications, TxType::Tags).is_some() {
            return Err(CertificateError::AlreadyBootstrapped);
        }
        let definitions = org
            .create_chain(json!({"type": u8::from(TxType::Tags), "did": &org.did, "role": "definitions"}))
            .await?;
        let issued = org
            .create_chain(json!({"type": u8::from(TxType::Tags), "did": &org.did, "role": "issued"}))
            .await?;
        let accepted = org
            .create_chain(json!({"type": u8::from(TxType::Tags), "did": &org.did, "role": "accepted"}))
            .await?;
        org.announce_application(
            TxType::Tags,
            json!({"definitions": &definitions, "issued": &issued, "accepted": &accepted}),
        )
        .await?;
        debug!("Bootstrapped certificate registry for {}", org.did);
        Ok(Self {
            nodes: RegistryNodes {
                definitions,
                issued,
                accepted,
            },
        })
    }

    /// Opens an existing registry from the organization's application list.
    pub fn open(org: &Organization) -> Result<Self, CertificateError> {
        let entry = application::find_by_type(&org.applications, TxType::Tags)
            .ok_or(CertificateError::NoRegistry)?;
        let chain_id = |key: &str| {
            entry
                .chain_id(key)
                .map(str::to_string)
                .ok_or(CertificateError::NoRegistry)
        };
        Ok(Self {
            nodes: RegistryNodes {
                definitions: chain_id("definitions")?,
                issued: chain_id("issued")?,
                accepted: chain_id("accepted")?,
            },
        })
    }

    /// Defines a new certificate and returns its id.
    pub async fn define(
        &self,
        org: &Organization,
        achievement: Achievement,
    ) -> Result<String, CertificateError> {
        let tx_id = org
            .append_payload(
                &self.nodes.definitions,
                Payload::new(TxType::TagType, serde_json::to_value(&achievement)?),
            )
            .await?;
        Ok(tx_id)
    }

    /// Replays all certificate definitions.
    pub async fn definitions(
        &self,
        org: &Organization,
    ) -> Result<Vec<CertificateDefinition>, CertificateError> {
        let chain = AssetChain::new(&*org.ctx().ledger);
        let history = chain.history(&self.nodes.definitions).await?;
        let mut definitions = Vec::new();
        for entry in &history {
            let Some(payload) = &entry.metadata else { continue };
            if payload.subject.get(KEY_ROTATION_MARKER).is_some() {
                continue;
            }
            definitions.push(CertificateDefinition {
                certificate_id: entry.id.clone(),
                achievement: serde_json::from_value(payload.subject.clone())?,
                datetime: payload.datetime.clone(),
            });
        }
        Ok(definitions)
    }

    /// Issues (or revokes) a defined certificate to a holder DID. The
    /// certificate must exist in the definitions replay before anything is
    /// written.
    pub async fn issue(
        &self,
        org: &Organization,
        certificate_id: &str,
        holder_did: &str,
        revoke: bool,
    ) -> Result<(), CertificateError> {
        let known = self
            .definitions(org)
            .await?
            .iter()
            .any(|definition| definition.certificate_id == certificate_id);
        if !known {
            return Err(CertificateError::UnknownCertificate(
                certificate_id.to_string(),
            ));
        }
        let status = if revoke {
            IssueStatus::Revoked
        } else {
            IssueStatus::Issued
        };
        org.append_payload(
            &self.nodes.issued,
            Payload::new(
                TxType::Issued,
                json!({
                    "certificateId": certificate_id,
                    "holder": holder_did,
                    "issuer": &org.did,
                    "status": status,
                }),
            ),
        )
        .await?;
        Ok(())
    }

    /// Records the holder's reaction to an incoming certificate on its own
    /// accepted chain.
    pub async fn accept(
        &self,
        org: &Organization,
        certificate_id: &str,
        issuer_did: &str,
        accept: bool,
    ) -> Result<(), CertificateError> {
        let status = if accept {
            AcceptStatus::Accepted
        } else {
            AcceptStatus::Rejected
        };
        org.append_payload(
            &self.nodes.accepted,
            Payload::new(
                TxType::Issued,
                json!({
                    "certificateId": certificate_id,
                    "holder": &org.did,
                    "issuer": issuer_did,
                    "status": status,
                }),
            ),
        )
        .await?;
        Ok(())
    }

    /// Replays one side's records for a certificate, oldest first.
    pub async fn issuance_history(
        &self,
        org: &Organization,
        certificate_id: &str,
        side: RegistrySide,
    ) -> Result<Vec<IssuanceRecord>, CertificateError> {
        let chain_id = match side {
            RegistrySide::Issued => &self.nodes.issued,
            RegistrySide::Accepted => &self.nodes.accepted,
        };
        let chain = AssetChain::new(&*org.ctx().ledger);
        let history = chain.history(chain_id).await?;
        Ok(history
            .iter()
            .filter_map(|entry| entry.metadata.as_ref())
            .filter(|payload| payload.subject.get(KEY_ROTATION_MARKER).is_none())
            .filter(|payload| {
                payload.subject.get("certificateId").and_then(Value::as_str)
                    == Some(certificate_id)
            })
            .map(|payload| IssuanceRecord {
                certificate_id: certificate_id.to_string(),
                did: match side {
                    RegistrySide::Issued => subject_str(&payload.subject, "holder"),
                    RegistrySide::Accepted => subject_str(&payload.subject, "issuer"),
                },
                status: payload.subject.get("status").cloned().unwrap_or(Value::Null),
                datetime: payload.datetime.clone(),
            })
            .collect())
    }

    /// Searches the whole ledger for certificates issued to this
    /// organization and joins them with the local acceptance state.
    ///
    /// For each (issuer, certificate) pair the most recent issuer record
    /// wins. Issuances the holder has not reacted to report
    /// [`AcceptStatus::NotAccepted`]; a just-landed issuance may briefly
    /// appear here before the holder's acceptance does.
    pub async fn search_incoming(
        &self,
        org: &Organization,
    ) -> Result<Vec<IncomingCertificate>, CertificateError> {
        let chain = AssetChain::new(&*org.ctx().ledger);
        let hits = chain.search_by_reference(&org.did).await?;

        // Search results carry no ordering guarantee, so only take the
        // issuer chains from the hits and replay each one in commit order.
        let mut issuer_chains: Vec<String> = Vec::new();
        for entry in &hits {
            if incoming_record(&entry.metadata, &org.did).is_some()
                && !issuer_chains.contains(&entry.chain_id)
            {
                issuer_chains.push(entry.chain_id.clone());
            }
        }

        // Latest issuer-side status per (issuer, certificate).
        let mut incoming: Vec<IncomingCertificate> = Vec::new();
        for chain_id in &issuer_chains {
            for entry in &chain.history(chain_id).await? {
                let Some((issuer, certificate_id, status)) =
                    incoming_record(&entry.metadata, &org.did)
                else {
                    continue;
                };
                match incoming
                    .iter_mut()
                    .find(|c| c.certificate_id == certificate_id && c.issuer == issuer)
                {
                    Some(existing) => existing.status = status,
                    None => incoming.push(IncomingCertificate {
                        certificate_id,
                        issuer,
                        status,
                        acceptance: AcceptStatus::NotAccepted,
                    }),
                }
            }
        }

        // Join the local acceptance state.
        let accepted = chain.history(&self.nodes.accepted).await?;
        for entry in &accepted {
            let Some(payload) = &entry.metadata else { continue };
            if payload.subject.get(KEY_ROTATION_MARKER).is_some() {
                continue;
            }
            let certificate_id = subject_str(&payload.subject, "certificateId");
            let issuer = subject_str(&payload.subject, "issuer");
            let Ok(acceptance) = serde_json::from_value::<AcceptStatus>(
                payload.subject.get("status").cloned().unwrap_or(Value::Null),
            ) else {
                continue;
            };
            if let Some(existing) = incoming
                .iter_mut()
                .find(|c| c.certificate_id == certificate_id && c.issuer == issuer)
            {
                existing.acceptance = acceptance;
            }
        }
        Ok(incoming)
    }
}

/// Parses an issuer-side record naming `holder_did` as holder. Acceptance
/// records and the holder's own issuances do not qualify.
fn incoming_record(
    metadata: &Option<Payload>,
    holder_did: &str,
) -> Option<(String, String, IssueStatus)> {
    let payload = metadata.as_ref()?;
    if payload.tx_type != TxType::Issued {
        return None;
    }
    if payload.subject.get("holder").and_then(Value::as_str) != Some(holder_did) {
        return None;
    }
    let issuer = subject_str(&payload.subject, "issuer");
    if issuer == holder_did {
        // Own acceptance records also name this DID as holder.
        return None;
    }
    let status = serde_json::from_value::<IssueStatus>(
        payload.subject.get("status").cloned().unwrap_or(Value::Null),
    )
    .ok()?;
    Some((issuer, subject_str(&payload.subject, "certificateId"), status))
}

fn subject_str(subject: &Value, key: &str) -> String {
    subject
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::{OrgContext, OrgSubject};
    use async_trait::async_trait;
    use idchain_core::ledger::{Ledger, LedgerEntry};
    use idchain_core::memory::{MemoryGovernance, MemoryLedger};
    use std::sync::Arc;

    /// Ledger whose metadata search returns hits newest-first. The search
    /// contract promises no ordering, so results must not depend on it.
    struct ReversedSearchLedger {
        inner: MemoryLedger,
    }

    #[async_trait]
    impl Ledger for ReversedSearchLedger {
        async fn create_asset(
            &self,
            owner_public: &str,
            asset: Value,
            signature: &str,
        ) -> Result<String, LedgerError> {
            self.inner.create_asset(owner_public, asset, signature).await
        }

        async fn transfer_asset(
            &self,
            consumed_tx_id: &str,
            metadata: Payload,
            new_owner: &str,
            signature: &str,
        ) -> Result<String, LedgerError> {
            self.inner
                .transfer_asset(consumed_tx_id, metadata, new_owner, signature)
                .await
        }

        async fn get_transaction(&self, tx_id: &str) -> Result<LedgerEntry, LedgerError> {
            self.inner.get_transaction(tx_id).await
        }

        async fn get_last_transaction(&self, chain_id: &str) -> Result<LedgerEntry, LedgerError> {
            self.inner.get_last_transaction(chain_id).await
        }

        async fn list_transactions(&self, chain_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
            self.inner.list_transactions(chain_id).await
        }

        async fn search_metadata(&self, text: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
            let mut hits = self.inner.search_metadata(text).await?;
            hits.reverse();
            Ok(hits)
        }
    }

    async fn org(ctx: &OrgContext, name: &str) -> Organization {
        Organization::create(
            ctx.clone(),
            OrgSubject::new(name, "A58818501", "ES", "idspace"),
        )
        .await
        .unwrap()
    }

    fn ctx() -> OrgContext {
        OrgContext {
            ledger: Arc::new(MemoryLedger::new()),
            governance: Arc::new(MemoryGovernance::new()),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_is_guarded() {
        let ctx = ctx();
        let mut org = org(&ctx, "Issuer S.L.").await;
        CertificateRegistry::bootstrap(&mut org).await.unwrap();
        assert!(matches!(
            CertificateRegistry::bootstrap(&mut org).await,
            Err(CertificateError::AlreadyBootstrapped)
        ));
        // Open finds the announced registry.
        assert!(CertificateRegistry::open(&org).is_ok());
    }

    #[tokio::test]
    async fn test_open_without_registry() {
        let ctx = ctx();
        let org = org(&ctx, "Issuer S.L.").await;
        assert!(matches!(
            CertificateRegistry::open(&org),
            Err(CertificateError::NoRegistry)
        ));
    }

    #[tokio::test]
    async fn test_define_and_replay() {
        let ctx = ctx();
        let mut org = org(&ctx, "Issuer S.L.").await;
        let registry = CertificateRegistry::bootstrap(&mut org).await.unwrap();

        let id = registry
            .define(&org, Achievement::new("Rust 101").course("RUST-101"))
            .await
            .unwrap();
        let definitions = registry.definitions(&org).await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].certificate_id, id);
        assert_eq!(definitions[0].achievement.title, "Rust 101");
    }

    #[tokio::test]
    async fn test_issue_requires_known_certificate() {
        let ctx = ctx();
        let mut org = org(&ctx, "Issuer S.L.").await;
        let registry = CertificateRegistry::bootstrap(&mut org).await.unwrap();
        let result = registry.issue(&org, "no-such-id", "did-p", false).await;
        assert!(matches!(result, Err(CertificateError::UnknownCertificate(_))));

        // Nothing was written to the issued chain.
        let history = registry
            .issuance_history(&org, "no-such-id", RegistrySide::Issued)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_double_issue_reads_as_one_certificate() {
        let ctx = ctx();
        let mut issuer = org(&ctx, "Issuer S.L.").await;
        let mut holder = org(&ctx, "Holder S.L.").await;
        let issuer_registry = CertificateRegistry::bootstrap(&mut issuer).await.unwrap();
        let holder_registry = CertificateRegistry::bootstrap(&mut holder).await.unwrap();

        let id = issuer_registry
            .define(&issuer, Achievement::new("Rust 101"))
            .await
            .unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, false).await.unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, false).await.unwrap();

        // Both entries are in the history, but the incoming view collapses
        // them to one certificate.
        let history = issuer_registry
            .issuance_history(&issuer, &id, RegistrySide::Issued)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);

        let incoming = holder_registry.search_incoming(&holder).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].status, IssueStatus::Issued);
        assert_eq!(incoming[0].acceptance, AcceptStatus::NotAccepted);
    }

    #[tokio::test]
    async fn test_status_survives_unordered_search_results() {
        let ctx = OrgContext {
            ledger: Arc::new(ReversedSearchLedger {
                inner: MemoryLedger::new(),
            }),
            governance: Arc::new(MemoryGovernance::new()),
        };
        let mut issuer = org(&ctx, "Issuer S.L.").await;
        let mut holder = org(&ctx, "Holder S.L.").await;
        let issuer_registry = CertificateRegistry::bootstrap(&mut issuer).await.unwrap();
        let holder_registry = CertificateRegistry::bootstrap(&mut holder).await.unwrap();

        let id = issuer_registry
            .define(&issuer, Achievement::new("Rust 101"))
            .await
            .unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, false).await.unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, true).await.unwrap();

        // Newest-first hits must not resurrect the revoked issuance.
        let incoming = holder_registry.search_incoming(&holder).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].status, IssueStatus::Revoked);
    }

    #[tokio::test]
    async fn test_revocation_wins_and_acceptance_joins() {
        let ctx = ctx();
        let mut issuer = org(&ctx, "Issuer S.L.").await;
        let mut holder = org(&ctx, "Holder S.L.").await;
        let issuer_registry = CertificateRegistry::bootstrap(&mut issuer).await.unwrap();
        let holder_registry = CertificateRegistry::bootstrap(&mut holder).await.unwrap();

        let id = issuer_registry
            .define(&issuer, Achievement::new("Rust 101"))
            .await
            .unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, false).await.unwrap();
        holder_registry.accept(&holder, &id, &issuer.did, true).await.unwrap();
        issuer_registry.issue(&issuer, &id, &holder.did, true).await.unwrap();

        let incoming = holder_registry.search_incoming(&holder).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].status, IssueStatus::Revoked);
        assert_eq!(incoming[0].acceptance, AcceptStatus::Accepted);
    }
}
