//! The integrity log: anchored hashes of arbitrary documents.
//!
//! Each record stores a subject alongside the SHA-256 digest of its JCS
//! canonicalization, so a reader can both inspect what was anchored and
//! re-check the digest against an out-of-band copy.
use serde_json::{json, Value};
use thiserror::Error;

use idchain_core::chain::{AssetChain, ChainError};
use idchain_core::payload::{Payload, TxType};
use idchain_core::utils;

use crate::application::{self, KEY_ROTATION_MARKER};
use crate::organization::{OrgError, Organization};

/// An error relating to the integrity log.
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// The organization has no integrity log yet.
    #[error("Organization has no integrity log.")]
    NoLog,
    /// Wrapped organization error.
    #[error(transparent)]
    Org(#[from] OrgError),
    /// Wrapped chain error.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One anchored hash record.
#[derive(Debug, Clone, PartialEq)]
pub struct HashRecord {
    pub hash: String,
    pub subject: Value,
    pub datetime: String,
}

/// An organization's integrity log.
pub struct IntegrityLog {
    chain_id: String,
}

impl IntegrityLog {
    /// Opens the organization's integrity log, creating and announcing it if
    /// absent.
    pub async fn ensure(org: &mut Organization) -> Result<Self, IntegrityError> {
        if let Ok(log) = Self::open(org) {
            return Ok(log);
        }
        let chain_id = org
            .create_chain(json!({"type": u8::from(TxType::Integrity), "did": &org.did}))
            .await?;
        org.announce_application(TxType::Integrity, json!({"hashes": &chain_id}))
            .await?;
        Ok(Self { chain_id })
    }

    /// Opens an existing integrity log.
    pub fn open(org: &Organization) -> Result<Self, IntegrityError> {
        let entry = application::find_by_type(&org.applications, TxType::Integrity)
            .ok_or(IntegrityError::NoLog)?;
        let chain_id = entry
            .chain_id("hashes")
            .map(str::to_string)
            .ok_or(IntegrityError::NoLog)?;
        Ok(Self { chain_id })
    }

    /// Anchors a subject's digest and returns the digest.
    pub async fn save_hash(
        &self,
        org: &Organization,
        subject: Value,
    ) -> Result<String, IntegrityError> {
        let hash = utils::hash(&utils::canonicalize(&subject)?);
        org.append_payload(
            &self.chain_id,
            Payload::new(TxType::Hash, json!({"hash": &hash, "subject": subject})),
        )
        .await?;
        Ok(hash)
    }

    /// Replays all anchored records, oldest first.
    pub async fn hashes(&self, org: &Organization) -> Result<Vec<HashRecord>, IntegrityError> {
        let chain = AssetChain::new(&*org.ctx().ledger);
        let history = chain.history(&self.chain_id).await?;
        Ok(history
            .iter()
            .filter_map(|entry| entry.metadata.as_ref())
            .filter(|payload| payload.subject.get(KEY_ROTATION_MARKER).is_none())
            .map(|payload| HashRecord {
                hash: payload
                    .subject
                    .get("hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                subject: payload.subject.get("subject").cloned().unwrap_or(Value::Null),
                datetime: payload.datetime.clone(),
            })
            .collect())
    }
}
