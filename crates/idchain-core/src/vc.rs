//! Verifiable credentials with detached ed25519 proofs.
//!
//! There is no public DID resolution infrastructure here: verification
//! methods resolve against a caller-supplied [`DidDocument`], which itself
//! lives on the issuer's document chain. Proof signatures cover the JCS
//! canonicalization of the credential subject, so re-serialization cannot
//! invalidate a credential.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::key_manager::{self, Keypair, KeyManagerError};
use crate::{did_uri, utils, KEY_FRAGMENT, SERVICE_TYPE};

const CREDENTIAL_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
const PROOF_TYPE: &str = "JcsEd25519Signature2020";
const KEY_TYPE: &str = "Ed25519VerificationKey2018";

/// Capacities granted in the personal sphere; everything else is
/// professional.
const PERSONAL_CAPACITIES: [&str; 2] = ["over18", "oidc"];

/// An error relating to credential signing or verification.
#[derive(Error, Debug)]
pub enum VcError {
    /// The credential carries no proof.
    #[error("Credential has no proof.")]
    MissingProof,
    /// The proof names a verification method absent from the DID document.
    #[error("Verification method {0} not found in DID document.")]
    UnknownVerificationMethod(String),
    /// The DID document has no assertion key.
    #[error("DID document has no assertion method.")]
    MissingAssertionKey,
    /// Wrapped key manager error.
    #[error("Key error: {0}")]
    Key(#[from] KeyManagerError),
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A verification method inside a DID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_hex: String,
}

/// A service entry inside a DID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// A DID document binding a DID to its assertion key and service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    pub assertion_method: Vec<VerificationMethod>,
    pub service: Vec<Service>,
}

impl DidDocument {
    /// Builds a document for `did` with one assertion key and one service
    /// endpoint.
    pub fn new(did: &str, assertion_public_hex: &str, endpoint: &str) -> Self {
        let id = did_uri(did);
        Self {
            context: vec![DID_CONTEXT.to_string()],
            id: id.clone(),
            assertion_method: vec![VerificationMethod {
                id: format!("{id}{KEY_FRAGMENT}"),
                method_type: KEY_TYPE.to_string(),
                controller: id.clone(),
                public_key_hex: assertion_public_hex.to_string(),
            }],
            service: vec![Service {
                id: format!("{id}#service"),
                service_type: SERVICE_TYPE.to_string(),
                service_endpoint: endpoint.to_string(),
            }],
        }
    }

    /// Hex public key of the document's first assertion method.
    pub fn assertion_key(&self) -> Result<&str, VcError> {
        self.assertion_method
            .first()
            .map(|method| method.public_key_hex.as_str())
            .ok_or(VcError::MissingAssertionKey)
    }

    /// Endpoint of the identity service entry, if any.
    pub fn service_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .find(|service| service.service_type == SERVICE_TYPE)
            .map(|service| service.service_endpoint.as_str())
    }

    fn resolve_method(&self, method_id: &str) -> Option<&VerificationMethod> {
        self.assertion_method
            .iter()
            .find(|method| method.id == method_id)
    }
}

/// Detached proof over the JCS-canonical credential subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: String,
    pub verification_method: String,
    pub proof_purpose: String,
    pub signature: String,
}

/// A verifiable credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    pub issuance_date: String,
    pub credential_subject: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// Outcome of credential verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub verified: bool,
    pub error: Option<String>,
}

impl VerificationResult {
    fn ok() -> Self {
        Self {
            verified: true,
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            error: Some(reason.into()),
        }
    }
}

/// Signs a credential over `subject`, issued by `issuer_did`, proving with
/// `key`. The key must be the document's assertion key.
pub fn sign_credential(
    subject: Value,
    issuer_did: &str,
    key: &Keypair,
    document: &DidDocument,
) -> Result<Credential, VcError> {
    sign(subject, issuer_did, None, &["VerifiableCredential"], key, document)
}

/// Signs a capability credential granting `holder` the named capacity within
/// the issuer organization. Extra subject fields are merged in.
pub fn sign_capability(
    issuer_did: &str,
    holder_did: &str,
    capacity: &str,
    extra: Option<Map<String, Value>>,
    key: &Keypair,
    document: &DidDocument,
) -> Result<Credential, VcError> {
    let sphere = if PERSONAL_CAPACITIES.contains(&capacity) {
        "personal"
    } else {
        "professional"
    };
    let mut subject = extra.unwrap_or_default();
    subject.insert("capacity".to_string(), Value::String(capacity.to_string()));
    subject.insert("sphere".to_string(), Value::String(sphere.to_string()));
    subject.insert("id".to_string(), Value::String(did_uri(holder_did)));
    sign(
        Value::Object(subject),
        issuer_did,
        Some(holder_did),
        &["VerifiableCredential", "CapabilityCredential"],
        key,
        document,
    )
}

fn sign(
    subject: Value,
    issuer_did: &str,
    holder_did: Option<&str>,
    types: &[&str],
    key: &Keypair,
    document: &DidDocument,
) -> Result<Credential, VcError> {
    if document.assertion_key()? != key.public_hex() {
        return Err(VcError::MissingAssertionKey);
    }
    let signature = key.sign_canonical(&subject)?;
    Ok(Credential {
        context: vec![CREDENTIAL_CONTEXT.to_string()],
        types: types.iter().map(|t| t.to_string()).collect(),
        issuer: did_uri(issuer_did),
        holder: holder_did.map(did_uri),
        issuance_date: utils::now(),
        credential_subject: subject,
        proof: Some(Proof {
            proof_type: PROOF_TYPE.to_string(),
            created: utils::now(),
            verification_method: format!("{}{KEY_FRAGMENT}", did_uri(issuer_did)),
            proof_purpose: "assertionMethod".to_string(),
            signature,
        }),
    })
}

/// Verifies a credential against the issuer's DID document.
///
/// Checks the stated issuer, resolves the proof's verification method inside
/// the supplied document, and verifies the detached signature over the
/// canonical subject. Returns a result rather than an error for ordinary
/// verification failures; errors are reserved for malformed inputs.
pub fn verify_credential(
    credential: &Credential,
    issuer_did: &str,
    document: &DidDocument,
) -> Result<VerificationResult, VcError> {
    if credential.issuer != did_uri(issuer_did) {
        return Ok(VerificationResult::failed(format!(
            "issuer mismatch: {}",
            credential.issuer
        )));
    }
    let proof = credential.proof.as_ref().ok_or(VcError::MissingProof)?;
    let method = document
        .resolve_method(&proof.verification_method)
        .ok_or_else(|| VcError::UnknownVerificationMethod(proof.verification_method.clone()))?;
    let input = utils::canonicalize(&credential.credential_subject)?;
    let verified = key_manager::verify(&method.public_key_hex, input.as_bytes(), &proof.signature)?;
    if verified {
        Ok(VerificationResult::ok())
    } else {
        Ok(VerificationResult::failed("proof signature invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issuer() -> (String, Keypair, DidDocument) {
        let key = Keypair::generate();
        let did = "a1b2c3".to_string();
        let document = DidDocument::new(&did, &key.public_hex(), "https://org.example/api");
        (did, key, document)
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let (did, key, document) = issuer();
        let credential = sign_credential(
            json!({"legalName": "Acme S.L.", "network": "idspace"}),
            &did,
            &key,
            &document,
        )
        .unwrap();

        // Survives serialization with re-ordered keys.
        let text = serde_json::to_string(&credential).unwrap();
        let parsed: Credential = serde_json::from_str(&text).unwrap();
        let result = verify_credential(&parsed, &did, &document).unwrap();
        assert!(result.verified, "{:?}", result.error);
    }

    #[test]
    fn test_tampered_subject_fails() {
        let (did, key, document) = issuer();
        let mut credential =
            sign_credential(json!({"legalName": "Acme S.L."}), &did, &key, &document).unwrap();
        credential.credential_subject["legalName"] = json!("Evil S.L.");
        let result = verify_credential(&credential, &did, &document).unwrap();
        assert!(!result.verified);
    }

    #[test]
    fn test_signature_bit_flip_fails() {
        let (did, key, document) = issuer();
        let mut credential =
            sign_credential(json!({"legalName": "Acme S.L."}), &did, &key, &document).unwrap();
        let proof = credential.proof.as_mut().unwrap();
        let mut bytes = hex::decode(&proof.signature).unwrap();
        bytes[0] ^= 0x01;
        proof.signature = hex::encode(bytes);
        let result = verify_credential(&credential, &did, &document).unwrap();
        assert!(!result.verified);
    }

    #[test]
    fn test_wrong_issuer_fails() {
        let (did, key, document) = issuer();
        let credential =
            sign_credential(json!({"legalName": "Acme S.L."}), &did, &key, &document).unwrap();
        let result = verify_credential(&credential, "deadbeef", &document).unwrap();
        assert!(!result.verified);
    }

    #[test]
    fn test_missing_proof_is_an_error() {
        let (did, key, document) = issuer();
        let mut credential =
            sign_credential(json!({"x": 1}), &did, &key, &document).unwrap();
        credential.proof = None;
        assert!(matches!(
            verify_credential(&credential, &did, &document),
            Err(VcError::MissingProof)
        ));
    }

    #[test]
    fn test_capability_sphere() {
        let (did, key, document) = issuer();
        let admin = sign_capability(&did, "p1", "admin", None, &key, &document).unwrap();
        assert_eq!(admin.credential_subject["sphere"], "professional");
        assert_eq!(admin.credential_subject["capacity"], "admin");
        assert_eq!(admin.holder.as_deref(), Some("did:idchain:p1"));

        let over18 = sign_capability(&did, "p1", "over18", None, &key, &document).unwrap();
        assert_eq!(over18.credential_subject["sphere"], "personal");
    }

    #[test]
    fn test_signing_with_foreign_key_rejected() {
        let (did, _key, document) = issuer();
        let other = Keypair::generate();
        assert!(matches!(
            sign_credential(json!({}), &did, &other, &document),
            Err(VcError::MissingAssertionKey)
        ));
    }
}
