//! API traits with default implementations over the organization and
//! credential layers.
use async_trait::async_trait;
use serde_json::{Map, Value};

use idchain_core::key_manager::Keypair;
use idchain_core::vc::{self, Credential, DidDocument, VerificationResult};
use idchain_org::certificate::{Achievement, CertificateRegistry};
use idchain_org::organization::{OrgContext, Organization, OrgSubject};

use crate::errors::ApiError;

/// API for organization lifecycle operations.
#[async_trait]
pub trait OrganizationAPI {
    /// Creates an organization with fresh keys and its satellite chains.
    async fn create_organization(
        ctx: OrgContext,
        subject: OrgSubject,
    ) -> Result<Organization, ApiError> {
        Ok(Organization::create(ctx, subject).await?)
    }

    /// Loads an organization read-only from its identity root.
    async fn load_organization(
        ctx: OrgContext,
        create_tx_id: &str,
        did: &str,
    ) -> Result<Organization, ApiError> {
        Ok(Organization::load(ctx, create_tx_id, did).await?)
    }

    /// Registers an organization's DID on the governance chain.
    async fn register_organization(
        org: &Organization,
        level: u16,
        tokens: u128,
    ) -> Result<(), ApiError> {
        Ok(org.register(level, tokens).await?)
    }

    /// Opens (bootstrapping if absent) the organization's certificate
    /// registry and defines a certificate in it.
    async fn define_certificate(
        org: &mut Organization,
        achievement: Achievement,
    ) -> Result<String, ApiError> {
        let registry = match CertificateRegistry::open(org) {
            Ok(registry) => registry,
            Err(_) => CertificateRegistry::bootstrap(org).await?,
        };
        Ok(registry.define(org, achievement).await?)
    }
}

/// API for signing and verifying credentials.
pub trait CredentialAPI {
    /// Signs a credential over a subject.
    fn sign_credential(
        subject: Value,
        issuer_did: &str,
        key: &Keypair,
        document: &DidDocument,
    ) -> Result<Credential, ApiError> {
        Ok(vc::sign_credential(subject, issuer_did, key, document)?)
    }

    /// Verifies a credential against the issuer's DID document.
    fn verify_credential(
        credential: &Credential,
        issuer_did: &str,
        document: &DidDocument,
    ) -> Result<VerificationResult, ApiError> {
        Ok(vc::verify_credential(credential, issuer_did, document)?)
    }

    /// Signs a capability credential for a holder DID.
    fn sign_capability(
        issuer_did: &str,
        holder_did: &str,
        capacity: &str,
        extra: Option<Map<String, Value>>,
        key: &Keypair,
        document: &DidDocument,
    ) -> Result<Credential, ApiError> {
        Ok(vc::sign_capability(
            issuer_did, holder_did, capacity, extra, key, document,
        )?)
    }
}

/// Unit struct implementing the API traits.
pub struct IdchainAPI;

impl OrganizationAPI for IdchainAPI {}
impl CredentialAPI for IdchainAPI {}
