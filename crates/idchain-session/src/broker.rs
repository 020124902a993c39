//! The client-side session broker (wallet).
//!
//! The broker holds one peer DID per organization, the capability
//! credentials collected from claims, and the state of each relationship.
//! All network traffic goes through the [`SessionTransport`] seam.
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use idchain_core::config;
use idchain_core::key_manager::{Keypair, KeyManagerError};
use idchain_core::utils;
use idchain_core::vc::Credential;

use crate::connection::{ConnectionError, ConnectionString};
use crate::transport::{
    SessionError, SessionTransport, SessionUpdate, WaitResponse,
};

/// Capacity whose login carries no credential: it asserts only the peer DID
/// itself.
pub const PEER_DID_CAPACITY: &str = "peerdid";

/// An error relating to the session broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The service rejected the secret or the signature. Nothing was stored.
    #[error("Session claim not authorized.")]
    Unauthorized,
    /// A connection to this organization already exists.
    #[error("Already connected to organization {0}.")]
    AlreadyConnected(String),
    /// No connection to this organization.
    #[error("Not connected to organization {0}.")]
    NotConnected(String),
    /// No held credential grants the requested capacity.
    #[error("No credential for capacity {capacity} at organization {did}.")]
    NoCredential { did: String, capacity: String },
    /// Wrapped transport error.
    #[error(transparent)]
    Session(SessionError),
    /// Wrapped connection string error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Wrapped key manager error.
    #[error(transparent)]
    Key(#[from] KeyManagerError),
}

impl From<SessionError> for BrokerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized => BrokerError::Unauthorized,
            other => BrokerError::Session(other),
        }
    }
}

/// An organization the broker can talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub did: String,
    pub endpoint: String,
}

/// State of the relationship with one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Requested,
    Claimed,
    Authenticated,
}

/// A held capability credential, keyed by the hash id the service assigned.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub hash_id: String,
    pub org_did: String,
    pub peer_did: String,
    pub credential: Credential,
}

struct Connection {
    endpoint: String,
    governance: Keypair,
}

/// A bearer-scoped handle to one organization's API, produced by a
/// successful login. Owns its transport handle, so it outlives further
/// broker activity.
pub struct ScopedClient<T: SessionTransport> {
    transport: Arc<T>,
    endpoint: String,
    token: String,
}

impl<T: SessionTransport> ScopedClient<T> {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bearer-authorized GET against the organization's API.
    pub async fn get(&self, path: &str) -> Result<serde_json::Value, BrokerError> {
        Ok(self.transport.get(&self.endpoint, path, &self.token).await?)
    }
}

/// The wallet: peer DIDs, credentials and sessions per organization.
pub struct SessionBroker<T: SessionTransport> {
    transport: Arc<T>,
    network: String,
    connections: HashMap<String, Connection>,
    credentials: Vec<StoredCredential>,
    states: HashMap<String, SessionState>,
}

impl<T: SessionTransport> SessionBroker<T> {
    pub fn new(transport: T, network: &str) -> Self {
        Self {
            transport: Arc::new(transport),
            network: network.to_string(),
            connections: HashMap::new(),
            credentials: Vec::new(),
            states: HashMap::new(),
        }
    }

    /// Broker on the network named by the core configuration.
    pub fn from_config(transport: T) -> Self {
        Self::new(transport, &config::core_config().network)
    }

    /// State of the relationship with an organization.
    pub fn session_state(&self, org_did: &str) -> SessionState {
        *self.states.get(org_did).unwrap_or(&SessionState::NoSession)
    }

    /// Peer DID used with an organization, if connected.
    pub fn peer_did(&self, org_did: &str) -> Option<String> {
        self.connections
            .get(org_did)
            .map(|connection| connection.governance.public_hex())
    }

    /// Credentials held by the wallet.
    pub fn credentials(&self) -> &[StoredCredential] {
        &self.credentials
    }

    /// The held credential granting `capacity` at an organization.
    pub fn find_credential(&self, org_did: &str, capacity: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|stored| {
                stored.org_did == org_did
                    && stored.credential.credential_subject.get("capacity")
                        == Some(&serde_json::Value::String(capacity.to_string()))
            })
            .map(|stored| &stored.credential)
    }

    /// Opens a session at a peer and renders its connection string.
    pub async fn open_session(
        &mut self,
        peer: &Peer,
        capacity: &str,
    ) -> Result<(String, ConnectionString), BrokerError> {
        let opened = self.transport.open_session(&peer.endpoint, capacity).await?;
        self.states
            .insert(peer.did.clone(), SessionState::Requested);
        let connection =
            ConnectionString::new(&opened.session_id, &peer.did, &self.network);
        Ok((opened.session_id, connection))
    }

    /// Claims an open session with the out-of-band secret, establishing a
    /// fresh peer DID with the organization.
    ///
    /// On rejection nothing is stored; the wallet state is as if the claim
    /// never happened. Returns the new peer DID.
    pub async fn claim(
        &mut self,
        peer: &Peer,
        session_id: &str,
        secret: &str,
    ) -> Result<String, BrokerError> {
        if self.connections.contains_key(&peer.did) {
            return Err(BrokerError::AlreadyConnected(peer.did.clone()));
        }
        let governance = Keypair::generate();
        let peer_did = governance.public_hex();
        let update = SessionUpdate {
            action: "register".to_string(),
            session_id: session_id.to_string(),
            peer_did: peer_did.clone(),
            signature: governance.sign_hex(session_id.as_bytes()),
            secret: Some(secret.to_string()),
            challenge: Some(random_challenge()),
            capacity: None,
            credential: None,
        };
        let response = self.transport.register_session(&peer.endpoint, update).await?;

        self.connections.insert(
            peer.did.clone(),
            Connection {
                endpoint: peer.endpoint.clone(),
                governance,
            },
        );
        self.credentials.push(StoredCredential {
            hash_id: response.hash_id,
            org_did: peer.did.clone(),
            peer_did: peer_did.clone(),
            credential: response.signed_credential,
        });
        self.states.insert(peer.did.clone(), SessionState::Claimed);
        info!("Claimed session with {} as {}", peer.did, peer_did);
        Ok(peer_did)
    }

    /// Claims a session described by a connection string.
    pub async fn claim_with_connection_string(
        &mut self,
        connection_string: &str,
        endpoint: &str,
        secret: &str,
    ) -> Result<String, BrokerError> {
        let parsed = ConnectionString::from_str(connection_string)?;
        let peer = Peer {
            did: parsed.did,
            endpoint: endpoint.to_string(),
        };
        self.claim(&peer, &parsed.session_id, secret).await
    }

    /// Logs in to a connected organization for a capacity, opening a fresh
    /// session first.
    pub async fn login(
        &mut self,
        org_did: &str,
        capacity: &str,
    ) -> Result<ScopedClient<T>, BrokerError> {
        let endpoint = self
            .connections
            .get(org_did)
            .ok_or_else(|| BrokerError::NotConnected(org_did.to_string()))?
            .endpoint
            .clone();
        let opened = self.transport.open_session(&endpoint, capacity).await?;
        self.login_with_session(org_did, capacity, &opened.session_id)
            .await
    }

    /// Logs in on an already-open session.
    pub async fn login_with_session(
        &mut self,
        org_did: &str,
        capacity: &str,
        session_id: &str,
    ) -> Result<ScopedClient<T>, BrokerError> {
        let connection = self
            .connections
            .get(org_did)
            .ok_or_else(|| BrokerError::NotConnected(org_did.to_string()))?;
        // The peer DID itself needs no credential; every other capacity
        // attaches the matching held credential.
        let credential = if capacity == PEER_DID_CAPACITY {
            None
        } else {
            Some(
                self.find_credential(org_did, capacity)
                    .ok_or_else(|| BrokerError::NoCredential {
                        did: org_did.to_string(),
                        capacity: capacity.to_string(),
                    })?
                    .clone(),
            )
        };
        let update = SessionUpdate {
            action: "login".to_string(),
            session_id: session_id.to_string(),
            peer_did: connection.governance.public_hex(),
            signature: connection.governance.sign_hex(session_id.as_bytes()),
            secret: None,
            challenge: None,
            capacity: Some(capacity.to_string()),
            credential,
        };
        let endpoint = connection.endpoint.clone();
        let response = self.transport.login_session(&endpoint, update).await?;
        self.states
            .insert(org_did.to_string(), SessionState::Authenticated);
        debug!("Authenticated with {} for {}", org_did, capacity);
        Ok(ScopedClient {
            transport: Arc::clone(&self.transport),
            endpoint,
            token: response.token_api,
        })
    }

    /// Logs in to a session described by a connection string. The
    /// organization must already be connected.
    pub async fn login_with_connection_string(
        &mut self,
        connection_string: &str,
        capacity: &str,
    ) -> Result<ScopedClient<T>, BrokerError> {
        let parsed = ConnectionString::from_str(connection_string)?;
        self.login_with_session(&parsed.did, capacity, &parsed.session_id)
            .await
    }

    /// One long-poll until a session is claimed. No internal timeout.
    pub async fn wait_session(
        &self,
        peer: &Peer,
        session_id: &str,
    ) -> Result<WaitResponse, BrokerError> {
        Ok(self
            .transport
            .wait_session(&peer.endpoint, session_id)
            .await?)
    }
}

fn random_challenge() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    utils::hash(&hex::encode(bytes))
}
