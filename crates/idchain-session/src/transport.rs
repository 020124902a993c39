//! The session transport boundary: wire types and the HTTP client talking to
//! an organization's identity service.
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use idchain_core::vc::Credential;

/// An error at the session transport boundary.
///
/// A 401 maps to the single [`SessionError::Unauthorized`] regardless of
/// which check failed server-side, so the client cannot be used as an oracle
/// for secrets versus signatures.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The service rejected the secret or the signature.
    #[error("Session request not authorized.")]
    Unauthorized,
    /// No session with the given id.
    #[error("Unknown session: {0}.")]
    UnknownSession(String),
    /// Transport-level failure.
    #[error("Session transport failure: {0}.")]
    Transport(String),
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// Reply to opening a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpened {
    pub session_id: String,
}

/// A wallet's claim or login submission on an open session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub action: String,
    pub session_id: String,
    /// Governance public key of the wallet's fresh peer DID.
    pub peer_did: String,
    /// Signature over the session id under the peer DID key.
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

/// Reply to a successful claim: the capability credential minted for the
/// wallet's peer DID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub hash_id: String,
    pub signed_credential: Credential,
}

/// Reply to a successful login: a bearer token scoped to the session's
/// capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token_api: String,
}

/// Reply to a session wait: the claimer's peer DID once the claim lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitResponse {
    pub peer_did: String,
    pub token_api: String,
}

/// Asynchronous client for an organization's session endpoints.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// `POST auth/session`: opens a session for a capacity.
    async fn open_session(
        &self,
        endpoint: &str,
        capacity: &str,
    ) -> Result<SessionOpened, SessionError>;

    /// `PUT auth/session` with a register action: claims the session.
    async fn register_session(
        &self,
        endpoint: &str,
        update: SessionUpdate,
    ) -> Result<ClaimResponse, SessionError>;

    /// `PUT auth/session` with a login action: authenticates the session.
    async fn login_session(
        &self,
        endpoint: &str,
        update: SessionUpdate,
    ) -> Result<LoginResponse, SessionError>;

    /// `GET auth/session/wait/:id`: one long-poll until the session is
    /// claimed. No internal timeout; the caller imposes its own.
    async fn wait_session(
        &self,
        endpoint: &str,
        session_id: &str,
    ) -> Result<WaitResponse, SessionError>;

    /// Bearer-authorized `GET` against the organization's API.
    async fn get(&self, endpoint: &str, path: &str, token: &str)
        -> Result<Value, SessionError>;
}

/// [`SessionTransport`] over HTTP.
pub struct HttpSessionTransport {
    client: reqwest::Client,
}

impl HttpSessionTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    session_id: &str,
) -> Result<T, SessionError> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(SessionError::Unauthorized),
        StatusCode::NOT_FOUND => Err(SessionError::UnknownSession(session_id.to_string())),
        status if status.is_success() => Ok(response.json().await?),
        status => Err(SessionError::Transport(format!("HTTP {status}"))),
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn open_session(
        &self,
        endpoint: &str,
        capacity: &str,
    ) -> Result<SessionOpened, SessionError> {
        debug!("Opening {} session at {}", capacity, endpoint);
        let response = self
            .client
            .post(url(endpoint, "auth/session"))
            .json(&serde_json::json!({ "capacity": capacity }))
            .send()
            .await?;
        decode(response, "").await
    }

    async fn register_session(
        &self,
        endpoint: &str,
        update: SessionUpdate,
    ) -> Result<ClaimResponse, SessionError> {
        let session_id = update.session_id.clone();
        let response = self
            .client
            .put(url(endpoint, "auth/session"))
            .json(&update)
            .send()
            .await?;
        decode(response, &session_id).await
    }

    async fn login_session(
        &self,
        endpoint: &str,
        update: SessionUpdate,
    ) -> Result<LoginResponse, SessionError> {
        let session_id = update.session_id.clone();
        let response = self
            .client
            .put(url(endpoint, "auth/session"))
            .json(&update)
            .send()
            .await?;
        decode(response, &session_id).await
    }

    async fn wait_session(
        &self,
        endpoint: &str,
        session_id: &str,
    ) -> Result<WaitResponse, SessionError> {
        let response = self
            .client
            .get(url(endpoint, &format!("auth/session/wait/{session_id}")))
            .send()
            .await?;
        decode(response, session_id).await
    }

    async fn get(
        &self,
        endpoint: &str,
        path: &str,
        token: &str,
    ) -> Result<Value, SessionError> {
        let response = self
            .client
            .get(url(endpoint, path))
            .bearer_auth(token)
            .send()
            .await?;
        decode(response, "").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_with_or_without_trailing_slash() {
        assert_eq!(
            url("https://org.example/api/", "auth/session"),
            "https://org.example/api/auth/session"
        );
        assert_eq!(
            url("https://org.example/api", "auth/session"),
            "https://org.example/api/auth/session"
        );
    }

    #[test]
    fn test_update_omits_absent_fields() {
        let update = SessionUpdate {
            action: "login".to_string(),
            session_id: "s1".to_string(),
            peer_did: "p1".to_string(),
            signature: "sig".to_string(),
            secret: None,
            challenge: None,
            capacity: Some("admin".to_string()),
            credential: None,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert!(value.get("secret").is_none());
        assert!(value.get("credential").is_none());
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["peerDid"], "p1");
    }
}
