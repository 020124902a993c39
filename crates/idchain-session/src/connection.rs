//! Connection strings: the out-of-band handle a wallet receives to claim a
//! session with an organization.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Only format version in circulation.
pub const CONNECTION_VERSION: u8 = 1;

/// An error relating to connection string parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Not of the form `1-<session>-<did>-<network>`.
    #[error("Malformed connection string: {0}.")]
    Malformed(String),
    /// A version this client does not speak.
    #[error("Unsupported connection string version: {0}.")]
    UnsupportedVersion(String),
}

/// A parsed connection string: `1-<session>-<did>-<network>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub version: u8,
    pub session_id: String,
    pub did: String,
    pub network: String,
}

impl ConnectionString {
    pub fn new(session_id: &str, did: &str, network: &str) -> Self {
        Self {
            version: CONNECTION_VERSION,
            session_id: session_id.to_string(),
            did: did.to_string(),
            network: network.to_string(),
        }
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.version, self.session_id, self.did, self.network
        )
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Session ids and DIDs are hex, so the first three separators are
        // unambiguous; the network keeps any remaining hyphens.
        let mut parts = s.splitn(4, '-');
        let (Some(version), Some(session_id), Some(did), Some(network)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ConnectionError::Malformed(s.to_string()));
        };
        if session_id.is_empty() || did.is_empty() || network.is_empty() {
            return Err(ConnectionError::Malformed(s.to_string()));
        }
        let version: u8 = version
            .parse()
            .map_err(|_| ConnectionError::Malformed(s.to_string()))?;
        if version != CONNECTION_VERSION {
            return Err(ConnectionError::UnsupportedVersion(version.to_string()));
        }
        Ok(Self {
            version,
            session_id: session_id.to_string(),
            did: did.to_string(),
            network: network.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_round_trip() {
        let original = ConnectionString::new("f00d", "a1b2c3", "idspace");
        let parsed: ConnectionString = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
        assert_eq!(original.to_string(), "1-f00d-a1b2c3-idspace");
    }

    #[test]
    fn test_network_keeps_hyphens() {
        let parsed: ConnectionString = "1-f00d-a1b2c3-idspace-test".parse().unwrap();
        assert_eq!(parsed.network, "idspace-test");
    }

    #[test]
    fn test_malformed_and_unsupported() {
        assert!(matches!(
            "nonsense".parse::<ConnectionString>(),
            Err(ConnectionError::Malformed(_))
        ));
        assert!(matches!(
            "1-f00d-a1b2c3".parse::<ConnectionString>(),
            Err(ConnectionError::Malformed(_))
        ));
        assert!(matches!(
            "2-f00d-a1b2c3-idspace".parse::<ConnectionString>(),
            Err(ConnectionError::UnsupportedVersion(_))
        ));
    }
}
