//! Typed transaction payloads.
//!
//! Every TRANSFER entry on the ledger carries a small integer tag telling
//! readers which schema variant its subject follows. The tag space is closed:
//! decoding an unknown tag is an error, never a silent fallthrough.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::utils;

/// An error relating to payload decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Unknown schema tag on a ledger entry.
    #[error("Unknown payload type tag: {0}.")]
    UnknownTag(u8),
}

/// Closed set of payload schema tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TxType {
    /// Organization identity root.
    Did,
    /// Organization information update.
    Info,
    /// DID document chain root.
    DidDocList,
    /// DID document version.
    DidDoc,
    /// Verified-DID chain root.
    VerifiedList,
    /// Verified-DID entry.
    Verified,
    /// Application registry chain root.
    AppList,
    /// Generic application sub-chain root.
    App,
    /// Certificate registry entry in the application registry.
    Tags,
    /// Certificate issuance or acceptance record.
    Issued,
    /// Certificate definition.
    TagType,
    /// Integrity log entry in the application registry.
    Integrity,
    /// Integrity hash record.
    Hash,
}

impl From<TxType> for u8 {
    fn from(tx_type: TxType) -> u8 {
        match tx_type {
            TxType::Did => 1,
            TxType::Info => 2,
            TxType::DidDocList => 3,
            TxType::DidDoc => 4,
            TxType::VerifiedList => 5,
            TxType::Verified => 6,
            TxType::AppList => 7,
            TxType::App => 8,
            TxType::Tags => 9,
            TxType::Issued => 10,
            TxType::TagType => 11,
            TxType::Integrity => 12,
            TxType::Hash => 13,
        }
    }
}

impl TryFrom<u8> for TxType {
    type Error = PayloadError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(TxType::Did),
            2 => Ok(TxType::Info),
            3 => Ok(TxType::DidDocList),
            4 => Ok(TxType::DidDoc),
            5 => Ok(TxType::VerifiedList),
            6 => Ok(TxType::Verified),
            7 => Ok(TxType::AppList),
            8 => Ok(TxType::App),
            9 => Ok(TxType::Tags),
            10 => Ok(TxType::Issued),
            11 => Ok(TxType::TagType),
            12 => Ok(TxType::Integrity),
            13 => Ok(TxType::Hash),
            other => Err(PayloadError::UnknownTag(other)),
        }
    }
}

/// Typed payload carried by a TRANSFER entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub subject: Value,
    pub datetime: String,
}

impl Payload {
    /// Builds a payload stamped with the current time.
    pub fn new(tx_type: TxType, subject: Value) -> Self {
        Self {
            tx_type,
            subject,
            datetime: utils::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_round_trip() {
        for tag in 1u8..=13 {
            let tx_type = TxType::try_from(tag).unwrap();
            assert_eq!(u8::from(tx_type), tag);
        }
    }

    #[test]
    fn test_unknown_tag_fails_loudly() {
        assert_eq!(TxType::try_from(0), Err(PayloadError::UnknownTag(0)));
        assert_eq!(TxType::try_from(14), Err(PayloadError::UnknownTag(14)));

        let result: Result<Payload, _> =
            serde_json::from_str(r#"{"type":99,"subject":{},"datetime":"2024-01-01T00:00:00Z"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_serializes_tag_as_integer() {
        let payload = Payload::new(TxType::Issued, json!({"did": "abc"}));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], 10);
    }
}
