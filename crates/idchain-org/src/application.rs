//! Replay of an organization's application registry chain.
//!
//! The applications chain is the organization's directory of sub-chains:
//! each TRANSFER entry announces one application (certificate registry,
//! integrity log, ...) with the ids of the chains it lives on.
use serde_json::Value;

use idchain_core::ledger::LedgerEntry;
use idchain_core::payload::TxType;

/// Marker key written on list chains during storage-key rotation. Entries
/// carrying it are chain plumbing, not application data, and every replay
/// skips them.
pub const KEY_ROTATION_MARKER: &str = "keyRotation";

/// One announced application, replayed from the applications chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationEntry {
    pub tx_type: TxType,
    pub subject: Value,
    pub datetime: String,
}

impl ApplicationEntry {
    /// The announced chain id under `key`, if present in the subject.
    pub fn chain_id(&self, key: &str) -> Option<&str> {
        self.subject.get(key).and_then(Value::as_str)
    }
}

/// Replays a chain history into application entries, skipping the CREATE
/// root and key-rotation markers.
pub fn replay(history: &[LedgerEntry]) -> Vec<ApplicationEntry> {
    history
        .iter()
        .filter_map(|entry| entry.metadata.as_ref())
        .filter(|payload| payload.subject.get(KEY_ROTATION_MARKER).is_none())
        .map(|payload| ApplicationEntry {
            tx_type: payload.tx_type,
            subject: payload.subject.clone(),
            datetime: payload.datetime.clone(),
        })
        .collect()
}

/// Finds the first replayed entry with the given tag.
pub fn find_by_type(entries: &[ApplicationEntry], tx_type: TxType) -> Option<&ApplicationEntry> {
    entries.iter().find(|entry| entry.tx_type == tx_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use idchain_core::ledger::Operation;
    use idchain_core::payload::Payload;
    use serde_json::json;

    fn entry(metadata: Option<Payload>) -> LedgerEntry {
        LedgerEntry {
            id: "tx".to_string(),
            chain_id: "chain".to_string(),
            operation: if metadata.is_some() {
                Operation::Transfer
            } else {
                Operation::Create
            },
            asset: json!({}),
            metadata,
            owner: "owner".to_string(),
        }
    }

    #[test]
    fn test_replay_skips_root_and_rotation_markers() {
        let history = vec![
            entry(None),
            entry(Some(Payload::new(TxType::Tags, json!({"issued": "tx-1"})))),
            entry(Some(Payload::new(TxType::App, json!({KEY_ROTATION_MARKER: true})))),
            entry(Some(Payload::new(TxType::Integrity, json!({"hashes": "tx-2"})))),
        ];
        let entries = replay(&history);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tx_type, TxType::Tags);
        assert_eq!(entries[0].chain_id("issued"), Some("tx-1"));

        assert!(find_by_type(&entries, TxType::Integrity).is_some());
        assert!(find_by_type(&entries, TxType::App).is_none());
    }
}
