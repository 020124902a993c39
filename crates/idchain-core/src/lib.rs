//! Core traits and logic (ledger transport independent).
pub mod chain;
pub mod config;
pub mod governance;
pub mod key_manager;
pub mod ledger;
pub mod memory;
pub mod payload;
pub mod utils;
pub mod vc;

/// Environment variable name for the idchain config file.
pub const IDCHAIN_CONFIG: &str = "IDCHAIN_CONFIG";

/// DID method prefix for identifiers minted by this workspace.
pub const DID_PREFIX: &str = "did:idchain:";

/// Fragment naming an organization's assertion key within its DID document.
pub const KEY_FRAGMENT: &str = "#key-1";

/// The `type` value of the service entry holding an organization's API endpoint.
pub const SERVICE_TYPE: &str = "IdentityService";

/// Returns the full DID URI for a bare identifier.
pub fn did_uri(did: &str) -> String {
    format!("{DID_PREFIX}{did}")
}
