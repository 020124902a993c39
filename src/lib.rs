//! Decentralized identifiers and verifiable credentials for organizations,
//! layered on an append-only, ownership-transfer ledger.
//!
//! The workspace is split by layer: [`idchain_core`] holds the ledger and
//! governance boundary traits, the asset-chain primitive, key management and
//! credential signing; [`idchain_org`] composes those into the organization
//! record, certificate registry and integrity log; [`idchain_session`]
//! implements the session/capability claim and login protocol; and
//! [`idchain_api`] offers one-call entry points over all of them.

pub use idchain_api as api;
pub use idchain_core::{chain, config, governance, key_manager, ledger, memory, payload, utils, vc};
pub use idchain_org::{application, certificate, integrity, organization, tax};
pub use idchain_session::{broker, connection, transport};
