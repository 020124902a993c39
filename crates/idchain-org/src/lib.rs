//! Organization-level composition over the core ledger primitives: identity
//! roots, application registries, certificates and integrity logs.
pub mod application;
pub mod certificate;
pub mod integrity;
pub mod organization;
pub mod tax;
