//! One-call entry points composing the core and organization layers.
pub mod api;
pub mod errors;

pub use api::{CredentialAPI, IdchainAPI, OrganizationAPI};
pub use errors::ApiError;
