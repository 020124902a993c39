use thiserror::Error;

use idchain_core::vc::VcError;
use idchain_org::certificate::CertificateError;
use idchain_org::organization::OrgError;

/// An error at the API composition layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Wrapped organization error.
    #[error(transparent)]
    Org(#[from] OrgError),
    /// Wrapped certificate error.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    /// Wrapped credential error.
    #[error(transparent)]
    Vc(#[from] VcError),
}
