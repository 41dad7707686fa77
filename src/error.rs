use thiserror::Error;

use crate::auth::error::AuthError;
use crate::download::error::DownloadError;
use crate::icloud::error::CatalogError;
use crate::store::StoreError;

/// Errors surfaced through the presentation-facing [`crate::App`] surface.
///
/// `Display` is the short message meant for the user; diagnostic detail
/// goes to the log at the point of failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no pending signin: log in before submitting a verification code")]
    NoPendingSignin,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("user identity must not be empty")]
    EmptyIdentity,

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal fault: {message}")]
    Fault { message: String },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Auth(AuthError::Cancelled) => true,
            Error::Catalog(CatalogError::Cancelled) => true,
            Error::Download(DownloadError::Cancelled) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
