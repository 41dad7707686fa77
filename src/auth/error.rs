use thiserror::Error;

/// Failures of the login protocol itself.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed login: {0}")]
    FailedLogin(String),

    #[error("API error (HTTP {code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Invalid verification code")]
    InvalidTwoFactorCode,

    #[error("Response is missing required field `{path}`")]
    MissingField { path: String },

    #[error("Apple insists on using {0} for your request. Please use --domain parameter")]
    WrongDomain(String),

    #[error("Authentication cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    pub(crate) fn missing(path: &str) -> Self {
        AuthError::MissingField {
            path: path.to_string(),
        }
    }
}
