use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Not logged in: no catalog endpoint recorded for this account")]
    NotLoggedIn,

    #[error("API error (HTTP {code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Record {record} is missing required field `{path}`")]
    MissingField { record: String, path: String },

    #[error("Record {record} has malformed fields: {source}")]
    Malformed {
        record: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record {record} has an undecodable filename: {reason}")]
    InvalidFilename { record: String, reason: String },

    #[error("Archive batch must hold 1..={max} records, got {len}")]
    InvalidBatch { len: usize, max: usize },

    #[error("Catalog request cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
