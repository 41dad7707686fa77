use thiserror::Error;

/// Typed download errors enabling retry classification.
///
/// `is_retryable()` separates transient transport failures (server errors,
/// rate limits, dropped connections) from permanent ones (client errors,
/// disk or archive failures) so the retry loop can abort early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Failed to extract archive {path}: {source}")]
    Zip {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("No usable file name for {0}")]
    NoFilename(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } => true,
            DownloadError::Disk(_)
            | DownloadError::Zip { .. }
            | DownloadError::NoFilename(_)
            | DownloadError::Cancelled
            | DownloadError::Join(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> DownloadError {
        DownloadError::HttpStatus {
            status,
            url: "https://cvws.icloud-content.com/x".into(),
        }
    }

    #[test]
    fn test_client_errors_not_retryable() {
        for code in [400, 401, 403, 404, 410] {
            assert!(!status(code).is_retryable(), "{}", code);
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_retryable() {
        for code in [429, 500, 502, 503] {
            assert!(status(code).is_retryable(), "{}", code);
        }
    }

    #[test]
    fn test_disk_not_retryable() {
        let e = DownloadError::Disk(std::io::Error::other("disk full"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_cancelled_not_retryable() {
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_zip_not_retryable() {
        let e = DownloadError::Zip {
            path: "a.zip".into(),
            source: zip::result::ZipError::InvalidArchive("bad"),
        };
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("a.zip"));
    }

    #[tokio::test]
    async fn test_http_connection_error_retryable() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1")
            .send()
            .await
            .unwrap_err();
        let e = DownloadError::Http {
            source: err,
            url: "http://127.0.0.1:1".into(),
            bytes_written: 0,
        };
        assert!(e.is_retryable());
    }
}
