//! Error types for s3pilot-core

use aws_sdk_s3::error::{BuildError, DisplayErrorContext, SdkError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for s3pilot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the backing object store
///
/// Never retried here; retries belong to the SDK client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Store error: {0}")]
    Service(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl<E> From<SdkError<E>> for StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: SdkError<E>) -> Self {
        let status = err.raw_response().map(|r| r.status().as_u16());
        let message = DisplayErrorContext(&err).to_string();

        match (&err, status) {
            (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => {
                StoreError::Network(message)
            }
            (_, Some(401)) => StoreError::Authentication(message),
            (_, Some(403)) => StoreError::PermissionDenied(message),
            (_, Some(404)) => StoreError::NotFound(message),
            _ => StoreError::Service(message),
        }
    }
}

/// Why a single part could not be transferred
#[derive(Error, Debug)]
pub enum PartFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("local read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the chunked uploader
#[derive(Error, Debug)]
pub enum UploadError {
    /// The job itself is malformed (zero part size, empty key, ...)
    #[error("Invalid upload job: {0}")]
    InvalidJob(String),

    /// Opening the session or the whole-object put failed
    #[error("Upload failed: {0}")]
    Store(#[from] StoreError),

    /// The source could not be sized or read
    #[error("Local IO error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// A part upload failed; the session has been aborted
    #[error("Part {part_number} failed: {source}")]
    PartFailed {
        part_number: u32,
        #[source]
        source: PartFailure,
    },

    /// Completing the session failed; the session has been aborted
    #[error("Finalizing multipart upload failed: {source}")]
    FinalizeFailed {
        #[source]
        source: StoreError,
    },

    /// A worker died without reporting a part error; the session has been aborted
    #[error("Multipart upload aborted: {source}")]
    Aborted {
        #[source]
        source: tokio::task::JoinError,
    },
}

impl UploadError {
    /// Part number that triggered the failure, if any
    pub fn part_number(&self) -> Option<u32> {
        match self {
            UploadError::PartFailed { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }
}

/// Main error type for s3pilot-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Object store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Upload errors
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Network error while fetching a remote file
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Generic SdkError conversion for all S3 operations
impl<E> From<SdkError<E>> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: SdkError<E>) -> Self {
        Error::Store(StoreError::from(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_connect() {
            Error::Network(err.to_string())
        } else {
            Error::HttpClient(err.to_string())
        }
    }
}

// Request builders fail when a required field is missing
impl From<BuildError> for Error {
    fn from(err: BuildError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_failed_display() {
        let err = UploadError::PartFailed {
            part_number: 7,
            source: PartFailure::Store(StoreError::Network("connection reset".to_string())),
        };

        assert_eq!(err.part_number(), Some(7));
        assert_eq!(
            err.to_string(),
            "Part 7 failed: Network error: connection reset"
        );
    }

    #[test]
    fn test_store_error_into_crate_error() {
        let err: Error = StoreError::NotFound("bucket".to_string()).into();
        assert!(matches!(err, Error::Store(StoreError::NotFound(_))));
        assert_eq!(err.to_string(), "Not found: bucket");
    }

    #[test]
    fn test_upload_error_source_chain() {
        use std::error::Error as _;

        let err = UploadError::FinalizeFailed {
            source: StoreError::Service("InvalidPart".to_string()),
        };

        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Store error: InvalidPart"));
        assert_eq!(err.part_number(), None);
    }
}
