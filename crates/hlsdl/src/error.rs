use std::sync::Arc;
use std::time::Duration;

/// Failure of a single fetch attempt at the transport boundary.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Server returned status code {status}")]
    Status { status: u16 },
    #[error("Part not fully downloaded: expected {expected} bytes, received {received}")]
    IntegrityMismatch { expected: u64, received: u64 },
    #[error("Unexpected response body: {0}")]
    InvalidBody(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    ///
    /// Connection faults, timeouts, truncated bodies and 5xx/408/429 statuses are
    /// transient; other client errors and malformed URIs are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network { source } => {
                source.is_connect() || source.is_timeout() || source.is_request() || source.is_body()
            }
            TransportError::Timeout(_) => true,
            TransportError::Status { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::IntegrityMismatch { .. } => true,
            TransportError::InvalidBody(_) => true,
            TransportError::Io { source } => source.kind() != std::io::ErrorKind::NotFound,
            TransportError::InvalidUri(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            source: Arc::new(err),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsDownloadError {
    #[error("Playlist is empty")]
    PlaylistEmpty,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cannot resolve URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("Part {} key {uri} could not be fetched: {source}", index + 1)]
    KeyFetch {
        index: usize,
        uri: String,
        #[source]
        source: TransportError,
    },
    #[error("Part {} download error ({uri}): {source}", index + 1)]
    SegmentFetch {
        index: usize,
        uri: String,
        #[source]
        source: TransportError,
    },
    #[error("Part {} decryption failed: {reason}", index + 1)]
    Decryption { index: usize, reason: String },
    #[error("{failed} parts not downloaded")]
    WindowFailed { failed: usize },
    #[error("Write to output failed after {attempts} attempts: {source}")]
    WriteFailure {
        attempts: u32,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Resume record rejected: {0}")]
    ResumeRecordInvalid(String),
    #[error("HTTP client error: {0}")]
    Client(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
}

impl HlsDownloadError {
    /// Index of the segment the error is scoped to, if any.
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            HlsDownloadError::KeyFetch { index, .. }
            | HlsDownloadError::SegmentFetch { index, .. }
            | HlsDownloadError::Decryption { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HlsDownloadError {
    fn from(err: std::io::Error) -> Self {
        HlsDownloadError::Io {
            source: Arc::new(err),
        }
    }
}
