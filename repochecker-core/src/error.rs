//! Error types shared across the review engine.

use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to the build service.
///
/// The engine treats every variant as "no data": the affected package is
/// skipped for this pass rather than judged on partial information.
/// `is_transient` tells callers whether re-running later is likely to help.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error for {url}: {detail}")]
    Transport { url: String, detail: String },

    #[error("build service returned {code} for {url}: {detail}")]
    Status {
        url: String,
        code: String,
        detail: String,
    },

    #[error("malformed response from {url}: {detail}")]
    Malformed { url: String, detail: String },
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { code, .. } => code.starts_with('5'),
            Self::NotFound(_) | Self::Malformed { .. } => false,
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure of the cache storage backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error during {operation}: {detail}")]
    Storage { operation: String, detail: String },

    #[error("corrupt cache entry: {0}")]
    Corruption(String),
}

impl CacheError {
    pub fn storage(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Failure while fetching or verifying a package's binaries.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("provenance query for {path} failed: {detail}")]
    ProvenanceQuery { path: PathBuf, detail: String },

    /// The binary was built from other sources than the ones under review.
    #[error("disturl {disturl} does not match revision {rev}")]
    ProvenanceMismatch { disturl: String, rev: String },
}

impl DownloadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of the external consistency checker.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("failed to spawn consistency checker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("consistency checker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a whole review run.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Checker(#[from] CheckerError),

    #[error("work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_transient() {
        let err = ServiceError::Transport {
            url: "https://obs/x".to_string(),
            detail: "connection reset".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_status_transience_depends_on_code() {
        let server = ServiceError::Status {
            url: "u".to_string(),
            code: "503".to_string(),
            detail: String::new(),
        };
        let client = ServiceError::Status {
            url: "u".to_string(),
            code: "400".to_string(),
            detail: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!ServiceError::NotFound("x".to_string()).is_transient());
    }

    #[test]
    fn test_provenance_mismatch_message() {
        let err = DownloadError::ProvenanceMismatch {
            disturl: "obs://build/devel:tools/standard/0123-make".to_string(),
            rev: "abcd".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "disturl obs://build/devel:tools/standard/0123-make does not match revision abcd"
        );
    }
}
