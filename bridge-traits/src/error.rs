use std::time::Duration;

use thiserror::Error;

/// Failures raised by host bridge implementations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failures reported by a [`RemoteSource`](crate::remote::RemoteSource).
///
/// Throttling is kept distinct from every other failure so the sync engine can
/// honour the suggested wait instead of applying its own backoff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Rate limited by remote source, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Remote request timed out")]
    Timeout,

    #[error("Remote entity not found: {0}")]
    NotFound(String),

    #[error("Remote source rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Remote source rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. } | RemoteError::Transient(_) | RemoteError::Timeout
        )
    }
}

impl From<BridgeError> for RemoteError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(_) => RemoteError::Timeout,
            other => RemoteError::Transient(other.to_string()),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(RemoteError::Transient("reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(!RemoteError::NotFound("pl".into()).is_retryable());
        assert!(!RemoteError::Malformed("bad page".into()).is_retryable());
        assert!(!RemoteError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_bridge_timeout_maps_to_remote_timeout() {
        let err: RemoteError = BridgeError::Timeout("30s".into()).into();
        assert_eq!(err, RemoteError::Timeout);

        let err: RemoteError = BridgeError::Network("connection reset".into()).into();
        assert!(matches!(err, RemoteError::Transient(msg) if msg.contains("connection reset")));
    }
}
