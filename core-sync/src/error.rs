use bridge_traits::RemoteError;
use core_library::LibraryError;
use thiserror::Error;

/// Failures that abort a whole sync. Per-playlist problems never surface here;
/// they are reported as [`PlaylistOutcome::Failed`](crate::report::PlaylistOutcome::Failed).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch the remote playlist listing: {0}")]
    Listing(#[source] FetchError),

    #[error("Snapshot store error: {0}")]
    Store(#[from] LibraryError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Invalid sync mode: {0}")]
    InvalidMode(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of one remote fetch after the retry policy gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{last} (gave up after {attempts} attempts)")]
    RetriesExhausted { attempts: u32, last: RemoteError },

    /// Not worth retrying: not found, unauthorized, rejected or malformed.
    #[error("{0}")]
    Remote(RemoteError),

    #[error("Pagination did not terminate: {0}")]
    Pagination(String),

    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Remote(RemoteError::NotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        let err = FetchError::RetriesExhausted {
            attempts: 5,
            last: RemoteError::Timeout,
        };
        assert_eq!(
            err.to_string(),
            "Remote request timed out (gave up after 5 attempts)"
        );
        assert!(FetchError::Remote(RemoteError::NotFound("pl".into())).is_not_found());
        assert!(!FetchError::Cancelled.is_not_found());
    }

    #[test]
    fn test_listing_error_wraps_fetch_error() {
        let err = SyncError::Listing(FetchError::Remote(RemoteError::Unauthorized(
            "expired".into(),
        )));
        assert!(err.to_string().contains("expired"));
    }
}
