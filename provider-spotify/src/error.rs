//! Error types for the Spotify provider

use bridge_traits::error::{BridgeError, RemoteError};
use std::time::Duration;
use thiserror::Error;

/// Spotify provider errors
#[derive(Error, Debug)]
pub enum SpotifyError {
    /// HTTP 429
    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// HTTP 401, the access token is missing, invalid or expired
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// HTTP 404
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// HTTP 5xx
    #[error("Spotify server error (status {status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Any other non-2xx status
    #[error("Spotify API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// A pagination cursor that does not point at the API
    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Spotify operations
pub type Result<T> = std::result::Result<T, SpotifyError>;

impl From<SpotifyError> for RemoteError {
    fn from(error: SpotifyError) -> Self {
        match error {
            SpotifyError::RateLimitExceeded {
                retry_after_seconds,
            } => RemoteError::RateLimited {
                retry_after: Duration::from_secs(retry_after_seconds),
            },
            SpotifyError::AuthenticationFailed(msg) => RemoteError::Unauthorized(msg),
            SpotifyError::NotFound(what) => RemoteError::NotFound(what),
            SpotifyError::ServerError {
                status_code,
                message,
            } => RemoteError::Transient(format!("status {}: {}", status_code, message)),
            SpotifyError::ApiError {
                status_code,
                message,
            } => RemoteError::Rejected {
                status: status_code,
                message,
            },
            SpotifyError::ParseError(msg) => RemoteError::Malformed(msg),
            SpotifyError::InvalidCursor(cursor) => {
                RemoteError::Malformed(format!("invalid cursor {}", cursor))
            }
            SpotifyError::BridgeError(e) => e.into(),
        }
    }
}
