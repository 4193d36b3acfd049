//! # Spotify Provider
//!
//! Implements the `RemoteSource` trait for the Spotify Web API.
//!
//! ## Overview
//!
//! This module provides:
//! - Playlist listing with `snapshot_id` revision markers
//! - Paged playlist track and liked songs listings
//! - Status mapping onto `RemoteError` (429 with `Retry-After`, 401, 404, 5xx)
//!
//! Authentication is out of scope: the connector is handed a ready access
//! token and an `HttpClient`.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{SpotifyConnector, SPOTIFY_API_BASE};
pub use error::{Result, SpotifyError};
