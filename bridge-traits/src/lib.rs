//! # Host Bridge Traits
//!
//! Seams between the playlist mirror core and everything it does not own.
//!
//! ## Overview
//!
//! The core never talks to the network, the wall clock or a host logger
//! directly. Each of those is reached through a trait defined here so that
//! desktop builds, tests and other hosts can supply their own implementation.
//!
//! ## Traits
//!
//! ### Remote library access
//! - [`RemoteSource`](remote::RemoteSource) - Paginated playlist, track and liked-songs listing
//! - [`HttpClient`](http::HttpClient) - Single-shot async HTTP used by remote adapters
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Host capabilities fail with [`BridgeError`](error::BridgeError). Remote
//! adapters fail with [`RemoteError`](error::RemoteError), which separates
//! throttling, transient failures and vanished entities so the sync engine can
//! react to each differently.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the sync engine calls them from
//! several tasks at once.

pub mod error;
pub mod http;
pub mod log;
pub mod remote;
pub mod time;

pub use error::{BridgeError, RemoteError, RemoteResult};

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use remote::{
    LikedSongsPage, RemoteEntry, RemoteOwner, RemotePlaylist, RemoteSource, RemoteTrack, TrackPage,
};
pub use time::{Clock, FixedClock, SystemClock};
