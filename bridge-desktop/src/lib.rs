//! # Desktop Bridge Implementations
//!
//! Native implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest` with rustls
//!
//! Clocks and log sinks need no platform code; use
//! [`bridge_traits::SystemClock`] and [`bridge_traits::ConsoleLogger`].
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let connector = provider_spotify::SpotifyConnector::new(http_client, token);
//! ```

mod http;

pub use http::ReqwestHttpClient;
