//! Workspace entry crate.
//!
//! Re-exports the mirror façade from `core-service` behind the
//! `desktop-shims` feature so host applications can depend on
//! `playlist-mirror` alone and get the reqwest-backed Spotify wiring.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
