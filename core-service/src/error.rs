use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),
}

impl CoreError {
    /// True for [`core_sync::SyncError::SyncInProgress`].
    pub fn is_sync_in_progress(&self) -> bool {
        matches!(self, CoreError::Sync(core_sync::SyncError::SyncInProgress))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
