use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// A persisted record exists but cannot be parsed or fails validation.
    #[error("Corrupt snapshot at {path}: {message}")]
    CorruptSnapshot { path: String, message: String },

    /// A folder move would make a folder its own ancestor.
    #[error("Moving folder {folder_id} under {parent_id} would create a cycle")]
    Cycle { folder_id: String, parent_id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

impl LibraryError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        LibraryError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, LibraryError::CorruptSnapshot { .. })
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
