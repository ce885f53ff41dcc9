use thiserror::Error;

/// Unified error type for cowrite operations
#[derive(Debug, Error)]
pub enum CowriteError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Database errors
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    // Persistence errors
    #[error("Failed to store update for '{workspace_id}/{doc_id}'")]
    UpdateNotSaved {
        workspace_id: String,
        doc_id: String,
        #[source]
        source: Box<CowriteError>,
    },

    #[error("Failed to upsert snapshot for '{workspace_id}/{doc_id}'")]
    SnapshotNotSaved {
        workspace_id: String,
        doc_id: String,
        #[source]
        source: Box<CowriteError>,
    },
}

/// Result type alias for cowrite operations
pub type Result<T> = std::result::Result<T, CowriteError>;
