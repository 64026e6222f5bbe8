use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state not found: {key}")]
    NotFound { key: String },

    #[error("state file version {found} is newer than supported version {supported}")]
    VersionAhead { found: u32, supported: u32 },

    #[error("corrupt state at {key:?}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("remote state backend error: {0}")]
    Remote(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
