//! Error types for Waypoint core.

/// Main error type for the core crate.
///
/// All storage and cache operations return `Result<T> = std::result::Result<T, CoreError>`.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// Storage backend operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unknown pillar name.
    #[error("Invalid pillar: {0}")]
    InvalidPillar(String),

    /// Unknown message role.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Stored record could not be decoded.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the SQLite backend.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Type alias for Result with CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidPillar("launch".to_string());
        assert_eq!(err.to_string(), "Invalid pillar: launch");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CoreError = parse.unwrap_err().into();
        assert!(matches!(err, CoreError::Json(_)));
    }
}
