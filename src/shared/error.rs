use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The durable queue could not be opened or written (quota, permissions, I/O).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Owner not found: {0}")]
    OwnerNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn storage_unavailable(err: impl std::fmt::Display) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}
