// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transfer error: {0}")]
    Transfer(#[from] crate::port::TransferError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for lookups of unknown jobs or queues
    pub fn is_not_found(&self) -> bool {
        use crate::domain::DomainError;
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::Domain(DomainError::JobNotFound(_))
                | AppError::Domain(DomainError::QueueNotFound(_))
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
