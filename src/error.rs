//! Domain errors raised by ride, organization and review operations.
//!
//! Handlers convert these into [`crate::api::error::ApiError`]; the variants
//! map one-to-one onto the machine-readable codes of the HTTP error envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required field is missing or malformed
    #[error("{message}")]
    Validation { field: String, message: String },

    /// The caller lacks the role or ownership required for the operation
    #[error("{0}")]
    NotAuthorized(String),

    #[error("You already have an active ride")]
    AlreadyInActiveRide,

    #[error("This ride has no seats left")]
    RideFull,

    #[error("{0}")]
    AlreadyMember(String),

    #[error("{0}")]
    NotAMember(String),

    /// The operation does not apply to the ride's current lifecycle state
    #[error("{0}")]
    InvalidState(String),

    #[error("Invalid access code")]
    InvalidAccessCode,

    #[error("The organization owner cannot be modified or removed")]
    CannotModifyOwner,

    #[error("{0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        ServiceError::NotAuthorized(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ServiceError::InvalidState(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// True when a sqlx error is a violation of a UNIQUE index or constraint
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}
