//! Unified API error handling.
//!
//! Every handler failure is returned as
//! `{"error": {"code": "...", "message": "...", "details": ...}}`. The ride and
//! organization rule violations have codes of their own so that clients can
//! react to them without parsing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ServiceError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    TooManyRequests,
    ValidationError,

    NotAuthorized,
    AlreadyInActiveRide,
    RideFull,
    AlreadyMember,
    NotAMember,
    InvalidState,
    InvalidAccessCode,
    CannotModifyOwner,

    InternalError,
    DatabaseError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotAuthorized | ErrorCode::CannotModifyOwner => StatusCode::FORBIDDEN,
            ErrorCode::NotFound | ErrorCode::NotAMember | ErrorCode::InvalidAccessCode => {
                StatusCode::NOT_FOUND
            }
            ErrorCode::Conflict
            | ErrorCode::AlreadyInActiveRide
            | ErrorCode::RideFull
            | ErrorCode::AlreadyMember
            | ErrorCode::InvalidState => StatusCode::CONFLICT,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wire name, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotAuthorized => "not_authorized",
            ErrorCode::AlreadyInActiveRide => "already_in_active_ride",
            ErrorCode::RideFull => "ride_full",
            ErrorCode::AlreadyMember => "already_member",
            ErrorCode::NotAMember => "not_a_member",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::InvalidAccessCode => "invalid_access_code",
            ErrorCode::CannotModifyOwner => "cannot_modify_owner",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::DatabaseError => "database_error",
        }
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (e.g., validation errors per field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Additional error details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Field name to messages
    ValidationErrors(HashMap<String, Vec<String>>),
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    /// Create a new API error with a specific code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&ErrorDetails> {
        self.details.as_ref()
    }

    /// Add validation errors as details
    pub fn with_validation_errors(mut self, errors: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(ErrorDetails::ValidationErrors(errors));
        self
    }

    /// Unauthorized error (401) - authentication required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: HashMap<String, Vec<String>>) -> Self {
        let message = if errors.len() == 1 {
            errors.values().next().and_then(|v| v.first()).cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        Self::new(ErrorCode::ValidationError, message)
            .with_validation_errors(errors)
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }

    /// Internal server error (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Too many requests error (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                details: self.details,
            },
        };

        (self.code.status_code(), Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);

        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("Resource not found"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    ApiError::new(ErrorCode::Conflict, "A resource with this identifier already exists")
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    ApiError::new(ErrorCode::BadRequest, "Referenced resource does not exist")
                } else {
                    ApiError::new(ErrorCode::DatabaseError, "A database error occurred")
                }
            }
            _ => ApiError::new(ErrorCode::DatabaseError, "A database error occurred"),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation { field, message } => ApiError::validation_field(&field, message),
            ServiceError::NotAuthorized(_) => ApiError::new(ErrorCode::NotAuthorized, message),
            ServiceError::AlreadyInActiveRide => ApiError::new(ErrorCode::AlreadyInActiveRide, message),
            ServiceError::RideFull => ApiError::new(ErrorCode::RideFull, message),
            ServiceError::AlreadyMember(_) => ApiError::new(ErrorCode::AlreadyMember, message),
            ServiceError::NotAMember(_) => ApiError::new(ErrorCode::NotAMember, message),
            ServiceError::InvalidState(_) => ApiError::new(ErrorCode::InvalidState, message),
            ServiceError::InvalidAccessCode => ApiError::new(ErrorCode::InvalidAccessCode, message),
            ServiceError::CannotModifyOwner => ApiError::new(ErrorCode::CannotModifyOwner, message),
            ServiceError::NotFound(_) => ApiError::not_found(message),
            ServiceError::Database(e) => e.into(),
        }
    }
}

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    /// Create a new validation error builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Ok when nothing was added
    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}
