//! Errors surfaced by the REST client.
//!
//! Server failures arrive as the JSON error envelope and are mapped onto the
//! same taxonomy the service uses, keeping the server's message text.
//! Validation errors raised locally never touch the network.

use thiserror::Error;

use crate::api::error::{ApiError, ErrorDetails, ErrorResponse};

/// Shown when the server gives no message of its own
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    AlreadyInActiveRide(String),

    #[error("{0}")]
    RideFull(String),

    #[error("{0}")]
    AlreadyMember(String),

    #[error("{0}")]
    NotAMember(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    InvalidAccessCode(String),

    #[error("{0}")]
    CannotModifyOwner(String),

    #[error("{0}")]
    NotFound(String),

    /// The session token was rejected; the stored session has been cleared
    #[error("Your session has expired. Please log in again.")]
    AuthExpired,

    #[error("You are not logged in")]
    NotLoggedIn,

    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Session storage error: {0}")]
    Session(String),
}

impl ClientError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Map a non-success response onto the taxonomy
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let envelope = serde_json::from_slice::<ErrorResponse>(body).ok();
        let Some(envelope) = envelope else {
            return ClientError::Server {
                status,
                message: GENERIC_FAILURE.to_string(),
            };
        };

        let error = envelope.error;
        let message = non_empty_or_generic(error.message);

        match error.code.as_str() {
            "validation_error" | "bad_request" => ClientError::Validation {
                field: first_field(error.details.as_ref()).unwrap_or_else(|| "request".to_string()),
                message,
            },
            "not_authorized" | "forbidden" => ClientError::NotAuthorized(message),
            "already_in_active_ride" => ClientError::AlreadyInActiveRide(message),
            "ride_full" => ClientError::RideFull(message),
            "already_member" => ClientError::AlreadyMember(message),
            "not_a_member" => ClientError::NotAMember(message),
            "invalid_state" => ClientError::InvalidState(message),
            "invalid_access_code" => ClientError::InvalidAccessCode(message),
            "cannot_modify_owner" => ClientError::CannotModifyOwner(message),
            "not_found" => ClientError::NotFound(message),
            "unauthorized" => ClientError::AuthExpired,
            _ => ClientError::Server { status, message },
        }
    }

    /// True for failures the user fixes by logging in again
    pub fn needs_login(&self) -> bool {
        matches!(self, ClientError::AuthExpired | ClientError::NotLoggedIn)
    }
}

fn non_empty_or_generic(message: String) -> String {
    if message.trim().is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        message
    }
}

/// The server's message from an error envelope, or the generic fallback
pub fn message_of(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorResponse>(body)
        .map(|envelope| non_empty_or_generic(envelope.error.message))
        .unwrap_or_else(|_| GENERIC_FAILURE.to_string())
}

fn first_field(details: Option<&ErrorDetails>) -> Option<String> {
    match details? {
        ErrorDetails::ValidationErrors(errors) => {
            let mut fields: Vec<&String> = errors.keys().collect();
            fields.sort();
            fields.first().map(|f| f.to_string())
        }
    }
}

/// Local pre-checks reuse the server's request validators
impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        ClientError::Validation {
            field: first_field(err.details()).unwrap_or_else(|| "request".to_string()),
            message: err.message().to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Server {
                status: err.status().map(|s| s.as_u16()).unwrap_or(200),
                message: "Unexpected response from server".to_string(),
            }
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Session(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Session(err.to_string())
    }
}
