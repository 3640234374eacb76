use thiserror::Error;

use crate::api::{ApiError, TransportError};
use crate::models::FieldErrors;

/// Message used when the server rejected a call without saying why
const DEFAULT_REJECTION_MESSAGE: &str = "Authentication failed";

/// Message used when a request went out and nothing came back
const NO_RESPONSE_MESSAGE: &str = "No response from server. Please check your connection.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The server answered with an error status
    Rejected,
    /// The request was sent but no response arrived
    NoResponse,
    /// The request never left the client
    NotSent,
    /// Refresh was requested without a stored refresh token
    NoRefreshToken,
    /// The server answered 2xx with a body we could not use
    InvalidResponse,
    /// Credentials could not be written locally
    Storage,
}

/// Uniform error returned by every session operation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    /// HTTP status when the server answered
    pub status: Option<u16>,
    /// Field-level validation errors (empty when none)
    pub errors: FieldErrors,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            errors: FieldErrors::new(),
        }
    }

    pub fn no_refresh_token() -> Self {
        Self::new(AuthErrorKind::NoRefreshToken, "No refresh token available")
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::InvalidResponse, message)
    }

    pub fn storage(error: &anyhow::Error) -> Self {
        Self::new(
            AuthErrorKind::Storage,
            format!("Failed to save credentials: {}", error),
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }
}

impl From<ApiError> for AuthError {
    fn from(error: ApiError) -> Self {
        if let ApiError::Network(transport) = &error {
            return match transport {
                TransportError::NoResponse(_) => {
                    Self::new(AuthErrorKind::NoResponse, NO_RESPONSE_MESSAGE)
                }
                TransportError::NotSent(reason) => {
                    Self::new(AuthErrorKind::NotSent, reason.clone())
                }
            };
        }

        if let ApiError::InvalidResponse(reason) = &error {
            return Self::invalid_response(reason.clone());
        }

        let message = error
            .body()
            .and_then(|b| b.server_message())
            .unwrap_or(DEFAULT_REJECTION_MESSAGE)
            .to_string();

        Self {
            kind: AuthErrorKind::Rejected,
            message,
            status: error.status().map(|s| s.as_u16()),
            errors: error.field_errors().cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorBody;
    use reqwest::StatusCode;

    #[test]
    fn test_rejection_uses_server_message_and_status() {
        let api = ApiError::from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Invalid input","errors":{"email":["already taken"]}}"#,
        );
        let err = AuthError::from(api);
        assert_eq!(err.kind, AuthErrorKind::Rejected);
        assert_eq!(err.message, "Invalid input");
        assert_eq!(err.status, Some(422));
        assert_eq!(err.errors["email"], vec!["already taken".to_string()]);
    }

    #[test]
    fn test_rejection_without_message_uses_default() {
        let err = AuthError::from(ApiError::Unauthorized(ErrorBody::parse("")));
        assert_eq!(err.message, DEFAULT_REJECTION_MESSAGE);
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_no_response_and_not_sent_are_distinct() {
        let no_response = AuthError::from(ApiError::Network(TransportError::NoResponse(
            "connection refused".to_string(),
        )));
        assert_eq!(no_response.kind, AuthErrorKind::NoResponse);
        assert_eq!(no_response.message, NO_RESPONSE_MESSAGE);
        assert_eq!(no_response.status, None);

        let not_sent = AuthError::from(ApiError::Network(TransportError::NotSent(
            "invalid header".to_string(),
        )));
        assert_eq!(not_sent.kind, AuthErrorKind::NotSent);
        assert_eq!(not_sent.message, "invalid header");
    }
}
