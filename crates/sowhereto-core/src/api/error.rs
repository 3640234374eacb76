use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{ErrorBody, FieldErrors};

/// Failure below HTTP: nothing usable came back.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Request could not be sent: {0}")]
    NotSent(String),

    #[error("No response from server: {0}")]
    NoResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::NotSent(e.to_string())
        } else {
            TransportError::NoResponse(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized(ErrorBody),

    #[error("Access denied: {}", .0.summary())]
    AccessDenied(ErrorBody),

    #[error("Resource not found: {}", .0.summary())]
    NotFound(ErrorBody),

    #[error("Validation failed: {}", .0.summary())]
    Validation(ErrorBody),

    #[error("Rate limited - please wait before retrying")]
    RateLimited(ErrorBody),

    #[error("Server error ({}): {}", .0, .1.summary())]
    ServerError(StatusCode, ErrorBody),

    #[error("Request rejected ({}): {}", .0, .1.summary())]
    Rejected(StatusCode, ErrorBody),

    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = ErrorBody::parse(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            422 => ApiError::Validation(body),
            429 => ApiError::RateLimited(body),
            500..=599 => ApiError::ServerError(status, body),
            _ => ApiError::Rejected(status, body),
        }
    }

    /// Originating HTTP status, when a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::Validation(_) => Some(StatusCode::UNPROCESSABLE_ENTITY),
            ApiError::RateLimited(_) => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::ServerError(status, _) | ApiError::Rejected(status, _) => Some(*status),
            ApiError::Network(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    /// Parsed server error body, when a response was received
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::Validation(body)
            | ApiError::RateLimited(body)
            | ApiError::ServerError(_, body)
            | ApiError::Rejected(_, body) => Some(body),
            ApiError::Network(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    /// Field-level validation errors attached to a 422
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation(body) => Some(&body.errors),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, ""), ApiError::AccessDenied(_)));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "{}"), ApiError::Validation(_)));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited(_)));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_GATEWAY, ""), ApiError::ServerError(..)));
        assert!(matches!(ApiError::from_status(StatusCode::CONFLICT, ""), ApiError::Rejected(..)));
    }

    #[test]
    fn test_validation_exposes_field_errors() {
        let err = ApiError::from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"errors":{"email":["already taken"]}}"#,
        );
        let errors = err.field_errors().expect("field errors");
        assert_eq!(errors["email"], vec!["already taken".to_string()]);
        assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn test_status_variants_display_code_and_message() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, r#"{"message":"upstream down"}"#);
        assert_eq!(err.to_string(), "Server error (502 Bad Gateway): upstream down");
        let err = ApiError::from_status(StatusCode::CONFLICT, r#"{"message":"Already booked"}"#);
        assert_eq!(err.to_string(), "Request rejected (409 Conflict): Already booked");
    }

    #[test]
    fn test_network_error_has_no_status() {
        let err = ApiError::from(TransportError::NoResponse("timed out".to_string()));
        assert_eq!(err.status(), None);
        assert!(err.body().is_none());
        assert!(err.field_errors().is_none());
    }
}
