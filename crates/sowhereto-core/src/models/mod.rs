//! Data models shared by the session manager and the gateway.
//!
//! - `User`: identity snapshot with the fields the client inspects, plus a
//!   passthrough bag for everything else the backend sends
//! - Auth request/response bodies for the `/auth/*` endpoints
//! - `ErrorBody`: the structured error object returned on failures

pub mod auth;
pub mod user;

pub use auth::{
    AuthResponse, BlacklistUpdate, ChangePasswordRequest, ErrorBody, FieldErrors,
    ForgotPasswordRequest, LoginRequest, MeResponse, MessageResponse, RefreshRequest,
    RefreshResponse, RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
};
pub use user::{User, UserId};
