//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `SessionManager`: login/registration/logout, token refresh, and
//!   authentication/expiry queries
//! - `SessionStorage`: durable and ephemeral credential tiers
//! - `KeyringStore`: durable tier in the OS keychain
//! - Token helpers that read the expiry out of a bearer token
//!
//! Access tokens expire on their own `exp` claim; the refresh window is the
//! last 5 minutes of a token's life.

pub mod credentials;
pub mod error;
pub mod session;
pub mod storage;
pub mod token;

pub use credentials::KeyringStore;
pub use error::{AuthError, AuthErrorKind};
pub use session::{CredentialRecord, SessionManager};
pub use storage::{FileStore, KeyValueStore, MemoryStore, Persistence, SessionStorage};
pub use token::{
    decode_token, is_token_expired, is_token_expiring_soon, is_token_valid, token_expiry, TokenClaims,
};
