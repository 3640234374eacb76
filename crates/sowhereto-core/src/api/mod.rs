//! Gateway to the So Where To? backend.
//!
//! [`Transport`] moves raw requests; [`ApiClient`] wraps it with bearer
//! attachment, one automatic re-authentication on 401, and broadcasting of
//! failures the UI should surface. Account endpoints live in `account`.

pub mod account;
pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::{ApiError, TransportError};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
