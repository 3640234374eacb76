//! Core library for the So Where To? mystery travel client.
//!
//! Three collaborating pieces live here:
//!
//! - [`auth::SessionManager`]: owns the access/refresh tokens and the user
//!   snapshot, decides which storage tier they live in, and answers
//!   authentication and expiry queries.
//! - [`api::ApiClient`]: the single configured HTTP gateway. Attaches bearer
//!   credentials, classifies failures, and performs one automatic
//!   re-authentication retry per request.
//! - [`router::NavigationGuard`]: allow/deny/redirect decisions for route
//!   transitions based on the session state.
//!
//! None of them is a global. The application constructs them at start and
//! passes them to whatever needs them.

pub mod api;
pub mod auth;
pub mod config;
pub mod events;
pub mod models;
pub mod router;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
pub use auth::{AuthError, AuthErrorKind, CredentialRecord, Persistence, SessionManager, SessionStorage};
pub use config::Config;
pub use events::{AppEvent, EventBus, NoticeLevel};
pub use models::User;
pub use router::{GuardDecision, Location, NavigationGuard, RouteError, RouteTable, Transition};
