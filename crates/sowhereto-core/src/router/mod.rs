//! Route table and navigation guard.
//!
//! Every transition is checked against the session: protected routes send
//! signed-out users to login (remembering where they were going), guest-only
//! routes send signed-in users home. Page metadata of the final route is
//! published on the event bus.

pub mod guard;
pub mod routes;

use thiserror::Error;

pub use guard::{GuardDecision, NavigationGuard, Transition};
pub use routes::{Layout, Location, ResolvedRoute, RouteDef, RouteMeta, RouteTable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid navigation target: {0}")]
    InvalidTarget(String),

    #[error("Redirect loop while navigating to {0}")]
    RedirectLoop(String),
}
