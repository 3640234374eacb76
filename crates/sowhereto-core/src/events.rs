//! Fire-and-forget application notifications.
//!
//! The gateway and the navigation guard publish here; the front end
//! subscribes and renders them (toasts, redirects, page title). Publishing
//! never blocks and never fails the caller, with or without subscribers.

use tokio::sync::broadcast;
use tracing::trace;

/// Redirect issued when the session cannot be recovered
pub const SESSION_EXPIRED_REDIRECT: &str = "/login?session=expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Forbidden { message: String },
    NotFound { message: String },
    RateLimited { message: String },
    ServerError { status: u16, message: String },
    Network { message: String },
    /// Session could not be refreshed; the UI should go to `redirect`.
    SessionExpired { redirect: String },
    Notice { level: NoticeLevel, message: String },
    PageMeta { title: String, description: Option<String> },
}

impl AppEvent {
    pub fn forbidden() -> Self {
        AppEvent::Forbidden {
            message: "You don't have permission to perform this action".to_string(),
        }
    }

    pub fn not_found() -> Self {
        AppEvent::NotFound {
            message: "Resource not found".to_string(),
        }
    }

    pub fn rate_limited() -> Self {
        AppEvent::RateLimited {
            message: "Too many requests. Please try again later.".to_string(),
        }
    }

    pub fn server_error(status: u16) -> Self {
        AppEvent::ServerError {
            status,
            message: "Server error. Please try again later.".to_string(),
        }
    }

    pub fn network() -> Self {
        AppEvent::Network {
            message: "Network error. Please check your connection.".to_string(),
        }
    }

    pub fn session_expired() -> Self {
        AppEvent::SessionExpired {
            redirect: SESSION_EXPIRED_REDIRECT.to_string(),
        }
    }

    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        AppEvent::Notice {
            level,
            message: message.into(),
        }
    }
}

/// Broadcast channel for [`AppEvent`]s. Clone is cheap and shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: AppEvent) {
        trace!(?event, "Publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
