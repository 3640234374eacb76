//! The HTTP gateway every backend call goes through.
//!
//! Outgoing requests get the current bearer token attached. Responses are
//! classified by status: a first 401 triggers one refresh-and-resend, other
//! failures are broadcast on the [`EventBus`] and handed back to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
use crate::auth::SessionManager;
use crate::config::Config;
use crate::events::{AppEvent, EventBus};

/// Automatic re-authentication attempts per request.
/// One: a refresh that still yields 401 will not fix itself.
const MAX_AUTH_RETRIES: u32 = 1;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Ceiling for the doubled backoff delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Gateway for backend calls.
/// Clone is cheap - transport, session and event bus are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    events: EventBus,
    max_rate_limit_retries: u32,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionManager>, events: EventBus) -> Self {
        Self {
            transport,
            session,
            events,
            max_rate_limit_retries: 0,
        }
    }

    /// Build a reqwest-backed gateway from configuration
    pub fn from_config(config: &Config, session: Arc<SessionManager>, events: EventBus) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), session, events)
            .with_rate_limit_retries(config.max_rate_limit_retries))
    }

    /// Retry 429 responses up to `retries` times with exponential backoff
    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Send a request through the interceptor pipeline.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut auth_retries = 0;
        let mut rate_limit_retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let token = self.session.token();
            let outgoing = request.clone().bearer(token.clone());
            debug!(
                method = %outgoing.method,
                path = %outgoing.path,
                authenticated = token.is_some(),
                attempt = auth_retries + rate_limit_retries + 1,
                "API request"
            );

            let response = match self.transport.send(&outgoing).await {
                Ok(response) => response,
                Err(e) => return Err(self.transport_failure(&outgoing, e)),
            };

            let status = response.status;
            if status.is_success() {
                debug!(status = %status, path = %outgoing.path, "API response");
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED && auth_retries < MAX_AUTH_RETRIES {
                auth_retries += 1;
                match self.session.refresh_after(token.as_deref()).await {
                    Ok(_) => {
                        debug!(path = %outgoing.path, "Token refreshed, resending request");
                        continue;
                    }
                    Err(e) => {
                        warn!(path = %outgoing.path, error = %e, "Re-authentication failed, ending session");
                        self.session.clear();
                        self.events.publish(AppEvent::session_expired());
                        return Err(ApiError::from_status(status, &response.body));
                    }
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS && rate_limit_retries < self.max_rate_limit_retries {
                rate_limit_retries += 1;
                warn!(path = %outgoing.path, retry = rate_limit_retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                continue;
            }

            let error = ApiError::from_status(status, &response.body);
            warn!(status = %status, path = %outgoing.path, error = %error, "API request failed");
            self.broadcast(&error);
            return Err(error);
        }
    }

    /// Send without credentials: no bearer, and a 401 goes straight back to
    /// the caller instead of touching the session. Other failures are
    /// broadcast as usual.
    pub async fn send_anonymous(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let outgoing = request.bearer(None);
        debug!(method = %outgoing.method, path = %outgoing.path, "Anonymous API request");

        let response = match self.transport.send(&outgoing).await {
            Ok(response) => response,
            Err(e) => return Err(self.transport_failure(&outgoing, e)),
        };
        if response.status.is_success() {
            return Ok(response);
        }

        let error = ApiError::from_status(response.status, &response.body);
        warn!(status = %response.status, path = %outgoing.path, error = %error, "API request failed");
        self.broadcast(&error);
        Err(error)
    }

    fn transport_failure(&self, request: &ApiRequest, error: TransportError) -> ApiError {
        warn!(method = %request.method, path = %request.path, error = %error, "No response from API");
        if matches!(error, TransportError::NoResponse(_)) {
            self.events.publish(AppEvent::network());
        }
        ApiError::Network(error)
    }

    /// Let observers know about failures the UI should surface
    fn broadcast(&self, error: &ApiError) {
        let event = match error {
            ApiError::AccessDenied(_) => AppEvent::forbidden(),
            ApiError::NotFound(_) => AppEvent::not_found(),
            ApiError::RateLimited(_) => AppEvent::rate_limited(),
            ApiError::ServerError(status, _) => AppEvent::server_error(status.as_u16()),
            _ => return,
        };
        self.events.publish(event);
    }

    // ===== Typed helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |request, (key, value)| request.query(*key, *value));
        self.send(request).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }
}
