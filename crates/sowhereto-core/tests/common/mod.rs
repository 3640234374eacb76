//! Shared fixtures: a scripted backend and a fully wired client.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};

use sowhereto_core::events::AppEvent;
use sowhereto_core::{
    ApiClient, ApiRequest, ApiResponse, EventBus, NavigationGuard, RouteTable, SessionManager,
    SessionStorage, Transport, TransportError,
};

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// In-memory backend. Every request is logged, then answered by `handler`.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
    /// Artificial latency for `/auth/refresh`
    refresh_delay: Duration,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            refresh_delay: Duration::ZERO,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .map(|r| r.bearer)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().expect("lock").push(request.clone());
        if request.path == "/auth/refresh" && !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        (self.handler)(request)
    }
}

pub fn respond(status: u16, body: Value) -> Result<ApiResponse, TransportError> {
    let status = StatusCode::from_u16(status).expect("status");
    Ok(ApiResponse::new(status, body.to_string()))
}

/// Unsigned JWT-shaped token expiring `seconds` from now
pub fn token_expiring_in(seconds: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = chrono::Utc::now().timestamp() + seconds;
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": 1, "exp": exp}).to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn user_json(id: i64, email: &str) -> Value {
    json!({"id": id, "email": email, "firstName": "Ayanda", "lastName": "Nkosi", "blacklist": []})
}

/// Session manager, gateway and guard sharing one scripted backend
pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub storage: SessionStorage,
    pub session: Arc<SessionManager>,
    pub client: ApiClient,
    pub guard: NavigationGuard,
    pub events: EventBus,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        let transport = Arc::new(transport);
        let storage = SessionStorage::in_memory();
        let session = Arc::new(SessionManager::new(storage.clone(), transport.clone()));
        let events = EventBus::new(32);
        let client = ApiClient::new(transport.clone(), session.clone(), events.clone());
        let guard = NavigationGuard::new(session.clone(), RouteTable::default(), events.clone());
        Self {
            transport,
            storage,
            session,
            client,
            guard,
            events,
        }
    }
}

/// Everything published so far on `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
