//! Wires the session manager, gateway and navigation guard together for one
//! run of the CLI.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use sowhereto_core::auth::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
use sowhereto_core::config::DurableBackend;
use sowhereto_core::{
    ApiClient, AppEvent, Config, EventBus, HttpTransport, NavigationGuard, NoticeLevel,
    RouteTable, SessionManager, SessionStorage, Transport,
};

/// Durable session file in the data directory
const SESSION_FILE: &str = "session.json";

pub struct App {
    pub config: Config,
    pub session: Arc<SessionManager>,
    pub client: ApiClient,
    pub guard: NavigationGuard,
    printer: JoinHandle<()>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let durable: Arc<dyn KeyValueStore> = match config.durable_backend {
            DurableBackend::File => {
                let path = config.data_dir()?.join(SESSION_FILE);
                Arc::new(FileStore::open(path).context("Failed to open session store")?)
            }
            DurableBackend::Keyring => Arc::new(KeyringStore::new()),
        };
        let storage = SessionStorage::new(durable, Arc::new(MemoryStore::new()));

        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(&config)?);
        let session = Arc::new(SessionManager::new(storage, transport.clone()));
        let events = EventBus::new(config.event_buffer);

        let client = ApiClient::new(transport, session.clone(), events.clone())
            .with_rate_limit_retries(config.max_rate_limit_retries);
        let guard = NavigationGuard::new(session.clone(), RouteTable::default(), events.clone());
        let printer = spawn_event_printer(&events);

        Ok(Self {
            config,
            session,
            client,
            guard,
            printer,
        })
    }

    /// Drop every publisher and wait for queued events to be printed
    pub async fn shutdown(self) {
        let App {
            printer,
            client,
            guard,
            ..
        } = self;
        drop(client);
        drop(guard);
        if let Err(e) = printer.await {
            debug!(error = %e, "Event printer ended abnormally");
        }
    }
}

/// Print broadcast events to stderr until every publisher is gone
fn spawn_event_printer(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::Forbidden { message }
        | AppEvent::NotFound { message }
        | AppEvent::RateLimited { message }
        | AppEvent::Network { message } => eprintln!("[error] {}", message),
        AppEvent::ServerError { status, message } => eprintln!("[error] {} ({})", message, status),
        AppEvent::SessionExpired { redirect } => eprintln!("[session] expired, continue at {}", redirect),
        AppEvent::Notice { level, message } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            eprintln!("[{}] {}", tag, message);
        }
        AppEvent::PageMeta { title, .. } => eprintln!("[page] {}", title),
    }
}
