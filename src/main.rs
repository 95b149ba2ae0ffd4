//! Pustaka Server - library circulation engine
//!
//! REST API server for lending, returns, fines and reservations.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pustaka_server::{
    api,
    config::{AppConfig, LoggingConfig, StorageBackend},
    repository::{memory::MemoryStore, settings::SettingsRepository, CirculationStore, Repository},
    services::{
        audit::{AuditSink, PgAuditSink, TracingAuditSink},
        clock::{Clock, SystemClock},
        engine::EngineContext,
        events::{run_dispatcher, EventBus},
        notifier::{EmailNotifier, FanOutNotifier, InAppNotifier, LogNotifier, NotificationDispatcher},
        policy::{CirculationPolicy, EngineTuning, PolicyHandle},
        sweep::run_sweeper,
        Services,
    },
    AppState,
};

/// Store and collaborators selected by `database.backend`
struct Backend {
    store: Arc<dyn CirculationStore>,
    settings: Option<SettingsRepository>,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.logging);

    tracing::info!("Starting Pustaka Server v{}", env!("CARGO_PKG_VERSION"));

    let policy = CirculationPolicy::from(&config.circulation);
    policy.validate().context("Invalid circulation configuration")?;

    let backend = connect_backend(&config).await?;

    // Audit and notifications run beside the engine, never inside its transactions
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (events, event_rx) = EventBus::new();
    tokio::spawn(run_dispatcher(event_rx, clock.clone(), backend.notifier, backend.audit));

    let ctx = EngineContext::new(
        backend.store,
        clock,
        PolicyHandle::new(policy),
        events,
        EngineTuning::from(&config.circulation),
    );
    let services = Services::new(ctx, backend.settings);
    services
        .settings
        .load()
        .await
        .context("Failed to load stored circulation settings")?;

    if config.sweeper.enabled {
        let every = Duration::from_secs(config.sweeper.interval_secs.max(1));
        tokio::spawn(run_sweeper(services.sweeper.clone(), every));
        tracing::info!(interval_secs = every.as_secs(), "Circulation sweeper started");
    }

    // Save server address before moving config
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = api::router(state);

    let addr = SocketAddr::new(
        server_host.parse().context("Invalid host address")?,
        server_port,
    );

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pustaka_server={},audit=info,tower_http=debug", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_backend(config: &AppConfig) -> anyhow::Result<Backend> {
    match config.database.backend {
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database migrations completed");

            let repository = Repository::new(pool);
            let mut channels: Vec<Arc<dyn NotificationDispatcher>> =
                vec![Arc::new(InAppNotifier::new(repository.notifications.clone()))];
            if config.email.enabled {
                channels.push(Arc::new(EmailNotifier::new(
                    config.email.clone(),
                    repository.notifications.clone(),
                )));
            }

            Ok(Backend {
                settings: Some(repository.settings.clone()),
                notifier: Arc::new(FanOutNotifier::new(channels)),
                audit: Arc::new(PgAuditSink::new(repository.audit_logs.clone())),
                store: Arc::new(repository),
            })
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-process store; circulation state is lost on restart");
            Ok(Backend {
                store: Arc::new(MemoryStore::new()),
                settings: None,
                notifier: Arc::new(LogNotifier),
                audit: Arc::new(TracingAuditSink),
            })
        }
    }
}
