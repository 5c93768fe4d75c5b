//! Rendezvous Service
//!
//! HTTP and WebSocket gateway for collaborative fair selection.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the ledger (PostgreSQL when `DATABASE_URL` is set, else in-memory)
//! 4. Spawn the `SessionRegistry` actor
//! 5. Serve HTTP until SIGINT/SIGTERM, then drain and stop the actors

use rv_service::actors::{ActorMetrics, SessionDeps, SessionRegistryHandle};
use rv_service::auth::TokenSigner;
use rv_service::config::Config;
use rv_service::ledger::{InMemoryLedger, LedgerStore, PgLedger};
use rv_service::observability::metrics::init_metrics_recorder;
use rv_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for each session actor to stop.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the registry after the listener closes.
const REGISTRY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Rendezvous");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        instance_id = %config.instance_id,
        persistent = config.database_url.is_some(),
        quiz_question_seconds = config.quiz_question_seconds,
        result_lease_seconds = config.result_lease_seconds,
        duel_grace_seconds = config.duel_grace_seconds,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let ledger: Arc<dyn LedgerStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            info!("Connecting to database...");
            let ledger = PgLedger::connect(database_url).await.map_err(|e| {
                error!("Failed to connect to database: {}", e);
                e
            })?;
            info!("Database connection established");
            Arc::new(ledger)
        }
        None => {
            warn!("DATABASE_URL not set, selections will not survive a restart");
            Arc::new(InMemoryLedger::new())
        }
    };

    let signer = Arc::new(TokenSigner::new(config.token_secret_bytes()?).map_err(|e| {
        error!("Failed to initialize token signer: {}", e);
        e
    })?);

    let registry = SessionRegistryHandle::new(
        SessionDeps {
            ledger: Arc::clone(&ledger),
            signer: Arc::clone(&signer),
            settings: config.round_settings(),
            metrics: ActorMetrics::new(),
        },
        SESSION_DRAIN_TIMEOUT,
    );
    info!("Session registry started");

    let bind_address = config.bind_address.clone();
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState {
        registry: registry.clone(),
        ledger,
        signer,
        config,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Rendezvous listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_seconds))
    .await?;

    // Upgraded WebSocket connections outlive the listener. Cancelling the
    // registry ends open rounds with `round-cancelled` and closes them.
    registry.cancel();
    if tokio::time::timeout(REGISTRY_SHUTDOWN_TIMEOUT, registry.closed())
        .await
        .is_err()
    {
        warn!("Session registry did not stop in time");
    }

    info!("Rendezvous shutdown complete");

    Ok(())
}

/// `EnvFilter` from `RUST_LOG`, plain text unless `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rv_service=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// Returns when a signal is received and the drain period is complete.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (RV_DRAIN_SECONDS=0)");
    }
}
