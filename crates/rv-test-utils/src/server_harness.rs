//! Test server harness for E2E testing
//!
//! Provides `TestRvServer` for spawning real Rendezvous server instances in
//! tests. Servers use the in-memory ledger unless one is passed in.

use metrics_exporter_prometheus::PrometheusHandle;
use rv_service::actors::{ActorMetrics, SessionDeps, SessionRegistryHandle};
use rv_service::auth::TokenSigner;
use rv_service::config::Config;
use rv_service::ledger::{InMemoryLedger, LedgerStore};
use rv_service::observability::metrics::init_metrics_recorder;
use rv_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Hex-encoded 32-byte secret used by every test server.
pub const TEST_TOKEN_SECRET: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Global metrics handle for test servers.
///
/// The Prometheus recorder can only be installed once per process, so later
/// servers share it (or fall back to an uninstalled recorder).
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            })
        })
        .clone()
}

/// Test harness for spawning a Rendezvous server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestRvServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRvServer {
    addr: SocketAddr,
    config: Config,
    ledger: Arc<dyn LedgerStore>,
    registry: SessionRegistryHandle,
    _handle: JoinHandle<()>,
}

impl TestRvServer {
    /// Spawn a server with default settings and an in-memory ledger.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(&[]).await
    }

    /// Spawn a server with extra environment-style settings, e.g.
    /// `("QUIZ_QUESTION_SECONDS", "1")`.
    pub async fn spawn_with_vars(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        Self::spawn_with_ledger(Arc::new(InMemoryLedger::new()), overrides).await
    }

    /// Spawn a server on top of an existing ledger.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_ledger(
        ledger: Arc<dyn LedgerStore>,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RV_TOKEN_SECRET".to_string(), TEST_TOKEN_SECRET.to_string()),
            ("RV_INSTANCE_ID".to_string(), "rv-test".to_string()),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let signer = Arc::new(
            TokenSigner::new(config.token_secret_bytes()?)
                .map_err(|e| anyhow::anyhow!("Failed to create token signer: {}", e))?,
        );

        let registry = SessionRegistryHandle::new(
            SessionDeps {
                ledger: Arc::clone(&ledger),
                signer: Arc::clone(&signer),
                settings: config.round_settings(),
                metrics: ActorMetrics::new(),
            },
            Duration::from_secs(1),
        );

        let state = Arc::new(AppState {
            registry: registry.clone(),
            ledger: Arc::clone(&ledger),
            signer,
            config: config.clone(),
        });

        // Build routes using rv-service's real route builder
        let app = routes::build_routes(state, test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            ledger,
            registry,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The ledger behind the server, for direct assertions.
    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.ledger)
    }

    /// The registry behind the server, for subscribing to session events.
    pub fn registry(&self) -> &SessionRegistryHandle {
        &self.registry
    }
}

impl Drop for TestRvServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.registry.cancel();
    }
}
