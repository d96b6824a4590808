use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flock_engine::{EngineError, FlockConfig, PeerRegistry, QueryExecutor, SqliteEngine};

pub mod auth;
pub mod encoder;
mod handler;
mod peers;
pub mod request;
pub mod response;

use auth::AuthGate;
use response::ResponseFormatter;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Clone)]
pub(crate) struct AppState {
    executor: QueryExecutor,
    auth: AuthGate,
    formatter: ResponseFormatter,
    stream_buffer: usize,
    peers: Option<PeerRegistry>,
}

fn router(state: AppState, base_path: &str) -> Router {
    let mut app = Router::new()
        .route("/ping", get(handler::ping))
        .route("/health", get(handler::ping));

    if state.peers.is_some() {
        app = app
            .route(
                "/discovery/{hash}",
                post(peers::register)
                    .get(peers::list)
                    .options(handler::preflight),
            )
            .route(
                "/discovery/{hash}/{peer_id}",
                delete(peers::remove).options(handler::preflight),
            )
            .route(
                "/discovery/{hash}/{peer_id}/heartbeat",
                post(peers::heartbeat).options(handler::preflight),
            );
    }

    app.route(
        base_path,
        get(handler::query)
            .post(handler::query)
            .options(handler::preflight),
    )
    .layer(middleware::map_response(handler::cors))
    .with_state(state)
}

/// Spawn the periodic expiry sweep; it ends when `shutdown` fires.
fn spawn_sweeper(
    peers: PeerRegistry,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let peers = peers.clone();
                    match tokio::task::spawn_blocking(move || peers.cleanup_expired()).await {
                        Ok(Ok(removed)) if removed > 0 => {
                            tracing::info!(removed, "expired peers removed");
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "peer expiry sweep failed"),
                        Err(e) => tracing::warn!(error = %e, "peer expiry sweep task failed"),
                    }
                }
            }
        }
    })
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

/// Handle owning the listener lifecycle.
///
/// `start` fails while a listener is running; `stop` is a no-op when none
/// is, and otherwise returns only after the listener and the sweep task
/// have exited.
#[derive(Default)]
pub struct HttpServer {
    running: Mutex<Option<RunningServer>>,
}

impl HttpServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `config.host:config.port` and start serving queries against
    /// `engine`. Returns the bound address (useful with port 0).
    pub async fn start(
        &self,
        config: &FlockConfig,
        engine: Arc<SqliteEngine>,
    ) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        config.validate()?;

        let peers = if config.discovery.enabled {
            Some(PeerRegistry::new(engine.clone())?)
        } else {
            None
        };

        let auth = AuthGate::new(config.auth_token());
        let auth_enabled = auth.enabled();
        let state = AppState {
            executor: QueryExecutor::new(engine),
            auth,
            formatter: ResponseFormatter::new(config.encoding_policy()),
            stream_buffer: config.stream_buffer,
            peers: peers.clone(),
        };
        let app = router(state, &config.base_path);

        let bind = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: bind, source })?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "http server failed");
            }
        });

        let sweeper = peers.map(|p| {
            spawn_sweeper(
                p,
                Duration::from_secs(config.discovery.sweep_interval_secs),
                shutdown.clone(),
            )
        });

        tracing::info!(
            addr = %addr,
            base_path = %config.base_path,
            auth = auth_enabled,
            discovery = config.discovery.enabled,
            "http server started"
        );

        *running = Some(RunningServer {
            addr,
            shutdown,
            server,
            sweeper,
        });
        Ok(addr)
    }

    /// Stop the listener and wait for it to exit.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            return;
        };

        server.shutdown.cancel();
        if let Err(e) = server.server.await {
            tracing::warn!(error = %e, "http server task ended abnormally");
        }
        if let Some(sweeper) = server.sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "sweep task ended abnormally");
            }
        }
        tracing::info!(addr = %server.addr, "http server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Address of the running listener.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|s| s.addr)
    }
}
