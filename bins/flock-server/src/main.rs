use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use flock_api_server::HttpServer;
use flock_engine::{FlockConfig, SqliteEngine};

const DEFAULT_CONFIG: &str = "flock.toml";

#[derive(Parser)]
#[command(name = "flock-server", about = "HTTP query server over SQLite")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG, env = "FLOCK_CONFIG")]
    config: String,

    /// Listen address.
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(long, env = "FLOCK_PORT")]
    port: Option<u16>,

    /// Shared secret required from clients.
    #[arg(long, env = "FLOCK_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// SQLite database path, or `:memory:`.
    #[arg(long, env = "FLOCK_DATABASE")]
    database: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<FlockConfig, flock_engine::EngineError> {
        let mut config = if self.config == DEFAULT_CONFIG && !Path::new(DEFAULT_CONFIG).exists() {
            tracing::info!("no configuration file, using defaults");
            FlockConfig::default()
        } else {
            tracing::info!(config = %self.config, "loading configuration");
            FlockConfig::load(&self.config)?
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = &self.auth_token {
            config.auth_token = Some(token.clone());
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    tracing::info!(database = %config.database, "opening database");
    let engine = match SqliteEngine::open(&config.database) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let server = HttpServer::new();
    if let Err(e) = server.start(&config, engine).await {
        tracing::error!(error = %e, "failed to start http server");
        std::process::exit(1);
    }

    tracing::info!("flock-server started, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down...");
    server.stop().await;
}
