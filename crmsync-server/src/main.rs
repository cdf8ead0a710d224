//! CRM Sync Server
//!
//! Webhook broker between a CRM and an analytics sink, with the consumer
//! that turns delivered change events into sink data points.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::file::StorageBackend;
use config::{ConfigLoader, get_database_url};
use crmsync_core::processors::HttpDeliveryClient;
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::{AppState, Stores};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// CRM Sync - webhook broker and analytics consumer
#[derive(Parser, Debug)]
#[command(name = "crmsync-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./crmsync-config.toml", env = "CRMSYNC_CONFIG")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting crmsync-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let (stores, db_pool) = match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            (Stores::memory(config.retention), None)
        }
        StorageBackend::Postgres => {
            let database_url = get_database_url().map_err(|e| {
                tracing::error!("DATABASE_URL environment variable not set");
                e
            })?;

            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            if args.migrate {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("../migrations")
                    .run(&db_pool)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to run migrations: {}", e);
                        e
                    })?;
                tracing::info!("Migrations completed successfully");
            }
            (
                Stores::postgres(db_pool.clone(), config.retention),
                Some(db_pool),
            )
        }
    };

    let transport = Arc::new(HttpDeliveryClient::new(config.broker.delivery_timeout)?);
    let pipeline = AppState::assemble(&config, stores, transport)?;
    let state = pipeline.state;

    // Processors
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut processors = tokio::task::JoinSet::new();
    processors.spawn(
        pipeline
            .dispatcher
            .run(shutdown_rx.clone(), pipeline.change_events),
    );
    if let Some(pool) = pipeline.worker_pool {
        processors.spawn(pool.run(shutdown_rx.clone()));
    } else {
        tracing::info!("Consumer disabled");
    }

    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    let router = build_router(state);
    tracing::info!("Starting HTTP server on {}", config.listen);
    let result = run_server(router, config.listen).await;

    // Stop processors and let in-flight work settle
    tracing::info!("Stopping processors...");
    let _ = shutdown_tx.send(true);
    while processors.join_next().await.is_some() {}
    reload_notify.notify_one();

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
