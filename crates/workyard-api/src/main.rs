//! Workyard API Server

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workyard_api::{AppState, routes};
use workyard_config::load_system_config;
use workyard_db::seed::seed_if_empty;
use workyard_db::{
    JobRepo, MemoryJobRepo, MemoryWorkerRepo, PgJobRepo, PgWorkerRepo, WorkerRepo, create_pool,
    run_migrations,
};
use workyard_events::EventBus;
use workyard_scheduler::{AssignmentTrigger, JobService, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "workyard-server")]
#[command(about = "Workyard job scheduler server", long_about = None)]
struct Args {
    /// Path to the system configuration file
    #[arg(long, env = "WORKYARD_CONFIG", default_value = "workyard.kdl")]
    config: PathBuf,

    /// Address to listen on, overriding the configuration file
    #[arg(long)]
    listen: Option<String>,

    /// Keep jobs and workers in memory instead of PostgreSQL
    #[arg(long)]
    memory: bool,

    /// Insert sample jobs and workers into an empty store
    #[arg(long)]
    seed: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = load_system_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env_overrides();
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    let (jobs, workers): (Arc<dyn JobRepo>, Arc<dyn WorkerRepo>) = if args.memory {
        info!("Using in-memory store");
        (
            Arc::new(MemoryJobRepo::new()),
            Arc::new(MemoryWorkerRepo::new()),
        )
    } else {
        info!("Connecting to database...");
        let pool = create_pool(&config.database.url, config.database.max_connections).await?;
        run_migrations(&pool).await?;
        info!("Database connected");
        (
            Arc::new(PgJobRepo::new(pool.clone())),
            Arc::new(PgWorkerRepo::new(pool)),
        )
    };

    if args.seed {
        seed_if_empty(jobs.as_ref(), workers.as_ref()).await?;
    }

    let events = Arc::new(EventBus::default());
    let supervisor = Supervisor::new(jobs, workers, events, config.scheduler.clone());
    let shutdown = CancellationToken::new();
    let trigger = AssignmentTrigger::new(supervisor.clone()).spawn(shutdown.clone());

    let state = AppState::new(JobService::new(supervisor.clone()), shutdown.clone());

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    info!("Starting server on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    trigger.await?;
    supervisor.shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        return shutdown.cancelled().await;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
