//! flightlog-server - squadron flight log and qualification currency service
//!
//! `serve` (the default) runs the HTTP API. The other subcommands run one
//! maintenance task against the same database and exit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use flightlog_common::config::Config;
use flightlog_common::db::init_database;
use flightlog_common::models::NewCrewMember;
use flightlog_common::{CrewType, RoleLevel};
use flightlog_server::services::bulk_exporter::sink_from_config;
use flightlog_server::services::legacy;
use flightlog_server::services::mailer::LogMailer;
use flightlog_server::{build_router, AppState};

/// Command-line arguments for flightlog-server
#[derive(Parser, Debug)]
#[command(name = "flightlog-server")]
#[command(about = "Squadron flight log and qualification currency service")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file
    #[arg(short, long, global = true, env = "FLIGHTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite connection URL (overrides config)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve,
    /// Rebuild the currency index from the full flight history
    Reprocess,
    /// Import flights from a legacy JSON dump
    ImportLegacy {
        /// JSON file holding an array of legacy flight records
        file: PathBuf,
    },
    /// Create a level-100 account
    CreateAdmin {
        #[arg(long)]
        nip: i64,
        #[arg(long)]
        name: String,
        #[arg(long, env = "FLIGHTLOG_ADMIN_PASSWORD")]
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    // Build identification first, before any database work
    info!(
        "Starting flightlog-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Environment: {:?}", config.environment);

    let pool = init_database(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    info!("✓ Database ready: {}", config.database_url);

    let sink = sink_from_config(&config.export);
    let mailer = Arc::new(LogMailer::new(&config.smtp));
    let state = AppState::build(pool, config, sink, mailer)
        .await
        .context("Failed to initialize services")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Reprocess => {
            let report = state.reprocess.rebuild_all().await.context("Rebuild failed")?;
            info!(
                "Rebuild finished: {}/{} flights, {} errors, {:.2}s",
                report.processed, report.total_flights, report.errors, report.duration_seconds
            );
            Ok(())
        }
        Command::ImportLegacy { file } => {
            let report = legacy::import_file(&state.flight_log, &file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            info!("Import finished: {} imported, {} failed", report.imported, report.failed);
            Ok(())
        }
        Command::CreateAdmin {
            nip,
            name,
            password,
            email,
        } => {
            let member = state
                .roster
                .create(NewCrewMember {
                    nip,
                    name,
                    rank: String::new(),
                    position: String::new(),
                    email,
                    crew_type: CrewType::Ops,
                    status: Default::default(),
                    role_level: RoleLevel::Admin,
                    password: Some(password),
                })
                .await
                .context("Failed to create admin account")?;
            info!("✓ Admin account {} ({}) created", member.nip, member.name);
            Ok(())
        }
    }
}

async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.bind_address, state.config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", state.config.bind_address))?;

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("flightlog-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e).context("Server error");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
