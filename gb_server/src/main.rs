//! GeoBrains authentication server.
//!
//! Serves login, email verification and session endpoints on top of the
//! authentication core, backed by PostgreSQL or an in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use gb_server::{
    api::{self, AppState, Backend},
    config::ServerConfig,
    logging, metrics,
};
use geobrains::auth::{LogMailer, NewAccount};
use geobrains::db::{Database, MemoryStore};
use pico_args::Arguments;
use tracing::info;

const HELP: &str = "\
Run the GeoBrains authentication server

USAGE:
  gb_server [OPTIONS]

OPTIONS:
  --bind         IP:PORT         Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url       URL             Database connection string  [default: env DATABASE_URL or postgres://postgres@localhost/geobrains]
  --seed         EMAIL:PASSWORD  Verified account to create (in-memory store only)

FLAGS:
  --memory-store                 Keep accounts and audit events in memory instead of PostgreSQL
  -h, --help                     Print help information

ENVIRONMENT:
  SERVER_BIND                    Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL                   PostgreSQL connection string
  JWT_SECRET                     JWT signing secret (required, at least 32 characters)
  PASSWORD_PEPPER                Password hashing pepper
  TRUSTED_PROXY_COUNT            Reverse proxies in front of the server [default: 0]
  PREFER_PROVIDER_HEADERS        Trust CDN client IP headers [default: false]
  METRICS_BIND                   Prometheus exporter address
  (See .env.example for all configuration options)
";

/// How often idle rate limit windows and stale request contexts are purged
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory_store: bool,
    seed: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory_store: pargs.contains("--memory-store"),
        seed: pargs.opt_value_from_str("--seed")?,
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    info!("Starting GeoBrains auth server at {}", config.bind);

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        info!("Prometheus metrics exported on {}", addr);
    }

    let mut memory = None;
    let backend = if args.memory_store {
        info!("Using in-memory store; nothing survives a restart");
        let store = Arc::new(MemoryStore::new());
        memory = Some(store.clone());
        Backend::Memory(store)
    } else {
        info!("Connecting to database");
        let db = Database::new(&config.database)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
        info!("Database connected successfully");
        Backend::Postgres(db)
    };

    let state = AppState::new(&config, backend, Arc::new(LogMailer))?;

    if let Some(seed) = args.seed {
        let store = memory
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--seed requires --memory-store"))?;
        seed_account(&state, store, &seed)?;
    }

    spawn_maintenance(state.clone());

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");

    Ok(())
}

/// Insert a verified account given as `email:password`
fn seed_account(state: &AppState, store: &MemoryStore, seed: &str) -> Result<(), Error> {
    let (email, password) = seed
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("--seed expects EMAIL:PASSWORD"))?;

    let account = store.insert_account(NewAccount {
        email: email.to_string(),
        name: None,
        password_hash: Some(state.auth.hash_password(password)?),
        email_verified_at: Some(chrono::Utc::now()),
    });
    info!("Seeded account {} ({})", account.id, account.email);
    Ok(())
}

fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            let windows = state.limiter.purge_idle();
            let contexts = state.contexts.purge_expired();
            if windows > 0 || contexts > 0 {
                tracing::debug!(windows, contexts, "Purged idle security state");
            }
        }
    });
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
