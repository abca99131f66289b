//! note-daemon: Collaborative note editing daemon.
//!
//! Serves single-writer WebSocket edit sessions over notes stored across
//! PostgreSQL (ordered lines), MongoDB (line properties) and Redis (session
//! locks).

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use note_core::service::NoteService;
use note_core::session::SessionConfig;

use note_daemon::http::{router, EditState};
use note_daemon::mongo::MongoPropertyStore;
use note_daemon::postgres::{PostgresContentStore, PostgresLineStore};
use note_daemon::redis_lock::RedisSessionLock;

#[derive(Parser, Debug)]
#[command(name = "note-daemon")]
#[command(about = "Collaborative note editing daemon")]
struct Args {
    /// Address to listen on for edit-session connections
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "NOTE_LISTEN")]
    listen: String,

    /// PostgreSQL connection string for the line store
    #[arg(long, env = "NOTE_POSTGRES")]
    postgres: String,

    /// MongoDB connection string for the property store
    #[arg(long, env = "NOTE_MONGODB")]
    mongodb: String,

    /// MongoDB database holding the property collection
    #[arg(long, default_value = "note", env = "NOTE_MONGODB_DB")]
    mongodb_db: String,

    /// Redis connection string for the session lock store
    #[arg(long, env = "NOTE_REDIS")]
    redis: String,

    /// Seconds an idle session may keep its lock before being closed
    #[arg(long, default_value_t = 1800, env = "NOTE_SESSION_DEADLINE_SECONDS")]
    session_deadline: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,note_daemon=debug"
    } else {
        "info,note_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting note-daemon");
    info!("Listen address: {}", args.listen);

    let lines = PostgresLineStore::connect(&args.postgres).await?;
    lines.ensure_schema().await?;

    let contents = PostgresContentStore::connect(&args.postgres).await?;
    contents.ensure_schema().await?;

    let properties = MongoPropertyStore::connect(&args.mongodb, &args.mongodb_db).await?;
    properties.ensure_indexes().await?;

    let lock = RedisSessionLock::connect(&args.redis).await?;

    info!("Stores connected, schema ensured");

    let state = EditState {
        service: Arc::new(NoteService::new(lines, properties, contents)),
        lock: Arc::new(lock),
        config: SessionConfig::new(Duration::from_secs(args.session_deadline)),
    };

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("Edit sessions available on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("Shutting down");
    Ok(())
}
