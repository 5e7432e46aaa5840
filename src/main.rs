use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use findabug::api::{self, AppState};
use findabug::config::{Config, CONFIG_ENV};
use findabug::db::Database;
use findabug::logging;

/// Query server for the Find-A-Bug genomics database.
#[derive(Debug, Parser)]
#[command(name = "findabug", version)]
struct Args {
    /// Path to config file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides [server].bind)
    #[arg(long)]
    bind: Option<String>,

    /// GTDB release to serve (overrides [server].release)
    #[arg(long)]
    release: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // journald on Linux, rolling file otherwise
    let _ = logging::init(None);

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(release) = args.release {
        config.server.release = release;
    }

    let db = Database::open(&config.database).context("Failed to open database")?;
    let state = AppState::new(Arc::new(db), config.server.release, config.server.page_size);

    // The server never creates tables; queries against missing ones fail.
    for schema in [state.live(), state.history()] {
        let problems = schema.verify(state.db());
        if !problems.is_empty() {
            tracing::warn!("{} schema problems found; affected queries will fail", problems.len());
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        "Serving release {} on {}",
        config.server.release,
        config.server.bind
    );

    axum::serve(listener, api::router(state).into_make_service()).await?;
    Ok(())
}
