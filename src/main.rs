//! Player-count tracking API server.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playercount_backend::{
    api::create_router,
    build_state,
    config::{load_env, resolve_data_path, AppConfig},
};

#[derive(Parser, Debug)]
#[command(name = "playercount")]
#[command(about = "Tracks live game-show player counts and serves rollups")]
struct Args {
    /// Listen address
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<String>,

    /// Path to the SQLite sample database
    #[arg(long, env = "SAMPLES_DB_PATH")]
    db_path: Option<String>,

    /// tracing filter directive, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    init_tracing(args.log_filter.as_deref());

    let mut config = AppConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = resolve_data_path(Some(db_path), "playercount_samples.db");
    }

    info!(
        db = %config.db_path,
        lobby_api = config.lobby_api_url.is_some(),
        browser = ?config.browser.engine,
        tz_offset_minutes = config.tz_offset_minutes,
        "starting player-count backend"
    );

    let state = build_state(&config)?;
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(f) => tracing_subscriber::EnvFilter::new(f),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "playercount_backend=debug,playercount=debug,tower_http=info".into()),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
