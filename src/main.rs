mod api;
mod cli;
mod config;
mod crypto;
mod db;
mod entitlements;
mod error;
mod events;
mod idempotency;
mod integrations;
mod normalizer;
mod pipeline;
mod providers;
mod webhooks;

use clap::Parser;
use cli::Commands;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::Cli::parse();
    match args.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Apps { command }) => cli::handle_apps(command, &config).await,
        Some(Commands::Webhooks { command }) => cli::handle_webhooks(command, &config).await,
    }
}

async fn serve(config: config::Config) -> anyhow::Result<()> {
    tracing::info!("starting PayCat gateway");
    tracing::debug!(?config, "loaded configuration");

    let pool = db::initialize_db(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    if db::check_db_connection(&pool).await? {
        tracing::info!("connected to the database");
    } else {
        tracing::error!("failed to connect to the database");
        return Err(anyhow::anyhow!("failed to connect to the database"));
    }

    let state = Arc::new(api::AppState::new(pool.clone(), &config));

    tokio::spawn(webhooks::retry::run(
        state.http.clone(),
        pool.clone(),
        config.retry_sweep_interval_secs,
        config.retry_sweep_batch_size,
    ));

    let app = api::routes(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
