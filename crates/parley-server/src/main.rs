//! parley - streaming conversation server

mod api;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parley_ai::ConfiguredResolver;
use parley_engine::{
    ChatEngine, InMemoryConversationRepository, InMemoryMessageRepository,
    InMemorySummaryRepository,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::Config;

/// parley - streaming conversation server
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (default: ~/.config/parley/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    addr: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "parley=debug,parley_engine=debug,parley_ai=debug,tower_http=debug"
    } else {
        "parley=info,parley_engine=info,parley_ai=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config_path = args.config.unwrap_or_else(Config::config_path);

    if args.init_config {
        Config::init(&config_path)
            .with_context(|| format!("failed to create config at {}", config_path.display()))?;
        println!("Config file created at: {}", config_path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    if config.models.default.is_none()
        && config.models.workspaces.is_empty()
        && config.models.bots.is_empty()
    {
        tracing::warn!("no chat models configured; generation requests will fail");
    }

    let engine = ChatEngine::new(
        config.engine.clone(),
        Arc::new(InMemoryConversationRepository::new()),
        Arc::new(InMemoryMessageRepository::new()),
        Arc::new(InMemorySummaryRepository::new()),
        Arc::new(ConfiguredResolver::new(config.models.clone())),
        Arc::new(config.workspaces()),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(AppState {
        engine: Arc::new(engine),
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http());

    let addr = args.addr.unwrap_or(config.server.addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, config = %config_path.display(), "parley server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
