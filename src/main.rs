use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use maestro::{AppState, ConfigManager};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "maestro-server", version, about = "Agent marketplace orchestrator")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "maestro.toml", env = "MAESTRO_CONFIG")]
    config: PathBuf,

    /// Allowed CORS origin; defaults to allowing any origin
    #[arg(long, env = "MAESTRO_CORS_ORIGIN")]
    cors_origin: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config_manager = Arc::new(
        ConfigManager::new(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?,
    );
    let config = config_manager.config();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::from_config((*config).clone())
        .await
        .context("building application state")?;

    let resumed = state.engine.clone().resume_pending().await?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed non-terminal orchestrations");
    }

    let cors = match &args.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>().context("invalid CORS origin")?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = maestro::api::routes::create_router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, "Maestro listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
