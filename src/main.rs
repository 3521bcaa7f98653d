mod classifier;
mod config;
mod error;
mod handlers;
mod metrics;
mod models;
mod rate_limit;
mod routes;
mod security;
mod state;
mod upload;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::classifier::{ModelHandle, ModelSource, load_classifier};
use crate::config::{Args, DEFAULT_LOG_DIRECTIVES, LogFormat, load_env_file};
use crate::metrics::Metrics;
use crate::rate_limit::{DEFAULT_WINDOW, RateLimiter, run_sweeper};
use crate::routes::{HttpPolicy, build_router};
use crate::state::AppState;
use crate::upload::UploadValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` has to be in the environment before clap reads its `env` fallbacks
    let env_file = load_env_file();
    let args = Args::parse();
    setup_logging(args.log_format)?;

    match env_file {
        Ok(Some(path)) => tracing::info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to read .env file: {e}"),
    }

    // A missing or broken model degrades /analyze to 503 instead of aborting
    let client = reqwest::Client::new();
    let model: ModelHandle = match load_classifier(&client, &ModelSource::from(&args)).await {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::error!("Failed to set up model: {e}");
            tracing::warn!(
                "Model could not be loaded. Service will run with limited functionality."
            );
            None
        }
    };

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit_per_minute, DEFAULT_WINDOW));
    tokio::spawn(run_sweeper(rate_limiter.clone(), args.sweep_interval()));

    let state = Arc::new(AppState::new(
        rate_limiter,
        model,
        UploadValidator::new(args.max_upload_bytes()),
        Metrics::new().context("Failed to create metrics registry")?,
    ));
    let model_loaded = state.model_loaded();

    let router = build_router(state, &HttpPolicy::try_from(&args)?)?;

    let addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Classifier running on http://{addr}");
    tracing::info!("├ Model loaded: {model_loaded}");
    tracing::info!("├ Max upload size: {} MB", args.max_file_size_mb);
    tracing::info!("├ Allowed origins: {}", args.allowed_origins.join(", "));
    tracing::info!("├ Allowed hosts: {}", args.allowed_hosts.join(", "));
    tracing::info!(
        "└ Rate limit: {} requests per {} seconds",
        args.rate_limit_per_minute,
        DEFAULT_WINDOW.as_secs()
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

fn setup_logging(log_format: LogFormat) -> anyhow::Result<()> {
    // `RUST_LOG` wins over the built-in directives when set
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().context("Invalid `RUST_LOG`")?,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}
