//! erasure-cloud: outbound data-removal dispatch service
//!
//! Long-running service that:
//! - Dispatches erasure requests to data controllers over email or webform
//! - Runs queued webform submissions one job per worker pulse
//! - Keeps a hashed, signed proof trail of completed submissions
//! - Serves operator routes (shared secret) and public proof verification

mod api;
mod auth;
mod config;
mod crypto;
mod db;
mod dispatch;
mod dlq;
mod email;
mod error;
mod export;
mod guard;
mod jobs;
mod policy;
mod proof;
mod sla;
mod state;
mod worker;

#[cfg(test)]
mod testing;

use config::Config;
use error::BoxError;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "erasure_cloud=info,tower_http=info".into()),
    );
    if config.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(
        "Starting erasure-cloud (env: {}, signer: {:?})",
        config.environment,
        config.signer_backend
    );

    // Initialize application state
    let state = AppState::new(&config).await?;
    tracing::info!(
        key_id = %state.signer.key_id(),
        trusted_keys = state.keyring.len(),
        worker_id = %state.worker_id,
        "Application state ready"
    );

    let app = api::create_router(state);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("erasure-cloud HTTP listening on {http_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
