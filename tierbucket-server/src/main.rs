use tierbucket_server::{build_limiter, router, AppState, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        burst_size = config.bucket.burst_size(),
        refill_interval = ?config.bucket.refill_interval(),
        failure_policy = ?config.failure_policy,
        standby_mode = ?config.standby_mode,
        "configuration loaded"
    );

    let limiter = build_limiter(&config).await;
    let app = router(AppState::new(limiter, config.bucket, &config.request_key_field));

    let addr = config.bind_addr().await?;
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
