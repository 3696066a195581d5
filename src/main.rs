use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meteoswiss_core::{
    config::Config,
    hub::WeatherHub,
    providers::Upstream,
    retry::RetryPolicy,
    routes::{create_router, AppState},
    transport::ReqwestTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meteoswiss_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();

    let transport = Arc::new(ReqwestTransport::new()?);
    let upstream = Upstream::new(transport, RetryPolicy::default());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let hub = Arc::new(WeatherHub::connect(config, upstream, shutdown.child_token()).await?);
    hub.start();

    let app = create_router(AppState { hub: hub.clone() }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    hub.shutdown().await;
    Ok(())
}
