use statscache::{router, AppState, FileStore, HttpFetcher, ServerConfig, StatsCache};
use std::{net::SocketAddr, sync::Arc};
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = ServerConfig::from_env();
    fs::create_dir_all(&config.data_dir).await?;

    let fetcher = Arc::new(HttpFetcher::new(
        config.cache.base_url.clone(),
        config.cache.events_url.clone(),
    ));
    let store = Arc::new(FileStore::new(config.data_dir.clone()));
    let cache = StatsCache::open(
        config.cache.clone(),
        config.product.metric_table(),
        fetcher,
        store,
    )
    .await?;
    info!(upstream = %config.cache.base_url, scope = %config.cache.scope, "stats cache ready");

    let app = router(AppState::new(cache.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.flush().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown: {err}");
        return;
    }
    info!("shutting down, saving local stats data");
}
