use anyhow::Result;
use dog_media::{MediaAdapter, MediaConfig, MemoryMetadataStore};
use dog_media_axum::{media_router, MediaState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = MediaConfig::from_env()?;
    info!(root = %config.store_root.display(), staging = %config.staging_dir.display(), "Media store");

    let state = MediaState::new(MediaAdapter::new(config, MemoryMetadataStore::new()));
    let reaper = state.media.spawn_reaper();

    let host = std::env::var("HTTP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("HTTP_PORT").unwrap_or_else(|_| "3037".to_string());
    let addr = format!("{host}:{port}");

    println!("[media] listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, media_router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    reaper.shutdown().await;
    state.media.shutdown().await;
    Ok(())
}
