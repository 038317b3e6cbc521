pub mod api;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod maintenance;
pub mod metrics_defs;
pub mod projector;
pub mod publisher;
pub mod reconciler;
pub mod resolver;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use api::{ApiError, HttpInstanceApi};
use config::{Config, PublisherConfig, StoreConfig};
use dispatch::Dispatcher;
use publisher::{LogPublisher, Publisher, WebhookPublisher};
use reconciler::Reconciler;
use snapshot::SnapshotFile;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::{DocumentStore, RoutingStore, StoreError};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("api client error: {0}")]
    Api(#[from] ApiError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RoutingStore>, StoreError> {
    let store = match config {
        StoreConfig::Memory => DocumentStore::in_memory(),
        StoreConfig::Filesystem {
            base_dir,
            filename,
            compression,
        } => DocumentStore::open(SnapshotFile::new(base_dir, filename, *compression))?,
    };
    Ok(Arc::new(store))
}

pub fn build_publisher(config: &PublisherConfig) -> Arc<dyn Publisher> {
    match config {
        PublisherConfig::Log => Arc::new(LogPublisher),
        PublisherConfig::Webhook { url } => Arc::new(WebhookPublisher::new(url.clone())),
    }
}

/// Runs the event worker and its admin listener until a shutdown signal.
pub async fn run(config: Config) -> Result<(), ServerError> {
    let store = open_store(&config.store)?;
    let api = HttpInstanceApi::new(
        &config.api.url,
        &config.api.token,
        &config.api.user_content_domain,
    )?;
    let publisher = build_publisher(&config.publisher);

    let dispatcher = Arc::new(Dispatcher::new(Reconciler::new(
        store,
        Arc::new(api),
        publisher,
    )));

    let ready = Arc::new(AtomicBool::new(false));
    let event_listener = TcpListener::bind(config.listener.addr()).await?;
    let admin_listener = TcpListener::bind(config.admin_listener.addr()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });
    let shutdown = |mut rx: watch::Receiver<()>| async move {
        let _ = rx.changed().await;
    };

    tracing::info!(
        listener = %config.listener.addr(),
        admin_listener = %config.admin_listener.addr(),
        prefetch = config.prefetch,
        "starting worker"
    );
    ready.store(true, Ordering::Relaxed);

    tokio::try_join!(
        server::serve(
            event_listener,
            server::router(dispatcher, config.prefetch),
            shutdown(shutdown_rx.clone()),
        ),
        server::serve(
            admin_listener,
            server::admin_router(ready),
            shutdown(shutdown_rx),
        ),
    )?;

    tracing::info!("worker stopped");
    Ok(())
}
