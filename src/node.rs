use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::access::GrantTable;
use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::containers::MemoryContainerStore;
use crate::error::Result;
use crate::gears::MemoryGearRegistry;
use crate::scheduler::{BatchEngine, Queue};
use crate::seed::Seed;
use crate::store::{self, Store};

/// One queue process: the store, the queue and batch engine built on it, the
/// in-memory collaborators, and the HTTP server in front of them.
pub struct Node {
    pub config: ServerConfig,
    pub store: Arc<dyn Store>,
    pub queue: Arc<Queue>,
    pub batches: Arc<BatchEngine>,
    pub gears: Arc<MemoryGearRegistry>,
    pub containers: Arc<MemoryContainerStore>,
    pub grants: Arc<GrantTable>,
}

impl Node {
    /// Open the store and load the seed file, if any.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store = store::open(&config.storage)?;
        let gears = Arc::new(MemoryGearRegistry::new());
        let containers = Arc::new(MemoryContainerStore::new());
        let grants = Arc::new(GrantTable::new().with_hierarchy(containers.clone()));

        if let Some(path) = &config.seed_path {
            Seed::load(path)?.apply(gears.as_ref(), &containers, &grants)?;
        }

        let queue = Arc::new(Queue::new(
            store.clone(),
            gears.clone(),
            config.queue.clone(),
        ));
        let batches = Arc::new(BatchEngine::new(
            store.clone(),
            queue.clone(),
            containers.clone(),
            grants.clone(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            batches,
            gears,
            containers,
            grants,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            queue: self.queue.clone(),
            batches: self.batches.clone(),
            gears: self.gears.clone(),
            containers: self.containers.clone(),
            oracle: self.grants.clone(),
            store: self.store.clone(),
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.state())
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// Spawns the orphan reaper and serves HTTP on the configured address.
    /// In-flight requests finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(self, shutdown: CancellationToken) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let reaper_queue = self.queue.clone();
        let reap_interval = self.config.queue.reap_interval;
        let reaper_shutdown = shutdown.clone();
        let reaper = tokio::spawn(async move {
            Self::reaper_loop(reaper_queue, reap_interval, reaper_shutdown).await;
        });

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "Starting HTTP server");

        let app = self.router();
        let server_shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await?;

        shutdown.cancel();
        let _ = reaper.await;
        tracing::info!("Node stopped");
        Ok(())
    }

    /// Periodically return orphaned jobs to the queue. Each scan runs on the
    /// blocking pool.
    async fn reaper_loop(queue: Arc<Queue>, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Reaper loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    let scan_queue = queue.clone();
                    match tokio::task::spawn_blocking(move || scan_queue.scan_for_orphans()).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(n)) => tracing::info!(reclaimed = n, "Reaper reclaimed orphaned jobs"),
                        Ok(Err(e)) => tracing::error!(error = %e, "Orphan scan failed"),
                        Err(e) => tracing::error!(error = %e, "Orphan scan task failed"),
                    }
                }
            }
        }
    }
}
