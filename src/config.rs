use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::StorageConfig;

/// Queue tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Highest attempt number a non-forced retry may create. The orphan scan
    /// also fails a job instead of requeueing it once
    /// `attempt + reclaims` reaches this value.
    pub max_attempts: u32,
    /// How long a claimed job may stay running before the orphan scan
    /// presumes its worker dead.
    pub orphan_timeout: Duration,
    /// How often the node runs the orphan scan.
    pub reap_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            orphan_timeout: Duration::from_secs(100),
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_orphan_timeout(mut self, orphan_timeout: Duration) -> Self {
        self.orphan_timeout = orphan_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    /// JSON file with gears, containers, grants and operators loaded at boot.
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            seed_path: None,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_seed(mut self, path: PathBuf) -> Self {
        self.seed_path = Some(path);
        self
    }
}
