//! Boot-time seed data: gears, containers, grants and operators.
//!
//! ```json
//! {
//!   "operators": ["admin"],
//!   "gears": [{"name": "dcm-convert", "inputs": {...}, "config": {...}}],
//!   "containers": [{"container_type": "acquisition", "container_id": "a1", "files": [...]}],
//!   "grants": [{"uid": "alice", "container": {...}, "role": "rw"}]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::access::{Grant, GrantTable};
use crate::containers::{Container, MemoryContainerStore};
use crate::error::Result;
use crate::gears::{GearManifest, GearRegistry};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub gears: Vec<GearManifest>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Register everything. Stops at the first gear that fails to compile.
    pub fn apply(
        self,
        gears: &dyn GearRegistry,
        containers: &MemoryContainerStore,
        grants: &GrantTable,
    ) -> Result<()> {
        let (n_gears, n_containers, n_grants) =
            (self.gears.len(), self.containers.len(), self.grants.len());

        for manifest in self.gears {
            gears.upsert(manifest)?;
        }
        for container in self.containers {
            containers.insert(container);
        }
        for grant in self.grants {
            grants.grant(grant);
        }
        for uid in &self.operators {
            grants.add_operator(uid.clone());
        }

        tracing::info!(
            gears = n_gears,
            containers = n_containers,
            grants = n_grants,
            operators = self.operators.len(),
            "Seed data loaded"
        );
        Ok(())
    }
}
