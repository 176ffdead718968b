//! Access oracle seam.
//!
//! The queue never decides permissions itself. Handlers ask an
//! [`AccessOracle`] for a role on a container before calling into the queue
//! or the batch engine.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::containers::ContainerStore;
use crate::identifiers::ContainerReference;

/// Roles are ordered: holding `Admin` implies `ReadWrite` implies `ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "admin")]
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ReadOnly => write!(f, "ro"),
            Role::ReadWrite => write!(f, "rw"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

pub trait AccessOracle: Send + Sync {
    /// Operators bypass container checks and ownership checks.
    fn is_operator(&self, uid: &str) -> bool;

    fn has_access(&self, uid: &str, container: &ContainerReference, role: Role) -> bool;

    /// Bulk form: partitions `containers` into (granted, denied).
    fn partition_access(
        &self,
        uid: &str,
        containers: Vec<ContainerReference>,
        role: Role,
    ) -> (Vec<ContainerReference>, Vec<ContainerReference>) {
        if self.is_operator(uid) {
            return (containers, Vec::new());
        }
        containers
            .into_iter()
            .partition(|c| self.has_access(uid, c, role))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub uid: String,
    pub container: ContainerReference,
    pub role: Role,
}

/// In-memory grant table. Grants on a container are inherited by its
/// descendants when a container hierarchy is attached.
#[derive(Default)]
pub struct GrantTable {
    operators: RwLock<HashSet<String>>,
    grants: RwLock<HashMap<ContainerReference, HashMap<String, Role>>>,
    hierarchy: Option<Arc<dyn ContainerStore>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hierarchy(mut self, hierarchy: Arc<dyn ContainerStore>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn add_operator(&self, uid: impl Into<String>) {
        self.operators.write().insert(uid.into());
    }

    pub fn grant(&self, grant: Grant) {
        self.grants
            .write()
            .entry(grant.container)
            .or_default()
            .insert(grant.uid, grant.role);
    }

    fn direct_role(&self, uid: &str, container: &ContainerReference) -> Option<Role> {
        self.grants
            .read()
            .get(container)
            .and_then(|roles| roles.get(uid).copied())
    }
}

impl AccessOracle for GrantTable {
    fn is_operator(&self, uid: &str) -> bool {
        self.operators.read().contains(uid)
    }

    fn has_access(&self, uid: &str, container: &ContainerReference, role: Role) -> bool {
        if self.is_operator(uid) {
            return true;
        }

        let mut current = Some(container.clone());
        // Bounded walk: hierarchies are group → project → session → acquisition.
        for _ in 0..8 {
            let Some(node) = current else {
                break;
            };
            if let Some(held) = self.direct_role(uid, &node) {
                return held >= role;
            }
            current = self
                .hierarchy
                .as_ref()
                .and_then(|h| h.get(&node))
                .and_then(|c| c.parent);
        }
        false
    }
}
