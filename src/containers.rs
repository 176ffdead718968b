//! Container hierarchy seam (groups → projects → sessions → acquisitions).

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::identifiers::{ContainerReference, FileReference};

/// A file attached to a container, as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    #[serde(flatten)]
    pub reference: ContainerReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ContainerReference>,
    #[serde(default)]
    pub archived: bool,
    /// Ids of the collections this container belongs to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub collections: BTreeSet<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Container {
    pub fn new(reference: ContainerReference) -> Self {
        Self {
            reference,
            label: None,
            parent: None,
            archived: false,
            collections: BTreeSet::new(),
            files: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: ContainerReference) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn in_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collections.insert(collection_id.into());
        self
    }

    pub fn with_file(mut self, file: FileEntry) -> Self {
        self.files.push(file);
        self
    }

    pub fn file_reference(&self, file: &FileEntry) -> FileReference {
        FileReference {
            container_type: self.reference.container_type.clone(),
            container_id: self.reference.container_id.clone(),
            filename: file.name.clone(),
        }
    }
}

pub trait ContainerStore: Send + Sync {
    fn get(&self, reference: &ContainerReference) -> Option<Container>;

    /// Resolve target containers to the containers of `wanted_type` at or
    /// beneath them. Archived containers are skipped unless asked for. With a
    /// `collection`, only members of that collection are returned.
    fn containers_for_targets(
        &self,
        targets: &[ContainerReference],
        wanted_type: &str,
        include_archived: bool,
        collection: Option<&str>,
    ) -> Vec<Container>;
}

#[derive(Debug, Default)]
pub struct MemoryContainerStore {
    containers: RwLock<HashMap<ContainerReference, Container>>,
}

impl MemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, container: Container) {
        self.containers
            .write()
            .insert(container.reference.clone(), container);
    }

    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.read().is_empty()
    }

    fn descends_from(
        containers: &HashMap<ContainerReference, Container>,
        container: &Container,
        ancestor: &ContainerReference,
    ) -> bool {
        let mut current = container.parent.as_ref();
        for _ in 0..8 {
            match current {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = containers.get(parent).and_then(|c| c.parent.as_ref()),
                None => return false,
            }
        }
        false
    }
}

impl ContainerStore for MemoryContainerStore {
    fn get(&self, reference: &ContainerReference) -> Option<Container> {
        self.containers.read().get(reference).cloned()
    }

    fn containers_for_targets(
        &self,
        targets: &[ContainerReference],
        wanted_type: &str,
        include_archived: bool,
        collection: Option<&str>,
    ) -> Vec<Container> {
        let containers = self.containers.read();
        let mut found: Vec<Container> = containers
            .values()
            .filter(|c| c.reference.container_type == wanted_type)
            .filter(|c| include_archived || !c.archived)
            .filter(|c| collection.map_or(true, |id| c.collections.contains(id)))
            .filter(|c| {
                targets.iter().any(|target| {
                    &c.reference == target || Self::descends_from(&containers, c, target)
                })
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.reference.cmp(&b.reference));
        found
    }
}
