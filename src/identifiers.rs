//! Value types that address files and containers without touching storage.
//!
//! Container types are always the singular form (`acquisition`, never
//! `acquisitions`). Both constructors and deserialization enforce this.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::{AccessOracle, Role};
use crate::error::{QueueError, Result};

fn validate_container_type(container_type: &str) -> Result<()> {
    if container_type.is_empty() {
        return Err(QueueError::Validation(
            "container type must not be empty".to_string(),
        ));
    }
    if container_type.ends_with('s') {
        return Err(QueueError::Validation(format!(
            "container type cannot be plural: {}",
            container_type
        )));
    }
    Ok(())
}

fn validate_container_id(container_id: &str) -> Result<()> {
    if container_id.trim().is_empty() {
        return Err(QueueError::Validation(
            "container id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// A single file attached to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawFileReference")]
pub struct FileReference {
    pub container_type: String,
    pub container_id: String,
    pub filename: String,
}

#[derive(Deserialize)]
struct RawFileReference {
    container_type: String,
    container_id: String,
    filename: String,
}

impl TryFrom<RawFileReference> for FileReference {
    type Error = QueueError;

    fn try_from(raw: RawFileReference) -> Result<Self> {
        FileReference::new(raw.container_type, raw.container_id, raw.filename)
    }
}

impl FileReference {
    pub fn new(
        container_type: impl Into<String>,
        container_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self> {
        let container_type = container_type.into();
        let container_id = container_id.into();
        let filename = filename.into();
        validate_container_type(&container_type)?;
        validate_container_id(&container_id)?;
        if filename.is_empty() {
            return Err(QueueError::Validation(
                "filename must not be empty".to_string(),
            ));
        }
        Ok(Self {
            container_type,
            container_id,
            filename,
        })
    }

    pub fn container(&self) -> ContainerReference {
        ContainerReference::from(self)
    }

    pub fn check_access(&self, oracle: &dyn AccessOracle, uid: &str, role: Role) -> Result<()> {
        self.container().check_access(oracle, uid, role)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.container_type, self.container_id, self.filename
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawContainerReference")]
pub struct ContainerReference {
    pub container_type: String,
    pub container_id: String,
}

#[derive(Deserialize)]
struct RawContainerReference {
    container_type: String,
    container_id: String,
}

impl TryFrom<RawContainerReference> for ContainerReference {
    type Error = QueueError;

    fn try_from(raw: RawContainerReference) -> Result<Self> {
        ContainerReference::new(raw.container_type, raw.container_id)
    }
}

impl ContainerReference {
    pub fn new(container_type: impl Into<String>, container_id: impl Into<String>) -> Result<Self> {
        let container_type = container_type.into();
        let container_id = container_id.into();
        validate_container_type(&container_type)?;
        validate_container_id(&container_id)?;
        Ok(Self {
            container_type,
            container_id,
        })
    }

    /// Ask the oracle whether `uid` holds at least `role` on this container.
    pub fn check_access(&self, oracle: &dyn AccessOracle, uid: &str, role: Role) -> Result<()> {
        if oracle.has_access(uid, self, role) {
            Ok(())
        } else {
            Err(QueueError::Permission(format!(
                "user {} does not have {} access to {}",
                uid, role, self
            )))
        }
    }
}

impl From<&FileReference> for ContainerReference {
    fn from(file: &FileReference) -> Self {
        Self {
            container_type: file.container_type.clone(),
            container_id: file.container_id.clone(),
        }
    }
}

impl fmt::Display for ContainerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_type, self.container_id)
    }
}
