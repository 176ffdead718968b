use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::access::{AccessOracle, Role};
use crate::error::{QueueError, Result};
use crate::gears::GearRegistry;
use crate::identifiers::{ContainerReference, FileReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Running,
        JobState::Complete,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::Failed | JobState::Cancelled
        )
    }

    /// Transitions a caller may request through a mutation. Claiming
    /// (pending → running) and reclaiming are queue-internal.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Complete)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| QueueError::Validation(format!("unknown job state: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    User,
    Device,
    System,
    Unknown,
}

/// Who is responsible for a job or proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(rename = "type")]
    pub kind: OriginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Origin {
    pub fn user(uid: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::User,
            id: Some(uid.into()),
        }
    }

    pub fn system() -> Self {
        Self {
            kind: OriginKind::System,
            id: None,
        }
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.id.as_deref() == Some(uid)
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            kind: OriginKind::Unknown,
            id: None,
        }
    }
}

fn first_attempt() -> u32 {
    1
}

/// A job submission before it is validated against its gear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub gear: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, FileReference>,
    #[serde(default)]
    pub destination: Option<ContainerReference>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "first_attempt", alias = "attempt_n")]
    pub attempt: u32,
    #[serde(default)]
    pub previous_job_id: Option<Uuid>,
    /// Priority flag. Only honored for operator submissions.
    #[serde(default)]
    pub now: bool,
    #[serde(default)]
    pub analysis: Option<Value>,
    #[serde(skip)]
    pub batch_id: Option<Uuid>,
}

impl JobRequest {
    pub fn new(gear: impl Into<String>) -> Self {
        Self {
            gear: gear.into(),
            inputs: BTreeMap::new(),
            destination: None,
            config: Map::new(),
            tags: BTreeSet::new(),
            attempt: 1,
            previous_job_id: None,
            now: false,
            analysis: None,
            batch_id: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, file: FileReference) -> Self {
        self.inputs.insert(name.into(), file);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// The explicit destination, or the container of the first input.
    pub fn resolved_destination(&self) -> Option<ContainerReference> {
        self.destination.clone().or_else(|| {
            self.inputs
                .values()
                .next()
                .map(ContainerReference::from)
        })
    }

    /// Require read access on every input and write access on the destination.
    pub fn check_access(&self, oracle: &dyn AccessOracle, uid: &str) -> Result<()> {
        for file in self.inputs.values() {
            file.check_access(oracle, uid, Role::ReadOnly)?;
        }
        if let Some(destination) = self.resolved_destination() {
            destination.check_access(oracle, uid, Role::ReadWrite)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub gear_name: String,
    pub inputs: BTreeMap<String, FileReference>,
    pub destination: ContainerReference,
    pub config: Map<String, Value>,
    pub tags: BTreeSet<String>,
    pub state: JobState,
    pub attempt: u32,
    pub previous_job_id: Option<Uuid>,
    pub origin: Origin,
    pub now: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    /// Set when a worker claims the job; cleared when it is reclaimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Incremented on every claim. Identifies one claim exactly.
    #[serde(default)]
    pub claims: u32,
    /// Number of times the orphan scan returned this job to the queue.
    pub reclaims: u32,
    pub retried_by: Option<Uuid>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Job {
    /// Validate a submission against the gear registry and build a pending job.
    pub fn create(gears: &dyn GearRegistry, request: JobRequest, origin: Origin) -> Result<Self> {
        let destination = request.resolved_destination().ok_or_else(|| {
            QueueError::Validation(
                "job needs a destination or at least one input".to_string(),
            )
        })?;

        if request.attempt == 0 {
            return Err(QueueError::Validation(
                "attempt must be at least 1".to_string(),
            ));
        }
        if (request.attempt > 1) != request.previous_job_id.is_some() {
            return Err(QueueError::Validation(
                "previous_job_id must be set exactly when attempt > 1".to_string(),
            ));
        }

        let gear = gears.get(&request.gear)?;
        gear.validate_config(&request.config)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            gear_name: request.gear,
            inputs: request.inputs,
            destination,
            config: request.config,
            tags: request.tags,
            state: JobState::Pending,
            attempt: request.attempt,
            previous_job_id: request.previous_job_id,
            origin,
            now: request.now,
            analysis: request.analysis,
            batch_id: request.batch_id,
            claimed_at: None,
            claims: 0,
            reclaims: 0,
            retried_by: None,
            created: now,
            modified: now,
        })
    }

    /// The fresh pending job a retry of this one enqueues.
    pub fn successor(&self) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            gear_name: self.gear_name.clone(),
            inputs: self.inputs.clone(),
            destination: self.destination.clone(),
            config: self.config.clone(),
            tags: self.tags.clone(),
            state: JobState::Pending,
            attempt: self.attempt + 1,
            previous_job_id: Some(self.id),
            origin: self.origin.clone(),
            now: self.now,
            analysis: self.analysis.clone(),
            batch_id: self.batch_id,
            claimed_at: None,
            claims: 0,
            reclaims: 0,
            retried_by: None,
            created: now,
            modified: now,
        }
    }

    pub fn matches_tags(&self, filter: &[String]) -> bool {
        filter.is_empty() || filter.iter().any(|t| self.tags.contains(t))
    }

    pub fn check_access(&self, oracle: &dyn AccessOracle, uid: &str) -> Result<()> {
        for file in self.inputs.values() {
            file.check_access(oracle, uid, Role::ReadOnly)?;
        }
        self.destination.check_access(oracle, uid, Role::ReadWrite)
    }
}

/// Fields a caller may change on an existing job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl JobPatch {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            tags: None,
        }
    }

    /// Owners that are not operators may only send `{"state": "cancelled"}`.
    pub fn is_cancel_only(&self) -> bool {
        self.state == Some(JobState::Cancelled) && self.tags.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.tags.is_none()
    }
}
