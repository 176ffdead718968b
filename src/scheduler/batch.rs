//! Batch proposals: one gear invocation fanned out over many containers.
//!
//! A proposal is created `pending` with the matched per-container inputs,
//! `run` turns it into jobs and moves it to `launched`, and `cancel` stops
//! the jobs that have not been claimed yet. A launched proposal whose jobs
//! have all finished is reported as `complete`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::access::{AccessOracle, Role};
use crate::containers::{Container, ContainerStore};
use crate::error::{QueueError, Result};
use crate::gears::GearRegistry;
use crate::identifiers::{ContainerReference, FileReference};
use crate::scheduler::job::{Job, JobRequest, JobState, Origin};
use crate::scheduler::matcher::{find_matching_containers, MatchedContainer};
use crate::scheduler::queue::Queue;
use crate::store::Store;

/// Proposals always fan out over acquisitions.
pub const BATCH_CONTAINER_TYPE: &str = "acquisition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Launched,
    Cancelled,
    Complete,
}

impl BatchState {
    pub const ALL: [BatchState; 4] = [
        BatchState::Pending,
        BatchState::Launched,
        BatchState::Cancelled,
        BatchState::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Launched => "launched",
            BatchState::Cancelled => "cancelled",
            BatchState::Complete => "complete",
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        BatchState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| QueueError::Validation(format!("unknown batch state: {}", s)))
    }
}

/// The job template and matched inputs. Present only while pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub inputs: Vec<BTreeMap<String, FileReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProposal {
    pub id: Uuid,
    pub gear: String,
    pub config: Map<String, Value>,
    pub state: BatchState,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ProposalPayload>,
    #[serde(default)]
    pub jobs: Vec<Uuid>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl BatchProposal {
    pub fn new(
        gear: impl Into<String>,
        config: Map<String, Value>,
        origin: Origin,
        payload: ProposalPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            gear: gear.into(),
            config,
            state: BatchState::Pending,
            origin,
            proposal: Some(payload),
            jobs: Vec::new(),
            created: now,
            modified: now,
        }
    }

    /// Owners are the proposal's origin; operators pass too.
    pub fn check_owner(&self, oracle: &dyn AccessOracle, uid: &str) -> Result<()> {
        if oracle.is_operator(uid) || self.origin.is_owned_by(uid) {
            Ok(())
        } else {
            Err(QueueError::Permission(format!(
                "user {} does not have permission to access batch {}",
                uid, self.id
            )))
        }
    }
}

/// Restricts target resolution to the members of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContext {
    pub id: String,
}

/// Body of a proposal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub gear: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub targets: Vec<ContainerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_context: Option<TargetContext>,
    #[serde(default)]
    pub analysis: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// What a proposal request found, whether or not a proposal was stored.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalOutcome {
    #[serde(flatten)]
    pub proposal: Option<BatchProposal>,
    pub matched: Vec<MatchedContainer>,
    pub not_matched: Vec<ContainerReference>,
    pub ambiguous: Vec<ContainerReference>,
    pub improper_permissions: Vec<ContainerReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub index: usize,
    pub error: String,
}

/// Result of launching a proposal. Jobs that were created stay enqueued even
/// when other entries failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub jobs: Vec<Uuid>,
    pub failures: Vec<RunFailure>,
}

pub struct BatchEngine {
    store: Arc<dyn Store>,
    queue: Arc<Queue>,
    containers: Arc<dyn ContainerStore>,
    oracle: Arc<dyn AccessOracle>,
}

impl BatchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<Queue>,
        containers: Arc<dyn ContainerStore>,
        oracle: Arc<dyn AccessOracle>,
    ) -> Self {
        Self {
            store,
            queue,
            containers,
            oracle,
        }
    }

    fn gears(&self) -> &Arc<dyn GearRegistry> {
        self.queue.gears()
    }

    /// Match the targets' acquisitions against the gear and store a pending
    /// proposal when at least one matched.
    pub fn propose(&self, uid: &str, request: BatchRequest) -> Result<ProposalOutcome> {
        if request.targets.is_empty() {
            return Err(QueueError::Validation(
                "a gear name and list of target containers is required".to_string(),
            ));
        }
        let gear = self.gears().get(&request.gear)?;
        gear.validate_config(&request.config)?;
        if gear.file_inputs().next().is_none() {
            return Err(QueueError::Validation(format!(
                "gear {} has no file inputs to match",
                request.gear
            )));
        }

        let target_type = &request.targets[0].container_type;
        if request
            .targets
            .iter()
            .any(|t| &t.container_type != target_type)
        {
            return Err(QueueError::Validation(
                "targets must all be of same type".to_string(),
            ));
        }

        let collection = request.target_context.as_ref().map(|ctx| ctx.id.as_str());
        let candidates = self.containers.containers_for_targets(
            &request.targets,
            BATCH_CONTAINER_TYPE,
            false,
            collection,
        );
        if candidates.is_empty() {
            return Err(QueueError::ContainerNotFound(
                "could not find acquisitions from targets".to_string(),
            ));
        }

        let references: Vec<ContainerReference> =
            candidates.iter().map(|c| c.reference.clone()).collect();
        let (permitted, improper_permissions) =
            self.oracle
                .partition_access(uid, references, Role::ReadWrite);
        if permitted.is_empty() {
            return Err(QueueError::Permission(format!(
                "user {} does not have write access to targets",
                uid
            )));
        }
        let permitted: Vec<Container> = candidates
            .into_iter()
            .filter(|c| permitted.contains(&c.reference))
            .collect();

        let report = find_matching_containers(&gear, &permitted, BATCH_CONTAINER_TYPE);

        let proposal = if report.matched.is_empty() {
            None
        } else {
            let payload = ProposalPayload {
                inputs: report.matched.iter().map(|m| m.inputs.clone()).collect(),
                analysis: request.analysis,
                tags: request.tags,
            };
            let mut proposal =
                BatchProposal::new(request.gear, request.config, Origin::user(uid), payload);
            self.insert(&proposal)?;
            proposal.proposal = None;
            Some(proposal)
        };

        tracing::info!(
            gear = %gear.name(),
            matched = report.matched.len(),
            not_matched = report.not_matched.len(),
            ambiguous = report.ambiguous.len(),
            improper = improper_permissions.len(),
            "Batch proposal evaluated"
        );

        Ok(ProposalOutcome {
            proposal,
            matched: report.matched,
            not_matched: report.not_matched,
            ambiguous: report.ambiguous,
            improper_permissions,
        })
    }

    /// Persist a pending proposal.
    pub fn insert(&self, proposal: &BatchProposal) -> Result<()> {
        if proposal.state != BatchState::Pending {
            return Err(QueueError::InvalidState(format!(
                "only pending proposals can be inserted, batch {} is {}",
                proposal.id, proposal.state
            )));
        }
        match &proposal.proposal {
            Some(payload) if !payload.inputs.is_empty() => {}
            _ => {
                return Err(QueueError::Validation(
                    "a batch proposal needs at least one matched container".to_string(),
                ))
            }
        }
        self.store.insert_batch(proposal)?;
        tracing::info!(batch_id = %proposal.id, gear = %proposal.gear, "Batch proposal stored");
        Ok(())
    }

    /// Proposal without its payload, promoted to `complete` once every
    /// spawned job is terminal.
    pub fn get(&self, id: Uuid) -> Result<BatchProposal> {
        let mut batch = self.store.get_batch(id)?;
        if batch.state == BatchState::Launched && !batch.jobs.is_empty() {
            let jobs = self.queue.jobs_by_ids(&batch.jobs)?;
            if jobs.iter().all(|j| j.state.is_terminal()) {
                match self.store.transition_batch(
                    id,
                    BatchState::Launched,
                    BatchState::Complete,
                    Utc::now(),
                ) {
                    Ok(_) => tracing::info!(batch_id = %id, "Batch complete"),
                    Err(QueueError::StaleClaim(_)) => {}
                    Err(e) => return Err(e),
                }
                batch = self.store.get_batch(id)?;
            }
        }
        batch.proposal = None;
        Ok(batch)
    }

    /// Proposal together with the jobs it spawned.
    pub fn get_with_jobs(&self, id: Uuid) -> Result<(BatchProposal, Vec<Job>)> {
        let batch = self.get(id)?;
        let jobs = self.queue.jobs_by_ids(&batch.jobs)?;
        Ok((batch, jobs))
    }

    /// Proposals without payloads, optionally only those of one origin.
    pub fn list(&self, origin_id: Option<&str>) -> Result<Vec<BatchProposal>> {
        let mut batches = self.store.list_batches(origin_id)?;
        for batch in &mut batches {
            batch.proposal = None;
        }
        Ok(batches)
    }

    /// Launch a pending proposal: one job per matched entry.
    ///
    /// The proposal moves to `launched` before any job is created, so a
    /// concurrent second run fails instead of duplicating jobs. Each job id is
    /// recorded on the proposal as soon as the job exists. If the proposal was
    /// cancelled meanwhile, the job just created is cancelled and the
    /// remaining entries are skipped. Entries that fail are reported and
    /// skipped.
    pub fn run(&self, id: Uuid) -> Result<RunReport> {
        let before = match self.store.transition_batch(
            id,
            BatchState::Pending,
            BatchState::Launched,
            Utc::now(),
        ) {
            Ok(before) => before,
            Err(QueueError::StaleClaim(_)) => {
                let current = self.store.get_batch(id)?;
                return Err(QueueError::InvalidState(format!(
                    "can only run pending batch jobs, batch {} is {}",
                    id, current.state
                )));
            }
            Err(e) => return Err(e),
        };
        let payload = before.proposal.ok_or_else(|| {
            QueueError::Internal(format!("pending batch {} has no proposal", id))
        })?;

        let mut report = RunReport {
            jobs: Vec::with_capacity(payload.inputs.len()),
            failures: Vec::new(),
        };
        for (index, inputs) in payload.inputs.into_iter().enumerate() {
            let request = JobRequest {
                inputs,
                config: before.config.clone(),
                tags: payload.tags.iter().cloned().collect(),
                analysis: payload.analysis.clone(),
                batch_id: Some(id),
                ..JobRequest::new(before.gear.clone())
            };
            let job = match self.queue.create_job(request, before.origin.clone()) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(batch_id = %id, index, error = %e, "Batch entry failed");
                    report.failures.push(RunFailure {
                        index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            report.jobs.push(job.id);

            let state = self.store.record_batch_job(id, job.id, Utc::now())?;
            if state == BatchState::Cancelled {
                self.queue.cancel_if_pending(job.id)?;
                tracing::warn!(
                    batch_id = %id,
                    launched = report.jobs.len(),
                    "Batch cancelled during launch"
                );
                return Ok(report);
            }
        }

        tracing::info!(
            batch_id = %id,
            jobs = report.jobs.len(),
            failures = report.failures.len(),
            "Batch launched"
        );
        Ok(report)
    }

    /// Cancel a launched proposal and every spawned job still pending.
    /// Returns the number of jobs cancelled.
    ///
    /// Jobs are found by their batch id rather than the proposal's job list,
    /// so jobs a concurrent `run` created but has not recorded yet are
    /// included.
    pub fn cancel(&self, id: Uuid) -> Result<usize> {
        match self.store.transition_batch(
            id,
            BatchState::Launched,
            BatchState::Cancelled,
            Utc::now(),
        ) {
            Ok(_) => {}
            Err(QueueError::StaleClaim(_)) => {
                let current = self.store.get_batch(id)?;
                return Err(QueueError::InvalidState(format!(
                    "can only cancel launched batch jobs, batch {} is {}",
                    id, current.state
                )));
            }
            Err(e) => return Err(e),
        }

        let mut cancelled = 0;
        for job in self.store.jobs_in_batch(id)? {
            if job.state != JobState::Pending {
                continue;
            }
            match self.queue.cancel_if_pending(job.id) {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(batch_id = %id, job_id = %job.id, "Batch job missing");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(batch_id = %id, cancelled, "Batch cancelled");
        Ok(cancelled)
    }
}
