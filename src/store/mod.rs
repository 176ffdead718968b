//! Persistence for jobs and batch proposals.
//!
//! Every state change goes through a guarded update: the store applies it
//! only if the record is still in the state the caller observed, and reports
//! [`QueueError::StaleClaim`](crate::error::QueueError::StaleClaim) otherwise.
//! Claiming and orphan reclaim are single guarded updates, never a read
//! followed by an unconditional write.
//!
//! The operator rule list lives beside them as a single replaceable document.
//!
//! - [`MemoryStore`]: mutex-guarded maps, the default for a single process.
//! - [`SqliteStore`]: conditional `UPDATE ... WHERE state = ?` statements.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::{BatchProposal, BatchState, Job, JobPatch, JobState};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait JobStore: Send + Sync {
    fn insert_job(&self, job: &Job) -> Result<()>;

    fn get_job(&self, id: Uuid) -> Result<Job>;

    /// All jobs in creation order.
    fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Jobs for the given ids, skipping unknown ids, in the order given.
    fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>>;

    /// Every job carrying `batch_id`, in creation order.
    fn jobs_in_batch(&self, batch_id: Uuid) -> Result<Vec<Job>>;

    /// Move the next eligible pending job to running. Priority jobs first,
    /// then oldest first. An empty `tags` filter matches every job.
    fn claim_next(&self, tags: &[String], now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Apply `patch` only if the job is still in `expected`.
    fn update_job_if(
        &self,
        id: Uuid,
        expected: JobState,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Running jobs claimed strictly before `cutoff`.
    fn running_claimed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Move a running job to `next` only if it is still held by the claim the
    /// scan observed (`claims` unchanged). Increments the reclaim counter.
    fn reclaim_if_stale(
        &self,
        id: Uuid,
        claims: u32,
        next: JobState,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Record `successor` as the retry of `original_id` and insert it, only if
    /// the original is failed and has not been retried yet.
    fn insert_retry(&self, original_id: Uuid, successor: &Job, now: DateTime<Utc>) -> Result<()>;

    fn count_by_state(&self) -> Result<BTreeMap<JobState, u64>>;
}

pub trait BatchStore: Send + Sync {
    fn insert_batch(&self, batch: &BatchProposal) -> Result<()>;

    fn get_batch(&self, id: Uuid) -> Result<BatchProposal>;

    /// Proposals in creation order, optionally restricted to one origin id.
    fn list_batches(&self, origin_id: Option<&str>) -> Result<Vec<BatchProposal>>;

    /// Move a proposal from `expected` to `next`. Returns the record as it was
    /// before the transition; the stored payload is dropped once the proposal
    /// leaves `pending`.
    fn transition_batch(
        &self,
        id: Uuid,
        expected: BatchState,
        next: BatchState,
        now: DateTime<Utc>,
    ) -> Result<BatchProposal>;

    /// Append a spawned job id to the proposal and return the proposal's state
    /// at that moment.
    fn record_batch_job(&self, id: Uuid, job_id: Uuid, now: DateTime<Utc>) -> Result<BatchState>;
}

/// The operator-managed rule list, stored as one document.
pub trait RuleStore: Send + Sync {
    /// The stored rules, empty if none were ever written.
    fn rules(&self) -> Result<Vec<Rule>>;

    fn replace_rules(&self, rules: &[Rule]) -> Result<()>;
}

/// One rule, kept as the JSON object the operator submitted.
pub type Rule = serde_json::Map<String, serde_json::Value>;

pub trait Store: JobStore + BatchStore + RuleStore {}

impl<T: JobStore + BatchStore + RuleStore> Store for T {}

/// Which backend a node persists to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite(PathBuf),
}

pub fn open(config: &StorageConfig) -> Result<Arc<dyn Store>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageConfig::Sqlite(path) => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}
