use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::gears::GearRegistry;
use crate::scheduler::job::{Job, JobPatch, JobRequest, JobState, Origin};
use crate::store::Store;

/// A guarded mutation that keeps losing to concurrent writers gives up after
/// this many re-reads.
const MUTATE_ATTEMPTS: usize = 5;

/// Job counts grouped by state. Every state is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    pub states: BTreeMap<JobState, u64>,
    pub total: u64,
}

/// The scheduling core. Built once per process and shared by handlers, the
/// batch engine and the reaper loop.
pub struct Queue {
    store: Arc<dyn Store>,
    gears: Arc<dyn GearRegistry>,
    config: QueueConfig,
}

impl Queue {
    pub fn new(store: Arc<dyn Store>, gears: Arc<dyn GearRegistry>, config: QueueConfig) -> Self {
        Self {
            store,
            gears,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn gears(&self) -> &Arc<dyn GearRegistry> {
        &self.gears
    }

    /// Validate a submission and enqueue the resulting job.
    pub fn create_job(&self, request: JobRequest, origin: Origin) -> Result<Job> {
        let job = Job::create(self.gears.as_ref(), request, origin)?;
        self.enqueue(&job)?;
        Ok(job)
    }

    pub fn enqueue(&self, job: &Job) -> Result<()> {
        if job.state != JobState::Pending {
            return Err(QueueError::InvalidState(format!(
                "only pending jobs can be enqueued, job {} is {}",
                job.id, job.state
            )));
        }
        self.store.insert_job(job)?;
        tracing::info!(job_id = %job.id, gear = %job.gear_name, attempt = job.attempt, "Job enqueued");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Job> {
        self.store.get_job(id)
    }

    /// All jobs in creation order.
    pub fn list(&self) -> Result<Vec<Job>> {
        self.store.list_jobs()
    }

    pub fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        self.store.jobs_by_ids(ids)
    }

    /// The document served as a job's `config.json`.
    pub fn job_config(&self, id: Uuid) -> Result<Value> {
        let job = self.store.get_job(id)?;
        Ok(json!({ "config": job.config }))
    }

    /// Claim the next eligible pending job, or `None` when nothing matches.
    pub fn claim(&self, tags: &[String]) -> Result<Option<Job>> {
        let claimed = self.store.claim_next(tags, Utc::now())?;
        match &claimed {
            Some(job) => {
                tracing::info!(job_id = %job.id, gear = %job.gear_name, "Job claimed");
            }
            None => {
                tracing::debug!(?tags, "No pending job to claim");
            }
        }
        Ok(claimed)
    }

    /// Apply a caller mutation after validating it against the state machine.
    ///
    /// The write is conditioned on the state seen during validation. If a
    /// concurrent claim moved the job in between, the job is re-read and the
    /// mutation re-validated.
    pub fn mutate(&self, id: Uuid, patch: &JobPatch) -> Result<Job> {
        if patch.is_empty() {
            return Err(QueueError::Validation(
                "mutation must change state or tags".to_string(),
            ));
        }

        for _ in 0..MUTATE_ATTEMPTS {
            let current = self.store.get_job(id)?;
            let requested = patch.state.unwrap_or(current.state);
            if current.state.is_terminal() {
                return Err(QueueError::InvalidStateTransition {
                    from: current.state,
                    to: requested,
                });
            }
            if let Some(next) = patch.state {
                if !current.state.can_transition_to(next) {
                    return Err(QueueError::InvalidStateTransition {
                        from: current.state,
                        to: next,
                    });
                }
            }

            match self.store.update_job_if(id, current.state, patch, Utc::now()) {
                Ok(job) => {
                    tracing::info!(job_id = %id, from = %current.state, to = %job.state, "Job mutated");
                    return Ok(job);
                }
                Err(QueueError::StaleClaim(_)) => {
                    tracing::warn!(job_id = %id, "Job changed during mutation, re-validating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(QueueError::Internal(format!(
            "job {} kept changing during mutation",
            id
        )))
    }

    /// Cancel a job only if it is still pending. Returns whether it was
    /// cancelled; running and terminal jobs are left alone.
    pub fn cancel_if_pending(&self, id: Uuid) -> Result<bool> {
        let patch = JobPatch::state(JobState::Cancelled);
        match self
            .store
            .update_job_if(id, JobState::Pending, &patch, Utc::now())
        {
            Ok(_) => {
                tracing::info!(job_id = %id, "Pending job cancelled");
                Ok(true)
            }
            Err(QueueError::StaleClaim(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Enqueue a fresh attempt of a failed job. Returns the new job's id.
    ///
    /// `force` bypasses the attempt ceiling, not the state checks.
    pub fn retry(&self, id: Uuid, force: bool) -> Result<Uuid> {
        let original = self.store.get_job(id)?;
        if original.state != JobState::Failed {
            return Err(QueueError::InvalidState(format!(
                "job {} is {}, only failed jobs can be retried",
                id, original.state
            )));
        }
        if let Some(successor) = original.retried_by {
            return Err(QueueError::InvalidState(format!(
                "job {} was already retried as {}",
                id, successor
            )));
        }
        if !force && original.attempt + 1 > self.config.max_attempts {
            return Err(QueueError::InvalidState(format!(
                "job {} reached the maximum of {} attempts",
                id, self.config.max_attempts
            )));
        }

        let successor = original.successor();
        match self.store.insert_retry(id, &successor, Utc::now()) {
            Ok(()) => {}
            Err(QueueError::StaleClaim(_)) => {
                return Err(QueueError::InvalidState(format!(
                    "job {} was retried concurrently",
                    id
                )));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            job_id = %id,
            new_job_id = %successor.id,
            attempt = successor.attempt,
            force,
            "Job retried"
        );
        Ok(successor.id)
    }

    /// Return running jobs whose claim is older than the orphan timeout to
    /// the queue, or fail them once they have used up their attempts.
    /// Returns the number of jobs reclaimed.
    pub fn scan_for_orphans(&self) -> Result<usize> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.orphan_timeout)
            .map_err(|e| QueueError::Internal(format!("orphan timeout out of range: {}", e)))?;
        let stale = self.store.running_claimed_before(now - timeout)?;

        let mut reclaimed = 0;
        for job in stale {
            let next = if job.attempt + job.reclaims >= self.config.max_attempts {
                JobState::Failed
            } else {
                JobState::Pending
            };

            match self.store.reclaim_if_stale(job.id, job.claims, next, now) {
                Ok(updated) => {
                    reclaimed += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        state = %updated.state,
                        reclaims = updated.reclaims,
                        "Orphaned job reclaimed"
                    );
                }
                Err(QueueError::StaleClaim(_)) => {
                    tracing::debug!(job_id = %job.id, "Orphan candidate changed during scan");
                }
                Err(e) => return Err(e),
            }
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, "Orphan scan finished");
        }
        Ok(reclaimed)
    }

    pub fn statistics(&self) -> Result<QueueStatistics> {
        let counts = self.store.count_by_state()?;
        let states: BTreeMap<JobState, u64> = JobState::ALL
            .into_iter()
            .map(|state| (state, counts.get(&state).copied().unwrap_or(0)))
            .collect();
        let total = states.values().sum();
        Ok(QueueStatistics { states, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gears::{GearManifest, MemoryGearRegistry};
    use crate::identifiers::FileReference;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn queue_with(config: QueueConfig) -> Queue {
        let gears = MemoryGearRegistry::new();
        let manifest: GearManifest = serde_json::from_value(json!({
            "name": "echo",
            "inputs": {"text": {"name": {"pattern": "\\.txt$"}}}
        }))
        .unwrap();
        gears.upsert(manifest).unwrap();
        Queue::new(Arc::new(MemoryStore::new()), Arc::new(gears), config)
    }

    fn request() -> JobRequest {
        JobRequest::new("echo").with_input(
            "text",
            FileReference::new("acquisition", "a1", "in.txt").unwrap(),
        )
    }

    fn failed_job(queue: &Queue) -> Job {
        let job = queue.create_job(request(), Origin::user("alice")).unwrap();
        queue.claim(&[]).unwrap().unwrap();
        queue
            .mutate(job.id, &JobPatch::state(JobState::Failed))
            .unwrap()
    }

    #[test]
    fn enqueue_rejects_non_pending() {
        let queue = queue_with(QueueConfig::default());
        let mut job = Job::create(queue.gears().as_ref(), request(), Origin::system()).unwrap();
        job.state = JobState::Running;
        assert!(matches!(
            queue.enqueue(&job),
            Err(QueueError::InvalidState(_))
        ));
    }

    #[test]
    fn mutate_rejects_empty_patch() {
        let queue = queue_with(QueueConfig::default());
        let job = queue.create_job(request(), Origin::system()).unwrap();
        assert!(matches!(
            queue.mutate(job.id, &JobPatch::default()),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn mutate_pending_to_complete_is_rejected() {
        let queue = queue_with(QueueConfig::default());
        let job = queue.create_job(request(), Origin::system()).unwrap();
        let err = queue
            .mutate(job.id, &JobPatch::state(JobState::Complete))
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidStateTransition {
                from: JobState::Pending,
                to: JobState::Complete
            }
        ));
        assert_eq!(queue.get(job.id).unwrap().state, JobState::Pending);
    }

    #[test]
    fn retry_respects_ceiling_unless_forced() {
        let queue = queue_with(QueueConfig::default().with_max_attempts(1));
        let failed = failed_job(&queue);

        assert!(matches!(
            queue.retry(failed.id, false),
            Err(QueueError::InvalidState(_))
        ));
        let new_id = queue.retry(failed.id, true).unwrap();
        assert_eq!(queue.get(new_id).unwrap().attempt, 2);
    }

    #[test]
    fn retry_only_once() {
        let queue = queue_with(QueueConfig::default());
        let failed = failed_job(&queue);
        queue.retry(failed.id, false).unwrap();
        assert!(matches!(
            queue.retry(failed.id, true),
            Err(QueueError::InvalidState(_))
        ));
        assert_eq!(queue.get(failed.id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn orphan_scan_fails_exhausted_jobs() {
        let config = QueueConfig::default()
            .with_max_attempts(1)
            .with_orphan_timeout(Duration::ZERO);
        let queue = queue_with(config);
        let job = queue.create_job(request(), Origin::system()).unwrap();
        queue.claim(&[]).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(queue.scan_for_orphans().unwrap(), 1);
        let reclaimed = queue.get(job.id).unwrap();
        assert_eq!(reclaimed.state, JobState::Failed);
        assert_eq!(reclaimed.reclaims, 1);
    }

    #[test]
    fn statistics_zero_fill() {
        let queue = queue_with(QueueConfig::default());
        queue.create_job(request(), Origin::system()).unwrap();
        let stats = queue.statistics().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.states.len(), JobState::ALL.len());
        assert_eq!(stats.states[&JobState::Pending], 1);
        assert_eq!(stats.states[&JobState::Complete], 0);
    }

    #[test]
    fn job_config_wraps_config() {
        let queue = queue_with(QueueConfig::default());
        let job = queue.create_job(request(), Origin::system()).unwrap();
        assert_eq!(queue.job_config(job.id).unwrap(), json!({"config": {}}));
    }
}
