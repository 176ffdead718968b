use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::scheduler::{BatchProposal, BatchState, Job, JobPatch, JobState};
use crate::store::{BatchStore, JobStore, Rule, RuleStore};

#[derive(Debug)]
struct StoredJob {
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, StoredJob>,
    batches: HashMap<Uuid, (u64, BatchProposal)>,
    rules: Vec<Rule>,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn job_mut(&mut self, id: Uuid) -> Result<&mut Job> {
        self.jobs
            .get_mut(&id)
            .map(|stored| &mut stored.job)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }
}

/// In-process store. Each guarded update runs under one lock acquisition.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().jobs.is_empty()
    }
}

impl JobStore for MemoryStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(QueueError::Internal(format!("duplicate job id {}", job.id)));
        }
        let seq = inner.next_seq();
        inner.jobs.insert(
            job.id,
            StoredJob {
                seq,
                job: job.clone(),
            },
        );
        Ok(())
    }

    fn get_job(&self, id: Uuid) -> Result<Job> {
        self.inner
            .lock()
            .jobs
            .get(&id)
            .map(|stored| stored.job.clone())
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        let mut stored: Vec<&StoredJob> = inner.jobs.values().collect();
        stored.sort_by_key(|s| (s.job.created, s.seq));
        Ok(stored.into_iter().map(|s| s.job.clone()).collect())
    }

    fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.jobs.get(id).map(|s| s.job.clone()))
            .collect())
    }

    fn jobs_in_batch(&self, batch_id: Uuid) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        let mut stored: Vec<&StoredJob> = inner
            .jobs
            .values()
            .filter(|s| s.job.batch_id == Some(batch_id))
            .collect();
        stored.sort_by_key(|s| (s.job.created, s.seq));
        Ok(stored.into_iter().map(|s| s.job.clone()).collect())
    }

    fn claim_next(&self, tags: &[String], now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut inner = self.inner.lock();
        let candidate = inner
            .jobs
            .values()
            .filter(|s| s.job.state == JobState::Pending && s.job.matches_tags(tags))
            .min_by_key(|s| (!s.job.now, s.job.created, s.seq))
            .map(|s| s.job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let job = inner.job_mut(id)?;
        job.state = JobState::Running;
        job.claimed_at = Some(now);
        job.claims += 1;
        job.modified = now;
        Ok(Some(job.clone()))
    }

    fn update_job_if(
        &self,
        id: Uuid,
        expected: JobState,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner.job_mut(id)?;
        if job.state != expected {
            return Err(QueueError::StaleClaim(id.to_string()));
        }
        if let Some(state) = patch.state {
            job.state = state;
        }
        if let Some(tags) = &patch.tags {
            job.tags = tags.clone();
        }
        job.modified = now;
        Ok(job.clone())
    }

    fn running_claimed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        let mut stale: Vec<Job> = inner
            .jobs
            .values()
            .filter(|s| s.job.state == JobState::Running)
            .filter(|s| s.job.claimed_at.is_some_and(|at| at < cutoff))
            .map(|s| s.job.clone())
            .collect();
        stale.sort_by_key(|j| j.claimed_at);
        Ok(stale)
    }

    fn reclaim_if_stale(
        &self,
        id: Uuid,
        claims: u32,
        next: JobState,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner.job_mut(id)?;
        if job.state != JobState::Running || job.claims != claims {
            return Err(QueueError::StaleClaim(id.to_string()));
        }
        job.state = next;
        if next == JobState::Pending {
            job.claimed_at = None;
        }
        job.reclaims += 1;
        job.modified = now;
        Ok(job.clone())
    }

    fn insert_retry(&self, original_id: Uuid, successor: &Job, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        {
            let original = inner.job_mut(original_id)?;
            if original.state != JobState::Failed || original.retried_by.is_some() {
                return Err(QueueError::StaleClaim(original_id.to_string()));
            }
            original.retried_by = Some(successor.id);
            original.modified = now;
        }
        let seq = inner.next_seq();
        inner.jobs.insert(
            successor.id,
            StoredJob {
                seq,
                job: successor.clone(),
            },
        );
        Ok(())
    }

    fn count_by_state(&self) -> Result<BTreeMap<JobState, u64>> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for stored in inner.jobs.values() {
            *counts.entry(stored.job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl BatchStore for MemoryStore {
    fn insert_batch(&self, batch: &BatchProposal) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.batches.contains_key(&batch.id) {
            return Err(QueueError::Internal(format!(
                "duplicate batch id {}",
                batch.id
            )));
        }
        let seq = inner.next_seq();
        inner.batches.insert(batch.id, (seq, batch.clone()));
        Ok(())
    }

    fn get_batch(&self, id: Uuid) -> Result<BatchProposal> {
        self.inner
            .lock()
            .batches
            .get(&id)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| QueueError::BatchNotFound(id.to_string()))
    }

    fn list_batches(&self, origin_id: Option<&str>) -> Result<Vec<BatchProposal>> {
        let inner = self.inner.lock();
        let mut found: Vec<&(u64, BatchProposal)> = inner
            .batches
            .values()
            .filter(|(_, b)| origin_id.map_or(true, |uid| b.origin.is_owned_by(uid)))
            .collect();
        found.sort_by_key(|(seq, b)| (b.created, *seq));
        Ok(found.into_iter().map(|(_, b)| b.clone()).collect())
    }

    fn transition_batch(
        &self,
        id: Uuid,
        expected: BatchState,
        next: BatchState,
        now: DateTime<Utc>,
    ) -> Result<BatchProposal> {
        let mut inner = self.inner.lock();
        let (_, batch) = inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| QueueError::BatchNotFound(id.to_string()))?;
        if batch.state != expected {
            return Err(QueueError::StaleClaim(id.to_string()));
        }
        let before = batch.clone();
        batch.state = next;
        if next != BatchState::Pending {
            batch.proposal = None;
        }
        batch.modified = now;
        Ok(before)
    }

    fn record_batch_job(&self, id: Uuid, job_id: Uuid, now: DateTime<Utc>) -> Result<BatchState> {
        let mut inner = self.inner.lock();
        let (_, batch) = inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| QueueError::BatchNotFound(id.to_string()))?;
        batch.jobs.push(job_id);
        batch.modified = now;
        Ok(batch.state)
    }
}

impl RuleStore for MemoryStore {
    fn rules(&self) -> Result<Vec<Rule>> {
        Ok(self.inner.lock().rules.clone())
    }

    fn replace_rules(&self, rules: &[Rule]) -> Result<()> {
        self.inner.lock().rules = rules.to_vec();
        Ok(())
    }
}
