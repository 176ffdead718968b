
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use gear_queue::config::QueueConfig;
use gear_queue::error::QueueError;
use gear_queue::scheduler::{JobPatch, JobState};
use gear_queue::store::JobStore;
use test_harness::{text_request, TestEnv};
use uuid::Uuid;

#[test]
fn test_enqueued_job_starts_fresh() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");

    let stored = env.queue.get(job.id).unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.attempt, 1);
    assert!(stored.previous_job_id.is_none());
    assert!(stored.claimed_at.is_none());
}

#[test]
fn test_get_unknown_job() {
    let env = TestEnv::memory();
    assert!(matches!(
        env.queue.get(Uuid::new_v4()),
        Err(QueueError::JobNotFound(_))
    ));
}

#[test]
fn test_claim_empty_queue_returns_none() {
    let env = TestEnv::memory();
    assert!(env.queue.claim(&[]).unwrap().is_none());
}

#[test]
fn test_claim_prefers_priority_then_fifo() {
    let env = TestEnv::memory();
    let first = env.submit("a.txt");
    let second = env.submit("a.txt");
    let mut urgent = text_request("a.txt");
    urgent.now = true;
    let urgent = env.submit_request(urgent);

    let order: Vec<Uuid> = (0..3)
        .map(|_| env.queue.claim(&[]).unwrap().unwrap().id)
        .collect();
    assert_eq!(order, vec![urgent.id, first.id, second.id]);
    assert!(env.queue.claim(&[]).unwrap().is_none());
}

#[test]
fn test_claim_filters_by_tags() {
    let env = TestEnv::memory();
    let cpu = env.submit_request(text_request("a.txt").with_tag("cpu"));
    let gpu = env.submit_request(text_request("a.txt").with_tag("gpu"));

    let claimed = env.queue.claim(&["gpu".to_string()]).unwrap().unwrap();
    assert_eq!(claimed.id, gpu.id);
    assert!(env.queue.claim(&["gpu".to_string()]).unwrap().is_none());

    let claimed = env
        .queue
        .claim(&["cpu".to_string(), "other".to_string()])
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, cpu.id);
}

#[test]
fn test_claim_sets_running_and_timestamp() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    let claimed = env.queue.claim(&[]).unwrap().unwrap();

    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state, JobState::Running);
    assert!(claimed.claimed_at.is_some());
    assert_eq!(env.queue.get(job.id).unwrap().state, JobState::Running);
}

#[test]
fn test_concurrent_claims_on_single_job() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let queue = env.queue.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                queue.claim(&[]).unwrap()
            })
        })
        .collect();

    let winners: Vec<Uuid> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .map(|j| j.id)
        .collect();
    assert_eq!(winners, vec![job.id]);
}

#[test]
fn test_concurrent_claims_never_share_a_job() {
    let env = TestEnv::memory();
    let total = 50;
    for _ in 0..total {
        env.submit("a.txt");
    }

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let queue = env.queue.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim(&[]).unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "job {} claimed twice", id);
        }
    }
    assert_eq!(seen.len(), total);
}

#[test]
fn test_mutate_legal_transitions() {
    let env = TestEnv::memory();

    let pending = env.submit("a.txt");
    let cancelled = env
        .queue
        .mutate(pending.id, &JobPatch::state(JobState::Cancelled))
        .unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);

    for target in [JobState::Complete, JobState::Failed, JobState::Cancelled] {
        let job = env.submit("a.txt");
        env.queue.claim(&[]).unwrap().unwrap();
        let updated = env.queue.mutate(job.id, &JobPatch::state(target)).unwrap();
        assert_eq!(updated.state, target);
        assert!(updated.modified >= job.modified);
    }
}

#[test]
fn test_mutate_terminal_jobs_is_rejected() {
    let env = TestEnv::memory();

    for terminal in [JobState::Complete, JobState::Failed, JobState::Cancelled] {
        let job = env.submit("a.txt");
        env.queue.claim(&[]).unwrap().unwrap();
        env.queue.mutate(job.id, &JobPatch::state(terminal)).unwrap();

        for next in JobState::ALL {
            let err = env.queue.mutate(job.id, &JobPatch::state(next)).unwrap_err();
            assert!(
                matches!(err, QueueError::InvalidStateTransition { from, .. } if from == terminal),
                "{} -> {} should be rejected",
                terminal,
                next
            );
        }
        assert_eq!(env.queue.get(job.id).unwrap().state, terminal);
    }
}

#[test]
fn test_mutate_cannot_start_a_job() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    let err = env
        .queue
        .mutate(job.id, &JobPatch::state(JobState::Running))
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidStateTransition { .. }));
}

#[test]
fn test_mutate_tags_only() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    let patch = JobPatch {
        state: None,
        tags: Some(["x".to_string()].into_iter().collect()),
    };
    let updated = env.queue.mutate(job.id, &patch).unwrap();
    assert_eq!(updated.state, JobState::Pending);
    assert!(updated.tags.contains("x"));
}

fn fail(env: &TestEnv, id: Uuid) {
    let claimed = env.queue.claim(&[]).unwrap().unwrap();
    assert_eq!(claimed.id, id);
    env.queue.mutate(id, &JobPatch::state(JobState::Failed)).unwrap();
}

#[test]
fn test_retry_creates_linked_successor() {
    let env = TestEnv::memory();
    let job = env.submit_request(text_request("a.txt").with_tag("mri"));
    fail(&env, job.id);

    let new_id = env.queue.retry(job.id, false).unwrap();
    let successor = env.queue.get(new_id).unwrap();
    assert_eq!(successor.state, JobState::Pending);
    assert_eq!(successor.attempt, 2);
    assert_eq!(successor.previous_job_id, Some(job.id));
    assert_eq!(successor.gear_name, job.gear_name);
    assert_eq!(successor.inputs, job.inputs);
    assert_eq!(successor.destination, job.destination);
    assert_eq!(successor.tags, job.tags);
    assert_eq!(successor.origin, job.origin);

    let original = env.queue.get(job.id).unwrap();
    assert_eq!(original.state, JobState::Failed);
    assert_eq!(original.retried_by, Some(new_id));
}

#[test]
fn test_retry_requires_failed_state() {
    let env = TestEnv::memory();
    let pending = env.submit("a.txt");
    assert!(matches!(
        env.queue.retry(pending.id, true),
        Err(QueueError::InvalidState(_))
    ));

    env.queue.claim(&[]).unwrap().unwrap();
    env.queue
        .mutate(pending.id, &JobPatch::state(JobState::Complete))
        .unwrap();
    assert!(matches!(
        env.queue.retry(pending.id, true),
        Err(QueueError::InvalidState(_))
    ));
}

#[test]
fn test_retry_ceiling_and_force() {
    let env = TestEnv::with_config(QueueConfig::default().with_max_attempts(2));
    let job = env.submit("a.txt");
    fail(&env, job.id);

    let second = env.queue.retry(job.id, false).unwrap();
    fail(&env, second);

    assert!(matches!(
        env.queue.retry(second, false),
        Err(QueueError::InvalidState(_))
    ));
    let third = env.queue.retry(second, true).unwrap();
    assert_eq!(env.queue.get(third).unwrap().attempt, 3);
}

#[test]
fn test_retry_twice_is_rejected() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    fail(&env, job.id);

    env.queue.retry(job.id, false).unwrap();
    assert!(matches!(
        env.queue.retry(job.id, true),
        Err(QueueError::InvalidState(_))
    ));
    assert_eq!(env.queue.statistics().unwrap().total, 2);
}

#[test]
fn test_orphan_scan_ignores_fresh_claims() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    env.queue.claim(&[]).unwrap().unwrap();

    assert_eq!(env.queue.scan_for_orphans().unwrap(), 0);
    assert_eq!(env.queue.get(job.id).unwrap().state, JobState::Running);
}

#[test]
fn test_orphan_scan_requeues_stale_claims() {
    let env = TestEnv::with_config(QueueConfig::default().with_orphan_timeout(Duration::ZERO));
    let job = env.submit("a.txt");
    let pending = env.submit("a.txt");
    env.queue.claim(&[]).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));

    assert_eq!(env.queue.scan_for_orphans().unwrap(), 1);
    let reclaimed = env.queue.get(job.id).unwrap();
    assert_eq!(reclaimed.state, JobState::Pending);
    assert_eq!(reclaimed.reclaims, 1);
    assert!(reclaimed.claimed_at.is_none());
    assert_eq!(env.queue.get(pending.id).unwrap().state, JobState::Pending);

    // The reclaimed job keeps its place in line.
    assert_eq!(env.queue.claim(&[]).unwrap().unwrap().id, job.id);
}

#[test]
fn test_orphan_scan_fails_after_max_attempts() {
    let env = TestEnv::with_config(
        QueueConfig::default()
            .with_max_attempts(2)
            .with_orphan_timeout(Duration::ZERO),
    );
    let job = env.submit("a.txt");

    env.queue.claim(&[]).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(env.queue.scan_for_orphans().unwrap(), 1);
    assert_eq!(env.queue.get(job.id).unwrap().state, JobState::Pending);

    env.queue.claim(&[]).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(env.queue.scan_for_orphans().unwrap(), 1);
    let failed = env.queue.get(job.id).unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.reclaims, 2);
}

#[test]
fn test_reclaim_requires_the_observed_claim() {
    let env = TestEnv::memory();
    let job = env.submit("a.txt");
    let at = chrono::Utc::now();

    let first = env.store.claim_next(&[], at).unwrap().unwrap();
    env.store
        .reclaim_if_stale(job.id, first.claims, JobState::Pending, at)
        .unwrap();
    let second = env.store.claim_next(&[], at).unwrap().unwrap();
    assert_eq!(second.claimed_at, first.claimed_at);
    assert_eq!(second.claims, first.claims + 1);

    assert!(matches!(
        env.store
            .reclaim_if_stale(job.id, first.claims, JobState::Pending, at),
        Err(QueueError::StaleClaim(_))
    ));
    assert_eq!(env.queue.get(job.id).unwrap().state, JobState::Running);
}

#[test]
fn test_statistics_counts_by_state() {
    let env = TestEnv::memory();
    let a = env.submit("a.txt");
    env.submit("a.txt");
    env.submit("a.txt");
    env.queue.claim(&[]).unwrap().unwrap();
    env.queue.mutate(a.id, &JobPatch::state(JobState::Complete)).unwrap();
    env.queue.claim(&[]).unwrap().unwrap();

    let stats = env.queue.statistics().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.states[&JobState::Pending], 1);
    assert_eq!(stats.states[&JobState::Running], 1);
    assert_eq!(stats.states[&JobState::Complete], 1);
    assert_eq!(stats.states[&JobState::Failed], 0);
    assert_eq!(stats.states[&JobState::Cancelled], 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let env = TestEnv::memory();
    let request = text_request("a.txt").with_config("unknown", serde_json::json!(1));
    let err = env
        .queue
        .create_job(request, gear_queue::scheduler::Origin::system())
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));
    assert_eq!(env.queue.statistics().unwrap().total, 0);
}
