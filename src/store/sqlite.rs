use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::scheduler::{BatchProposal, BatchState, Job, JobPatch, JobState};
use crate::store::{BatchStore, JobStore, Rule, RuleStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    gear_name TEXT NOT NULL,
    inputs_json TEXT NOT NULL,
    destination_json TEXT NOT NULL,
    config_json TEXT NOT NULL,
    tags_json TEXT NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    previous_job_id TEXT,
    origin_json TEXT NOT NULL,
    now_flag INTEGER NOT NULL DEFAULT 0,
    analysis_json TEXT,
    batch_id TEXT,
    claimed_at_ms INTEGER,
    claims INTEGER NOT NULL DEFAULT 0,
    reclaims INTEGER NOT NULL DEFAULT 0,
    retried_by TEXT,
    created_at_ms INTEGER NOT NULL,
    modified_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_claim_order ON jobs(state, now_flag, created_at_ms, seq);
CREATE INDEX IF NOT EXISTS jobs_batch ON jobs(batch_id);
CREATE TABLE IF NOT EXISTS batches (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    gear TEXT NOT NULL,
    config_json TEXT NOT NULL,
    state TEXT NOT NULL,
    origin_json TEXT NOT NULL,
    origin_id TEXT,
    proposal_json TEXT,
    jobs_json TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    modified_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS batches_origin ON batches(origin_id);
CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    rule_list_json TEXT NOT NULL
);
"#;

const JOB_COLUMNS: &str = "id, gear_name, inputs_json, destination_json, config_json, tags_json, \
     state, attempt, previous_job_id, origin_json, now_flag, analysis_json, batch_id, \
     claimed_at_ms, claims, reclaims, retried_by, created_at_ms, modified_at_ms";

const BATCH_COLUMNS: &str =
    "id, gear, config_json, state, origin_json, proposal_json, jobs_json, created_at_ms, modified_at_ms";

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Uuid::parse_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_from_ms(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    time_from_ms(idx, row.get(idx)?)
}

fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<i64> = row.get(idx)?;
    raw.map(|ms| time_from_ms(idx, ms)).transpose()
}

fn state_column<T: std::str::FromStr<Err = QueueError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_column(row, 0)?,
        gear_name: row.get(1)?,
        inputs: json_column(row, 2)?,
        destination: json_column(row, 3)?,
        config: json_column(row, 4)?,
        tags: json_column(row, 5)?,
        state: state_column(row, 6)?,
        attempt: row.get(7)?,
        previous_job_id: opt_uuid_column(row, 8)?,
        origin: json_column(row, 9)?,
        now: row.get(10)?,
        analysis: opt_json_column(row, 11)?,
        batch_id: opt_uuid_column(row, 12)?,
        claimed_at: opt_time_column(row, 13)?,
        claims: row.get(14)?,
        reclaims: row.get(15)?,
        retried_by: opt_uuid_column(row, 16)?,
        created: time_column(row, 17)?,
        modified: time_column(row, 18)?,
    })
}

fn read_batch_row(row: &Row<'_>) -> rusqlite::Result<BatchProposal> {
    Ok(BatchProposal {
        id: uuid_column(row, 0)?,
        gear: row.get(1)?,
        config: json_column(row, 2)?,
        state: state_column(row, 3)?,
        origin: json_column(row, 4)?,
        proposal: opt_json_column(row, 5)?,
        jobs: json_column(row, 6)?,
        created: time_column(row, 7)?,
        modified: time_column(row, 8)?,
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn insert_job_tx(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            job.id.to_string(),
            job.gear_name,
            to_json(&job.inputs)?,
            to_json(&job.destination)?,
            to_json(&job.config)?,
            to_json(&job.tags)?,
            job.state.as_str(),
            job.attempt,
            job.previous_job_id.map(|id| id.to_string()),
            to_json(&job.origin)?,
            job.now,
            job.analysis.as_ref().map(to_json).transpose()?,
            job.batch_id.map(|id| id.to_string()),
            job.claimed_at.map(|t| t.timestamp_millis()),
            job.claims,
            job.reclaims,
            job.retried_by.map(|id| id.to_string()),
            job.created.timestamp_millis(),
            job.modified.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn select_job(conn: &Connection, id: Uuid) -> Result<Option<Job>> {
    Ok(conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id.to_string()],
            read_job_row,
        )
        .optional()?)
}

/// SQLite-backed store. Claims and reclaims are single conditional
/// `UPDATE` statements, so they stay exclusive even with several processes
/// sharing one database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Distinguish a missing row from a lost guard after an update touched
    /// no rows.
    fn miss(conn: &Connection, id: Uuid) -> QueueError {
        match select_job(conn, id) {
            Ok(Some(_)) => QueueError::StaleClaim(id.to_string()),
            Ok(None) => QueueError::JobNotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

impl JobStore for SqliteStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock();
        insert_job_tx(&conn, job)
    }

    fn get_job(&self, id: Uuid) -> Result<Job> {
        let conn = self.conn.lock();
        select_job(&conn, id)?.ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at_ms ASC, seq ASC"
        ))?;
        let jobs = stmt
            .query_map([], read_job_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = select_job(&conn, *id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn jobs_in_batch(&self, batch_id: Uuid) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE batch_id = ?1 ORDER BY created_at_ms ASC, seq ASC"
        ))?;
        let jobs = stmt
            .query_map(params![batch_id.to_string()], read_job_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn claim_next(&self, tags: &[String], now: DateTime<Utc>) -> Result<Option<Job>> {
        let tag_clause = if tags.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = (0..tags.len()).map(|i| format!("?{}", i + 2)).collect();
            format!(
                "AND EXISTS (SELECT 1 FROM json_each(j.tags_json) t WHERE t.value IN ({}))",
                placeholders.join(", ")
            )
        };
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'running', claimed_at_ms = ?1, claims = claims + 1, modified_at_ms = ?1
            WHERE seq = (
                SELECT j.seq FROM jobs j
                WHERE j.state = 'pending' {tag_clause}
                ORDER BY j.now_flag DESC, j.created_at_ms ASC, j.seq ASC
                LIMIT 1
            )
            AND state = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let mut values = vec![SqlValue::Integer(now.timestamp_millis())];
        values.extend(tags.iter().map(|t| SqlValue::Text(t.clone())));

        let conn = self.conn.lock();
        let job = conn
            .query_row(&sql, params_from_iter(values.iter()), read_job_row)
            .optional()?;
        Ok(job)
    }

    fn update_job_if(
        &self,
        id: Uuid,
        expected: JobState,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let tags_json = patch.tags.as_ref().map(to_json).transpose()?;
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!(
                    r#"
                    UPDATE jobs
                    SET state = COALESCE(?3, state),
                        tags_json = COALESCE(?4, tags_json),
                        modified_at_ms = ?5
                    WHERE id = ?1 AND state = ?2
                    RETURNING {JOB_COLUMNS}
                    "#
                ),
                params![
                    id.to_string(),
                    expected.as_str(),
                    patch.state.map(|s| s.as_str()),
                    tags_json,
                    now.timestamp_millis(),
                ],
                read_job_row,
            )
            .optional()?;
        job.ok_or_else(|| Self::miss(&conn, id))
    }

    fn running_claimed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE state = 'running' AND claimed_at_ms < ?1 \
             ORDER BY claimed_at_ms ASC"
        ))?;
        let jobs = stmt
            .query_map(params![cutoff.timestamp_millis()], read_job_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn reclaim_if_stale(
        &self,
        id: Uuid,
        claims: u32,
        next: JobState,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                &format!(
                    r#"
                    UPDATE jobs
                    SET state = ?3,
                        claimed_at_ms = CASE WHEN ?3 = 'pending' THEN NULL ELSE claimed_at_ms END,
                        reclaims = reclaims + 1,
                        modified_at_ms = ?4
                    WHERE id = ?1 AND state = 'running' AND claims = ?2
                    RETURNING {JOB_COLUMNS}
                    "#
                ),
                params![
                    id.to_string(),
                    claims,
                    next.as_str(),
                    now.timestamp_millis(),
                ],
                read_job_row,
            )
            .optional()?;
        job.ok_or_else(|| Self::miss(&conn, id))
    }

    fn insert_retry(&self, original_id: Uuid, successor: &Job, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET retried_by = ?2, modified_at_ms = ?3
            WHERE id = ?1 AND state = 'failed' AND retried_by IS NULL
            "#,
            params![
                original_id.to_string(),
                successor.id.to_string(),
                now.timestamp_millis()
            ],
        )?;
        if changed != 1 {
            return Err(Self::miss(&tx, original_id));
        }
        insert_job_tx(&tx, successor)?;
        tx.commit()?;
        Ok(())
    }

    fn count_by_state(&self) -> Result<BTreeMap<JobState, u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| {
                let state: JobState = state_column(row, 0)?;
                let count: i64 = row.get(1)?;
                Ok((state, count.max(0) as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }
}

impl BatchStore for SqliteStore {
    fn insert_batch(&self, batch: &BatchProposal) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO batches ({BATCH_COLUMNS}, origin_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                batch.id.to_string(),
                batch.gear,
                to_json(&batch.config)?,
                batch.state.as_str(),
                to_json(&batch.origin)?,
                batch.proposal.as_ref().map(to_json).transpose()?,
                to_json(&batch.jobs)?,
                batch.created.timestamp_millis(),
                batch.modified.timestamp_millis(),
                batch.origin.id,
            ],
        )?;
        Ok(())
    }

    fn get_batch(&self, id: Uuid) -> Result<BatchProposal> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
            params![id.to_string()],
            read_batch_row,
        )
        .optional()?
        .ok_or_else(|| QueueError::BatchNotFound(id.to_string()))
    }

    fn list_batches(&self, origin_id: Option<&str>) -> Result<Vec<BatchProposal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE (?1 IS NULL OR origin_id = ?1) \
             ORDER BY created_at_ms ASC, seq ASC"
        ))?;
        let batches = stmt
            .query_map(params![origin_id], read_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    fn transition_batch(
        &self,
        id: Uuid,
        expected: BatchState,
        next: BatchState,
        now: DateTime<Utc>,
    ) -> Result<BatchProposal> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let before = tx
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id.to_string()],
                read_batch_row,
            )
            .optional()?
            .ok_or_else(|| QueueError::BatchNotFound(id.to_string()))?;

        let changed = tx.execute(
            r#"
            UPDATE batches
            SET state = ?3,
                proposal_json = CASE WHEN ?3 = 'pending' THEN proposal_json ELSE NULL END,
                modified_at_ms = ?4
            WHERE id = ?1 AND state = ?2
            "#,
            params![
                id.to_string(),
                expected.as_str(),
                next.as_str(),
                now.timestamp_millis()
            ],
        )?;
        if changed != 1 {
            return Err(QueueError::StaleClaim(id.to_string()));
        }
        tx.commit()?;
        Ok(before)
    }

    fn record_batch_job(&self, id: Uuid, job_id: Uuid, now: DateTime<Utc>) -> Result<BatchState> {
        let conn = self.conn.lock();
        let state: Option<BatchState> = conn
            .query_row(
                r#"
                UPDATE batches
                SET jobs_json = json_insert(jobs_json, '$[#]', ?2),
                    modified_at_ms = ?3
                WHERE id = ?1
                RETURNING state
                "#,
                params![id.to_string(), job_id.to_string(), now.timestamp_millis()],
                |row| state_column(row, 0),
            )
            .optional()?;
        state.ok_or_else(|| QueueError::BatchNotFound(id.to_string()))
    }
}

impl RuleStore for SqliteStore {
    fn rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock();
        let rules = conn
            .query_row(
                "SELECT rule_list_json FROM rules WHERE id = 1",
                [],
                |row| json_column(row, 0),
            )
            .optional()?;
        Ok(rules.unwrap_or_default())
    }

    fn replace_rules(&self, rules: &[Rule]) -> Result<()> {
        let rules_json = to_json(rules)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rules (id, rule_list_json) VALUES (1, ?1) \
             ON CONFLICT(id) DO UPDATE SET rule_list_json = excluded.rule_list_json",
            params![rules_json],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::ContainerReference;
    use crate::scheduler::Origin;
    use serde_json::Map;

    fn job(tags: &[&str], now_flag: bool) -> Job {
        let created = Utc::now();
        Job {
            id: Uuid::new_v4(),
            gear_name: "g".to_string(),
            inputs: Default::default(),
            destination: ContainerReference::new("acquisition", "a1").unwrap(),
            config: Map::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            state: JobState::Pending,
            attempt: 1,
            previous_job_id: None,
            origin: Origin::user("alice"),
            now: now_flag,
            analysis: None,
            batch_id: None,
            claimed_at: None,
            claims: 0,
            reclaims: 0,
            retried_by: None,
            created,
            modified: created,
        }
    }

    #[test]
    fn insert_and_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = job(&["a", "b"], false);
        store.insert_job(&original).unwrap();

        let loaded = store.get_job(original.id).unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.tags, original.tags);
        assert_eq!(loaded.destination, original.destination);
        assert_eq!(loaded.origin, original.origin);
        assert_eq!(
            loaded.created.timestamp_millis(),
            original.created.timestamp_millis()
        );
    }

    #[test]
    fn claim_prefers_priority_then_filters_tags() {
        let store = SqliteStore::open_in_memory().unwrap();
        let plain = job(&["cpu"], false);
        let urgent = job(&["gpu"], true);
        store.insert_job(&plain).unwrap();
        store.insert_job(&urgent).unwrap();

        let first = store.claim_next(&[], Utc::now()).unwrap().unwrap();
        assert_eq!(first.id, urgent.id);
        assert_eq!(first.state, JobState::Running);
        assert!(first.claimed_at.is_some());

        assert!(store
            .claim_next(&["gpu".to_string()], Utc::now())
            .unwrap()
            .is_none());
        let second = store
            .claim_next(&["cpu".to_string(), "x".to_string()], Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(second.id, plain.id);
    }

    #[test]
    fn guarded_update_reports_stale_and_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let j = job(&[], false);
        store.insert_job(&j).unwrap();

        let err = store
            .update_job_if(j.id, JobState::Running, &JobPatch::state(JobState::Complete), Utc::now())
            .unwrap_err();
        assert!(matches!(err, QueueError::StaleClaim(_)));

        let err = store
            .update_job_if(Uuid::new_v4(), JobState::Pending, &JobPatch::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }

    #[test]
    fn reclaim_ignores_an_older_claim_in_the_same_millisecond() {
        let store = SqliteStore::open_in_memory().unwrap();
        let j = job(&[], false);
        store.insert_job(&j).unwrap();
        let at = Utc::now();

        let first = store.claim_next(&[], at).unwrap().unwrap();
        assert_eq!(first.claims, 1);
        store
            .reclaim_if_stale(j.id, first.claims, JobState::Pending, at)
            .unwrap();

        let second = store.claim_next(&[], at).unwrap().unwrap();
        assert_eq!(second.claims, 2);
        assert_eq!(
            second.claimed_at.unwrap().timestamp_millis(),
            at.timestamp_millis()
        );

        let err = store
            .reclaim_if_stale(j.id, first.claims, JobState::Pending, at)
            .unwrap_err();
        assert!(matches!(err, QueueError::StaleClaim(_)));
        let current = store.get_job(j.id).unwrap();
        assert_eq!(current.state, JobState::Running);
        assert_eq!(current.reclaims, 1);
    }

    #[test]
    fn rules_replace_whole_list() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.rules().unwrap().is_empty());

        let rule: Rule = serde_json::from_value(serde_json::json!({"alg": "dcm2niix"})).unwrap();
        store.replace_rules(&[rule.clone(), rule.clone()]).unwrap();
        assert_eq!(store.rules().unwrap().len(), 2);

        store.replace_rules(&[rule.clone()]).unwrap();
        assert_eq!(store.rules().unwrap(), vec![rule]);
    }

    #[test]
    fn count_by_state_groups() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_job(&job(&[], false)).unwrap();
        store.insert_job(&job(&[], false)).unwrap();
        store.claim_next(&[], Utc::now()).unwrap();

        let counts = store.count_by_state().unwrap();
        assert_eq!(counts.get(&JobState::Pending), Some(&1));
        assert_eq!(counts.get(&JobState::Running), Some(&1));
    }
}
