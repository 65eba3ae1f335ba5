use hangar_core::types::job::{JobRecord, JobStatus};
use rusqlite::{Row, params};

use crate::{Store, StoreError};

fn row_to_job(row: &Row<'_>) -> Result<JobRecord, StoreError> {
    let status: String = row.get("status").map_err(StoreError::from)?;
    Ok(JobRecord {
        id: row.get("id").map_err(StoreError::from)?,
        job_type: row.get("job_type").map_err(StoreError::from)?,
        payload: row.get("payload").map_err(StoreError::from)?,
        status: JobStatus::parse(&status)?,
        priority: row.get("priority").map_err(StoreError::from)?,
        attempts: row.get("attempts").map_err(StoreError::from)?,
        max_attempts: row.get("max_attempts").map_err(StoreError::from)?,
        next_retry_at: row.get("next_retry_at").map_err(StoreError::from)?,
        last_error: row.get("last_error").map_err(StoreError::from)?,
        created_at: row.get("created_at").map_err(StoreError::from)?,
        started_at: row.get("started_at").map_err(StoreError::from)?,
        completed_at: row.get("completed_at").map_err(StoreError::from)?,
    })
}

const COLUMNS: &str = "id, job_type, payload, status, priority, attempts, max_attempts, \
     next_retry_at, last_error, created_at, started_at, completed_at";

/// Filters for job listing endpoints.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub stalled: i64,
}

impl Store {
    pub fn insert_job(
        &self,
        id: &str,
        job_type: &str,
        payload: &str,
        priority: i64,
        max_attempts: i64,
        now_ms: i64,
    ) -> Result<JobRecord, StoreError> {
        self.conn().execute(
            "INSERT INTO jobs (id, job_type, payload, status, priority, max_attempts, next_retry_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
            params![id, job_type, payload, priority, max_attempts, now_ms],
        )?;
        self.get_job(id)
    }

    pub fn get_job(&self, id: &str) -> Result<JobRecord, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_job(row),
            None => Err(StoreError::not_found("job", id)),
        }
    }

    /// Atomically claim the next due job: highest priority first, oldest
    /// `next_retry_at` within a priority. The single-statement
    /// UPDATE … RETURNING is what guarantees a job is handed to at most one
    /// caller.
    pub fn claim_job(&self, now_ms: i64) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "UPDATE jobs SET status = 'processing', \
             started_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = (SELECT id FROM jobs \
                         WHERE status = 'pending' AND next_retry_at <= ?1 \
                         ORDER BY priority DESC, next_retry_at ASC LIMIT 1) \
             RETURNING {}",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([now_ms])?;
        match rows.next()? {
            Some(row) => row_to_job(row).map(Some),
            None => Ok(None),
        }
    }

    pub fn complete_job(&self, id: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE jobs SET status = 'completed', \
             completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
            [id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("job", id));
        }
        Ok(())
    }

    /// Record a failed attempt. With `next_retry_at` the job goes back to
    /// pending for a later retry; without it the job stalls.
    pub fn fail_job_attempt(
        &self,
        id: &str,
        error: &str,
        next_retry_at: Option<i64>,
    ) -> Result<(), StoreError> {
        let changed = match next_retry_at {
            Some(at) => self.conn().execute(
                "UPDATE jobs SET status = 'pending', attempts = attempts + 1, \
                 last_error = ?1, next_retry_at = ?2 WHERE id = ?3",
                params![error, at, id],
            )?,
            None => self.conn().execute(
                "UPDATE jobs SET status = 'stalled', attempts = attempts + 1, \
                 last_error = ?1 WHERE id = ?2",
                params![error, id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::not_found("job", id));
        }
        Ok(())
    }

    /// Crash recovery: anything left processing by a dead server becomes
    /// claimable again.
    pub fn reset_processing_jobs(&self, now_ms: i64) -> Result<usize, StoreError> {
        let changed = self.conn().execute(
            "UPDATE jobs SET status = 'pending', next_retry_at = ?1 WHERE status = 'processing'",
            [now_ms],
        )?;
        Ok(changed)
    }

    /// Pending jobs whose retry time is still in the future, for re-arming
    /// timers at queue start.
    pub fn jobs_awaiting_retry(&self, now_ms: i64) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = 'pending' AND next_retry_at > ?1",
            COLUMNS
        ))?;
        let mut rows = stmt.query([now_ms])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(row_to_job(row)?);
        }
        Ok(jobs)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn();
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(job_type) = &filter.job_type {
            clauses.push(format!("job_type = ?{}", values.len() + 1));
            values.push(Box::new(job_type.clone()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            COLUMNS,
            where_clause,
            values.len() + 1,
            values.len() + 2
        );
        values.push(Box::new(filter.limit.unwrap_or(50)));
        values.push(Box::new(filter.offset.unwrap_or(0)));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(row_to_job(row)?);
        }
        Ok(jobs)
    }

    pub fn count_jobs(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let conn = self.conn();
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(job_type) = &filter.job_type {
            clauses.push(format!("job_type = ?{}", values.len() + 1));
            values.push(Box::new(job_type.clone()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs {}", where_clause),
            rusqlite::params_from_iter(values.iter()),
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn job_stats(&self) -> Result<JobStats, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut stats = JobStats::default();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match JobStatus::parse(&status)? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Stalled => stats.stalled = count,
            }
        }
        Ok(stats)
    }

    /// Reset a stalled job for a fresh run. Only valid from `stalled`.
    pub fn retry_stalled_job(&self, id: &str, now_ms: i64) -> Result<JobRecord, StoreError> {
        let job = self.get_job(id)?;
        if job.status != JobStatus::Stalled {
            return Err(StoreError::Conflict(format!(
                "job '{}' is {}, only stalled jobs can be retried",
                id,
                job.status.as_str()
            )));
        }
        self.conn().execute(
            "UPDATE jobs SET status = 'pending', attempts = 0, next_retry_at = ?1 WHERE id = ?2",
            params![now_ms, id],
        )?;
        self.get_job(id)
    }

    /// Remove a job that has not started. Only valid from `pending` or
    /// `stalled`.
    pub fn cancel_job(&self, id: &str) -> Result<(), StoreError> {
        let job = self.get_job(id)?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Stalled) {
            return Err(StoreError::Conflict(format!(
                "job '{}' is {}, only pending or stalled jobs can be cancelled",
                id,
                job.status.as_str()
            )));
        }
        self.conn().execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        Ok(())
    }
}
