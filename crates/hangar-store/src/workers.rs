use hangar_core::types::worker::{Worker, WorkerKind};
use rusqlite::{Row, params};

use crate::{Store, StoreError, opt_u32};

fn row_to_worker(row: &Row<'_>) -> Result<Worker, StoreError> {
    let kind: String = row.get("worker_type").map_err(StoreError::from)?;
    let pid: Option<i64> = row.get("pid").map_err(StoreError::from)?;
    Ok(Worker {
        id: row.get("id").map_err(StoreError::from)?,
        session_id: row.get("session_id").map_err(StoreError::from)?,
        kind: WorkerKind::parse(&kind)?,
        name: row.get("name").map_err(StoreError::from)?,
        agent_id: row.get("agent_id").map_err(StoreError::from)?,
        pid: opt_u32(pid),
        base_commit: row.get("base_commit").map_err(StoreError::from)?,
        created_at: row.get("created_at").map_err(StoreError::from)?,
    })
}

const SELECT: &str =
    "SELECT id, session_id, worker_type, name, agent_id, pid, base_commit, created_at FROM workers";

impl Store {
    pub fn insert_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO workers (id, session_id, worker_type, name, agent_id, pid, base_commit) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                worker.id,
                worker.session_id,
                worker.kind.as_str(),
                worker.name,
                worker.agent_id,
                worker.pid,
                worker.base_commit,
            ],
        )?;
        Ok(())
    }

    pub fn get_worker(&self, session_id: &str, worker_id: &str) -> Result<Worker, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND session_id = ?2", SELECT))?;
        let mut rows = stmt.query([worker_id, session_id])?;
        match rows.next()? {
            Some(row) => row_to_worker(row),
            None => Err(StoreError::not_found("worker", worker_id)),
        }
    }

    pub fn list_workers(&self, session_id: &str) -> Result<Vec<Worker>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{} WHERE session_id = ?1 ORDER BY created_at", SELECT))?;
        let mut rows = stmt.query([session_id])?;
        let mut workers = Vec::new();
        while let Some(row) = rows.next()? {
            workers.push(row_to_worker(row)?);
        }
        Ok(workers)
    }

    /// Record a live pid (or clear it when the process dies).
    pub fn update_worker_pid(
        &self,
        session_id: &str,
        worker_id: &str,
        pid: Option<u32>,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE workers SET pid = ?1 WHERE id = ?2 AND session_id = ?3",
            params![pid, worker_id, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("worker", worker_id));
        }
        Ok(())
    }

    pub fn delete_worker(&self, session_id: &str, worker_id: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "DELETE FROM workers WHERE id = ?1 AND session_id = ?2",
            params![worker_id, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("worker", worker_id));
        }
        Ok(())
    }
}
