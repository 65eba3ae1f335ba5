use hangar_core::types::worktree::{WorktreeRecord, smallest_free_index};
use hangar_core::{Session, SessionKind};
use rusqlite::{Row, params};

use crate::{Store, StoreError};

fn row_to_worktree(row: &Row<'_>) -> rusqlite::Result<WorktreeRecord> {
    Ok(WorktreeRecord {
        id: row.get("id")?,
        repository_id: row.get("repository_id")?,
        path: row.get("path")?,
        index_number: row.get("index_number")?,
        created_at: row.get("created_at")?,
    })
}

const SELECT: &str = "SELECT id, repository_id, path, index_number, created_at FROM worktrees";

impl Store {
    pub fn insert_worktree(&self, worktree: &WorktreeRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO worktrees (id, repository_id, path, index_number) VALUES (?1, ?2, ?3, ?4)",
            params![
                worktree.id,
                worktree.repository_id,
                worktree.path,
                worktree.index_number
            ],
        )?;
        Ok(())
    }

    pub fn get_worktree(&self, id: &str) -> Result<WorktreeRecord, StoreError> {
        self.conn()
            .query_row(&format!("{} WHERE id = ?1", SELECT), [id], row_to_worktree)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("worktree", id),
                other => other.into(),
            })
    }

    pub fn find_worktree_by_path(&self, path: &str) -> Result<Option<WorktreeRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE path = ?1", SELECT))?;
        let mut rows = stmt.query_map([path], row_to_worktree)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_worktrees(&self, repository_id: &str) -> Result<Vec<WorktreeRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{} WHERE repository_id = ?1 ORDER BY index_number", SELECT))?;
        let rows = stmt.query_map([repository_id], row_to_worktree)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn delete_worktree(&self, id: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute("DELETE FROM worktrees WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::not_found("worktree", id));
        }
        Ok(())
    }

    /// Smallest positive index not assigned to any live worktree of the repo.
    pub fn next_worktree_index(&self, repository_id: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT index_number FROM worktrees WHERE repository_id = ?1")?;
        let taken: Vec<i64> = stmt
            .query_map([repository_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(smallest_free_index(&taken))
    }

    /// Insert a worktree record and its session in one transaction. Used by
    /// worktree creation so a crash cannot leave a session without its
    /// worktree row (or vice versa).
    pub fn insert_worktree_with_session(
        &self,
        worktree: &WorktreeRecord,
        session: &Session,
    ) -> Result<(), StoreError> {
        debug_assert_eq!(session.kind, SessionKind::Worktree);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO worktrees (id, repository_id, path, index_number) VALUES (?1, ?2, ?3, ?4)",
            params![
                worktree.id,
                worktree.repository_id,
                worktree.path,
                worktree.index_number
            ],
        )?;
        tx.execute(
            "INSERT INTO sessions (id, session_type, location_path, repository_id, \
             worktree_id, server_pid, title, initial_prompt) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.kind.as_str(),
                session.location_path,
                session.repository_id,
                session.worktree_id,
                session.server_pid,
                session.title,
                session.initial_prompt,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
