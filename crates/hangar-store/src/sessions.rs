use hangar_core::{Session, SessionKind};
use rusqlite::{Row, params};

use crate::{Store, StoreError, opt_u32};

fn row_to_session(row: &Row<'_>) -> Result<Session, StoreError> {
    let kind: String = row.get("session_type").map_err(StoreError::from)?;
    let server_pid: Option<i64> = row.get("server_pid").map_err(StoreError::from)?;
    Ok(Session {
        id: row.get("id").map_err(StoreError::from)?,
        kind: SessionKind::parse(&kind)?,
        location_path: row.get("location_path").map_err(StoreError::from)?,
        repository_id: row.get("repository_id").map_err(StoreError::from)?,
        worktree_id: row.get("worktree_id").map_err(StoreError::from)?,
        server_pid: opt_u32(server_pid),
        title: row.get("title").map_err(StoreError::from)?,
        initial_prompt: row.get("initial_prompt").map_err(StoreError::from)?,
        created_at: row.get("created_at").map_err(StoreError::from)?,
        updated_at: row.get("updated_at").map_err(StoreError::from)?,
    })
}

const SELECT: &str = "SELECT id, session_type, location_path, repository_id, worktree_id, \
     server_pid, title, initial_prompt, created_at, updated_at FROM sessions";

impl Store {
    pub fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.conn().execute(
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
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_session(row),
            None => Err(StoreError::not_found("session", id)),
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", SELECT))?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    /// Update a session's title. The `type` column is immutable after
    /// creation; only metadata moves.
    pub fn update_session_title(&self, id: &str, title: Option<&str>) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE sessions SET title = ?1, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
            params![title, id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("session", id));
        }
        Ok(())
    }

    pub fn update_session_server_pid(
        &self,
        id: &str,
        server_pid: Option<u32>,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE sessions SET server_pid = ?1, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
            params![server_pid, id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("session", id));
        }
        Ok(())
    }

    /// Delete the session row; workers cascade.
    pub fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let changed = self.conn().execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::not_found("session", id));
        }
        Ok(())
    }

    /// Sessions whose workers reference the given agent definition.
    pub fn sessions_using_agent(&self, agent_id: &str) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE id IN (SELECT DISTINCT session_id FROM workers WHERE agent_id = ?1) \
             ORDER BY created_at",
            SELECT
        ))?;
        let mut rows = stmt.query([agent_id])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    pub fn sessions_using_repository(&self, repository_id: &str) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{} WHERE repository_id = ?1 ORDER BY created_at", SELECT))?;
        let mut rows = stmt.query([repository_id])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::types::worker::{Worker, WorkerKind};

    fn quick_session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            kind: SessionKind::Quick,
            location_path: "/tmp/q".to_string(),
            repository_id: None,
            worktree_id: None,
            server_pid: Some(4242),
            title: None,
            initial_prompt: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(&quick_session("s1")).unwrap();
        let fetched = store.get_session("s1").unwrap();
        assert_eq!(fetched.kind, SessionKind::Quick);
        assert_eq!(fetched.server_pid, Some(4242));
    }

    #[test]
    fn test_corrupt_type_tag_is_data_integrity() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(&quick_session("s1")).unwrap();
        store
            .conn()
            .execute("UPDATE sessions SET session_type = 'hybrid' WHERE id = 's1'", [])
            .unwrap();
        let err = store.get_session("s1").unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
    }

    #[test]
    fn test_delete_cascades_workers() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(&quick_session("s1")).unwrap();
        store
            .insert_worker(&Worker {
                id: "w1".to_string(),
                session_id: "s1".to_string(),
                kind: WorkerKind::Terminal,
                name: "terminal".to_string(),
                agent_id: None,
                pid: Some(1),
                base_commit: None,
                created_at: String::new(),
            })
            .unwrap();

        store.delete_session("s1").unwrap();
        assert!(store.list_workers("s1").unwrap().is_empty());
    }

    #[test]
    fn test_clear_server_pid() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(&quick_session("s1")).unwrap();
        store.update_session_server_pid("s1", None).unwrap();
        assert_eq!(store.get_session("s1").unwrap().server_pid, None);
    }

    #[test]
    fn test_sessions_using_agent() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(&quick_session("s1")).unwrap();
        store.insert_session(&quick_session("s2")).unwrap();
        store
            .insert_worker(&Worker {
                id: "w1".to_string(),
                session_id: "s1".to_string(),
                kind: WorkerKind::Agent,
                name: "agent".to_string(),
                agent_id: Some("a1".to_string()),
                pid: None,
                base_commit: None,
                created_at: String::new(),
            })
            .unwrap();

        let using = store.sessions_using_agent("a1").unwrap();
        assert_eq!(using.len(), 1);
        assert_eq!(using[0].id, "s1");
    }
}
