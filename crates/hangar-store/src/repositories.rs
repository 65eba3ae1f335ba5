use hangar_core::Repository;
use rusqlite::{Row, params};

use crate::{Store, StoreError};

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        setup_command: row.get("setup_command")?,
        cleanup_command: row.get("cleanup_command")?,
        env_vars: row.get("env_vars")?,
        description: row.get("description")?,
        default_agent_id: row.get("default_agent_id")?,
        default_branch: row.get("default_branch")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SELECT: &str = "SELECT id, name, path, setup_command, cleanup_command, env_vars, \
     description, default_agent_id, default_branch, created_at, updated_at FROM repositories";

/// Patchable repository fields. `None` leaves the column untouched.
#[derive(Debug, Default, Clone)]
pub struct RepositoryPatch {
    pub name: Option<String>,
    pub setup_command: Option<Option<String>>,
    pub cleanup_command: Option<Option<String>>,
    pub env_vars: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub default_agent_id: Option<Option<String>>,
    pub default_branch: Option<Option<String>>,
}

impl Store {
    pub fn insert_repository(&self, repo: &Repository) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO repositories (id, name, path, setup_command, cleanup_command, \
             env_vars, description, default_agent_id, default_branch) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                repo.id,
                repo.name,
                repo.path,
                repo.setup_command,
                repo.cleanup_command,
                repo.env_vars,
                repo.description,
                repo.default_agent_id,
                repo.default_branch,
            ],
        )?;
        Ok(())
    }

    pub fn get_repository(&self, id: &str) -> Result<Repository, StoreError> {
        self.conn()
            .query_row(&format!("{} WHERE id = ?1", SELECT), [id], row_to_repository)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("repository", id),
                other => other.into(),
            })
    }

    pub fn find_repository_by_path(&self, path: &str) -> Result<Option<Repository>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE path = ?1", SELECT))?;
        let mut rows = stmt.query_map([path], row_to_repository)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", SELECT))?;
        let rows = stmt.query_map([], row_to_repository)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn update_repository(&self, id: &str, patch: &RepositoryPatch) -> Result<Repository, StoreError> {
        {
            let conn = self.conn();
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(name) = &patch.name {
                sets.push(format!("name = ?{}", values.len() + 1));
                values.push(Box::new(name.clone()));
            }
            let optional_columns: [(&str, &Option<Option<String>>); 6] = [
                ("setup_command", &patch.setup_command),
                ("cleanup_command", &patch.cleanup_command),
                ("env_vars", &patch.env_vars),
                ("description", &patch.description),
                ("default_agent_id", &patch.default_agent_id),
                ("default_branch", &patch.default_branch),
            ];
            for (column, value) in optional_columns {
                if let Some(v) = value {
                    sets.push(format!("{} = ?{}", column, values.len() + 1));
                    values.push(Box::new(v.clone()));
                }
            }

            if !sets.is_empty() {
                sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')".to_string());
                let sql = format!(
                    "UPDATE repositories SET {} WHERE id = ?{}",
                    sets.join(", "),
                    values.len() + 1
                );
                values.push(Box::new(id.to_string()));
                let changed =
                    conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
                if changed == 0 {
                    return Err(StoreError::not_found("repository", id));
                }
            }
        }
        self.get_repository(id)
    }

    pub fn delete_repository(&self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute("DELETE FROM repositories WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::not_found("repository", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str, path: &str) -> Repository {
        Repository {
            id: id.to_string(),
            name: "widget".to_string(),
            path: path.to_string(),
            setup_command: None,
            cleanup_command: None,
            env_vars: None,
            description: None,
            default_agent_id: None,
            default_branch: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = Store::open_in_memory().unwrap();
        store.insert_repository(&repo("r1", "/tmp/widget")).unwrap();
        let fetched = store.get_repository("r1").unwrap();
        assert_eq!(fetched.name, "widget");
        assert!(!fetched.created_at.is_empty());
    }

    #[test]
    fn test_duplicate_path_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.insert_repository(&repo("r1", "/tmp/widget")).unwrap();
        let err = store.insert_repository(&repo("r2", "/tmp/widget")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_find_by_path() {
        let store = Store::open_in_memory().unwrap();
        store.insert_repository(&repo("r1", "/tmp/widget")).unwrap();
        assert!(store.find_repository_by_path("/tmp/widget").unwrap().is_some());
        assert!(store.find_repository_by_path("/tmp/other").unwrap().is_none());
    }

    #[test]
    fn test_update_patch_refreshes_updated_at_only() {
        let store = Store::open_in_memory().unwrap();
        store.insert_repository(&repo("r1", "/tmp/widget")).unwrap();
        let before = store.get_repository("r1").unwrap();

        let updated = store
            .update_repository(
                "r1",
                &RepositoryPatch {
                    description: Some(Some("main repo".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("main repo"));
        assert_eq!(updated.created_at, before.created_at);
    }

    #[test]
    fn test_patch_can_clear_field() {
        let store = Store::open_in_memory().unwrap();
        let mut r = repo("r1", "/tmp/widget");
        r.setup_command = Some("make setup".to_string());
        store.insert_repository(&r).unwrap();

        let updated = store
            .update_repository(
                "r1",
                &RepositoryPatch {
                    setup_command: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.setup_command.is_none());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.delete_repository("ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
