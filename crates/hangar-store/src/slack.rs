use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use crate::{Store, StoreError};

/// Per-repository Slack notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub repository_id: String,
    pub webhook_url: String,
    pub enabled: bool,
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<SlackConfig> {
    Ok(SlackConfig {
        repository_id: row.get("repository_id")?,
        webhook_url: row.get("webhook_url")?,
        enabled: row.get("enabled")?,
    })
}

impl Store {
    pub fn get_slack_config(&self, repository_id: &str) -> Result<Option<SlackConfig>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT repository_id, webhook_url, enabled FROM repository_slack_configs \
             WHERE repository_id = ?1",
        )?;
        let mut rows = stmt.query_map([repository_id], row_to_config)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn upsert_slack_config(&self, config: &SlackConfig) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO repository_slack_configs (repository_id, webhook_url, enabled) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (repository_id) DO UPDATE SET webhook_url = ?2, enabled = ?3, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![config.repository_id, config.webhook_url, config.enabled],
        )?;
        Ok(())
    }

    pub fn delete_slack_config(&self, repository_id: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM repository_slack_configs WHERE repository_id = ?1",
            [repository_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::Repository;

    fn seed_repo(store: &Store) {
        store
            .insert_repository(&Repository {
                id: "r1".to_string(),
                name: "widget".to_string(),
                path: "/tmp/widget".to_string(),
                setup_command: None,
                cleanup_command: None,
                env_vars: None,
                description: None,
                default_agent_id: None,
                default_branch: None,
                created_at: String::new(),
                updated_at: String::new(),
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_and_get() {
        let store = Store::open_in_memory().unwrap();
        seed_repo(&store);
        assert!(store.get_slack_config("r1").unwrap().is_none());

        let config = SlackConfig {
            repository_id: "r1".to_string(),
            webhook_url: "https://hooks.slack.test/T1".to_string(),
            enabled: true,
        };
        store.upsert_slack_config(&config).unwrap();
        assert_eq!(store.get_slack_config("r1").unwrap().unwrap(), config);

        // Upsert overwrites in place.
        let disabled = SlackConfig {
            enabled: false,
            ..config
        };
        store.upsert_slack_config(&disabled).unwrap();
        assert!(!store.get_slack_config("r1").unwrap().unwrap().enabled);
    }

    #[test]
    fn test_delete_tolerates_missing() {
        let store = Store::open_in_memory().unwrap();
        store.delete_slack_config("ghost").unwrap();
    }
}
