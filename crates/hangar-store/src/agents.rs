use hangar_core::{AgentDefinition, types::agent::AgentType};
use rusqlite::{Row, params};

use crate::{Store, StoreError};

fn row_to_agent(row: &Row<'_>) -> Result<AgentDefinition, StoreError> {
    let agent_type: String = row.get("agent_type").map_err(StoreError::from)?;
    let patterns_json: Option<String> = row.get("asking_patterns").map_err(StoreError::from)?;
    let asking_patterns = match patterns_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| StoreError::DataIntegrity(format!("asking_patterns: {}", e)))?,
        None => Vec::new(),
    };
    Ok(AgentDefinition {
        id: row.get("id").map_err(StoreError::from)?,
        name: row.get("name").map_err(StoreError::from)?,
        agent_type: AgentType::parse(&agent_type)?,
        command_template: row.get("command_template").map_err(StoreError::from)?,
        continue_template: row.get("continue_template").map_err(StoreError::from)?,
        headless_template: row.get("headless_template").map_err(StoreError::from)?,
        description: row.get("description").map_err(StoreError::from)?,
        is_built_in: row.get("is_built_in").map_err(StoreError::from)?,
        asking_patterns,
        created_at: row.get("created_at").map_err(StoreError::from)?,
        updated_at: row.get("updated_at").map_err(StoreError::from)?,
    })
}

const SELECT: &str = "SELECT id, name, agent_type, command_template, continue_template, \
     headless_template, description, is_built_in, asking_patterns, created_at, updated_at \
     FROM agents";

/// Patchable agent fields. `None` leaves the column untouched.
#[derive(Debug, Default, Clone)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub command_template: Option<String>,
    pub continue_template: Option<Option<String>>,
    pub headless_template: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub asking_patterns: Option<Vec<String>>,
}

impl Store {
    pub fn insert_agent(&self, agent: &AgentDefinition) -> Result<(), StoreError> {
        let patterns_json = serde_json::to_string(&agent.asking_patterns)
            .map_err(|e| StoreError::DataIntegrity(format!("asking_patterns: {}", e)))?;
        self.conn().execute(
            "INSERT INTO agents (id, name, agent_type, command_template, continue_template, \
             headless_template, description, is_built_in, asking_patterns) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                agent.id,
                agent.name,
                agent.agent_type.as_str(),
                agent.command_template,
                agent.continue_template,
                agent.headless_template,
                agent.description,
                agent.is_built_in,
                patterns_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentDefinition, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_agent(row),
            None => Err(StoreError::not_found("agent", id)),
        }
    }

    pub fn find_agent_by_name(&self, name: &str) -> Result<Option<AgentDefinition>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE name = ?1", SELECT))?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => row_to_agent(row).map(Some),
            None => Ok(None),
        }
    }

    pub fn list_agents(&self) -> Result<Vec<AgentDefinition>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", SELECT))?;
        let mut rows = stmt.query([])?;
        let mut agents = Vec::new();
        while let Some(row) = rows.next()? {
            agents.push(row_to_agent(row)?);
        }
        Ok(agents)
    }

    pub fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<AgentDefinition, StoreError> {
        {
            let conn = self.conn();
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(name) = &patch.name {
                sets.push(format!("name = ?{}", values.len() + 1));
                values.push(Box::new(name.clone()));
            }
            if let Some(template) = &patch.command_template {
                sets.push(format!("command_template = ?{}", values.len() + 1));
                values.push(Box::new(template.clone()));
            }
            let optional_columns: [(&str, &Option<Option<String>>); 3] = [
                ("continue_template", &patch.continue_template),
                ("headless_template", &patch.headless_template),
                ("description", &patch.description),
            ];
            for (column, value) in optional_columns {
                if let Some(v) = value {
                    sets.push(format!("{} = ?{}", column, values.len() + 1));
                    values.push(Box::new(v.clone()));
                }
            }
            if let Some(patterns) = &patch.asking_patterns {
                let json = serde_json::to_string(patterns)
                    .map_err(|e| StoreError::DataIntegrity(format!("asking_patterns: {}", e)))?;
                sets.push(format!("asking_patterns = ?{}", values.len() + 1));
                values.push(Box::new(json));
            }

            if !sets.is_empty() {
                sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')".to_string());
                let sql = format!(
                    "UPDATE agents SET {} WHERE id = ?{}",
                    sets.join(", "),
                    values.len() + 1
                );
                values.push(Box::new(id.to_string()));
                let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
                if changed == 0 {
                    return Err(StoreError::not_found("agent", id));
                }
            }
        }
        self.get_agent(id)
    }

    /// Delete a non-built-in agent. Built-ins are undeletable; in-use checks
    /// are the session manager's responsibility.
    pub fn delete_agent(&self, id: &str) -> Result<(), StoreError> {
        let agent = self.get_agent(id)?;
        if agent.is_built_in {
            return Err(StoreError::Conflict(format!(
                "agent '{}' is built-in and cannot be deleted",
                agent.name
            )));
        }
        self.conn().execute("DELETE FROM agents WHERE id = ?1", [id])?;
        Ok(())
    }
}
