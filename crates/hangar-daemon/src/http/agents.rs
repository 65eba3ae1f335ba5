use axum::Json;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiResult, AppState};
use crate::errors::DaemonError;
use crate::events::types::Event;
use hangar_core::types::agent::AgentType;
use hangar_core::AgentDefinition;
use hangar_store::agents::AgentPatch;

use super::repositories::double_option;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let agents = state.store.list_agents()?;
    Ok(Json(json!({ "agents": agents })))
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(rename = "commandTemplate")]
    pub command_template: String,
    #[serde(default, rename = "continueTemplate")]
    pub continue_template: Option<String>,
    #[serde(default, rename = "headlessTemplate")]
    pub headless_template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "askingPatterns")]
    pub asking_patterns: Vec<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let agent = AgentDefinition {
        id: hangar_core::new_id(),
        name: request.name,
        agent_type: AgentType::Pty,
        command_template: request.command_template,
        continue_template: request.continue_template,
        headless_template: request.headless_template,
        description: request.description,
        is_built_in: false,
        asking_patterns: request.asking_patterns,
        created_at: hangar_core::now_rfc3339(),
        updated_at: hangar_core::now_rfc3339(),
    };
    agent.validate().map_err(DaemonError::validation)?;
    state.store.insert_agent(&agent)?;
    let agent = state.store.get_agent(&agent.id)?;
    state.hub.publish(Event::AgentCreated {
        agent: agent.clone(),
    });
    Ok((StatusCode::CREATED, Json(json!({ "agent": agent }))))
}

pub async fn get_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let agent = state.store.get_agent(&id)?;
    Ok(Json(json!({ "agent": agent })))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAgentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "commandTemplate")]
    pub command_template: Option<String>,
    #[serde(default, rename = "continueTemplate", deserialize_with = "double_option")]
    pub continue_template: Option<Option<String>>,
    #[serde(default, rename = "headlessTemplate", deserialize_with = "double_option")]
    pub headless_template: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, rename = "askingPatterns")]
    pub asking_patterns: Option<Vec<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(request): Json<UpdateAgentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    // Validate the post-patch shape before touching the row.
    let mut candidate = state.store.get_agent(&id)?;
    if let Some(name) = &request.name {
        candidate.name = name.clone();
    }
    if let Some(template) = &request.command_template {
        candidate.command_template = template.clone();
    }
    if let Some(template) = &request.continue_template {
        candidate.continue_template = template.clone();
    }
    if let Some(template) = &request.headless_template {
        candidate.headless_template = template.clone();
    }
    if let Some(patterns) = &request.asking_patterns {
        candidate.asking_patterns = patterns.clone();
    }
    candidate.validate().map_err(DaemonError::validation)?;

    let patch = AgentPatch {
        name: request.name,
        command_template: request.command_template,
        continue_template: request.continue_template,
        headless_template: request.headless_template,
        description: request.description,
        asking_patterns: request.asking_patterns,
    };
    let agent = state.store.update_agent(&id, &patch)?;
    state.hub.publish(Event::AgentUpdated {
        agent: agent.clone(),
    });
    Ok(Json(json!({ "agent": agent })))
}

pub async fn delete_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let agent = state.store.get_agent(&id)?;
    // Any session referencing the agent — active or persisted — blocks
    // deletion.
    let using = state.sessions.get_sessions_using_agent(&id)?;
    if !using.is_empty() {
        return Err(ApiError(DaemonError::conflict(format!(
            "agent '{}' is referenced by {} session(s)",
            agent.name,
            using.len()
        ))));
    }
    state.store.delete_agent(&id)?;
    state.hub.publish(Event::AgentDeleted { agent_id: id });
    Ok(Json(json!({ "success": true })))
}
