use axum::Json;
use axum::extract::{Path as UrlPath, Query, State};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiResult, AppState};
use crate::errors::DaemonError;
use hangar_core::types::job::JobStatus;
use hangar_store::jobs::JobFilter;

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub job_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl JobsQuery {
    fn into_filter(self) -> Result<JobFilter, DaemonError> {
        let status = match self.status.as_deref() {
            Some(s) => Some(
                JobStatus::parse(s)
                    .map_err(|_| DaemonError::validation(format!("unknown status '{}'", s)))?,
            ),
            None => None,
        };
        Ok(JobFilter {
            status,
            job_type: self.job_type,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = query.into_filter()?;
    let jobs = state.queue.get_jobs(&filter)?;
    let total = state.queue.count_jobs(&filter)?;
    Ok(Json(json!({ "jobs": jobs, "total": total })))
}

pub async fn get_one(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.queue.get_job(&id)?;
    Ok(Json(json!({ "job": job })))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.queue.get_stats()?;
    Ok(Json(json!({ "stats": stats })))
}

pub async fn retry(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = state.queue.retry_job(&id).map_err(ApiError::from)?;
    Ok(Json(json!({ "job": job })))
}

pub async fn cancel(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.queue.cancel_job(&id)?;
    Ok(Json(json!({ "success": true })))
}
