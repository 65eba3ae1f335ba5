use serde::{Deserialize, Serialize};

use super::UnknownTag;

/// Lifecycle state of a persisted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Failed its maximum allowed attempts.
    Stalled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Stalled => "stalled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownTag> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "stalled" => Ok(JobStatus::Stalled),
            other => Err(UnknownTag::new("job_status", other)),
        }
    }
}

/// A persisted unit of background work with priority and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    /// JSON text handed to the registered handler.
    pub payload: String,
    pub status: JobStatus,
    /// Higher first.
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    /// Epoch milliseconds; the job is claimable once this is in the past.
    pub next_retry_at: i64,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Stalled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = JobStatus::parse("zombie").unwrap_err();
        assert!(err.to_string().contains("job_status"));
    }
}
