//! hangar-core: domain model for the hangar orchestration server.
//!
//! Owns the entity types persisted by `hangar-store` and manipulated by the
//! daemon: repositories, agent definitions, sessions, workers, worktree
//! records, and jobs. Also home to the cross-cutting policies that must have
//! exactly one definition: activity-pattern validation, command/worktree
//! template expansion, and the child-process environment policy.

pub mod env_policy;
pub mod errors;
pub mod logging;
pub mod patterns;
pub mod template;
pub mod types;

pub use errors::ErrorKind;
pub use logging::init_logging;
pub use types::activity::ActivityState;
pub use types::agent::{AgentDefinition, AgentType};
pub use types::job::{JobRecord, JobStatus};
pub use types::repository::Repository;
pub use types::session::{Session, SessionKind};
pub use types::worker::{Worker, WorkerKind};
pub use types::worktree::WorktreeRecord;

/// Generate a fresh v4 UUID string, the id format for every entity.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as an RFC3339 string, the timestamp format at API edges.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Current time in epoch milliseconds, the timestamp format for job rows.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
