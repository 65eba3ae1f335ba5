//! Typed domain events fanned out to app-WebSocket subscribers, plus the
//! sync/stream message enums for both WebSocket protocols. Everything on
//! the wire is JSON discriminated by a `type` tag.

use hangar_core::types::job::JobRecord;
use hangar_core::types::worker::Worker;
use hangar_core::{ActivityState, AgentDefinition, Repository, Session};
use serde::{Deserialize, Serialize};

/// A session plus its workers, as shipped in events and sync snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub workers: Vec<Worker>,
}

/// Domain events broadcast on the app WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    SessionCreated { session: SessionView },
    SessionUpdated { session: SessionView },
    SessionDeleted { session_id: String },
    SessionPaused { session_id: String },
    SessionResumed { session: SessionView },

    WorkerCreated { worker: Worker },
    WorkerUpdated { worker: Worker },
    WorkerExited {
        session_id: String,
        worker_id: String,
        exit_code: Option<i32>,
    },
    WorkerDeleted {
        session_id: String,
        worker_id: String,
    },
    WorkerActivityState {
        session_id: String,
        worker_id: String,
        state: ActivityState,
        timestamp: String,
    },

    RepositoryCreated { repository: Repository },
    RepositoryUpdated { repository: Repository },
    RepositoryDeleted { repository_id: String },

    AgentCreated { agent: AgentDefinition },
    AgentUpdated { agent: AgentDefinition },
    AgentDeleted { agent_id: String },

    WorktreeCreationCompleted {
        task_id: String,
        repository_id: String,
        session: SessionView,
    },
    WorktreeCreationFailed {
        task_id: String,
        repository_id: String,
        error: String,
    },

    WorktreeDeletionTaskCreated { task_id: String, path: String },
    WorktreeDeletionTaskProgressing { task_id: String, message: String },
    WorktreeDeletionTaskCompleted { task_id: String },
    WorktreeDeletionTaskFailed { task_id: String, error: String },

    JobUpdated { job: JobRecord },
}

/// Client → server messages on the app WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppClientMessage {
    RequestSync,
}

/// Server → client snapshot messages on the app WebSocket. Live `Event`s
/// are interleaved with these after the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppSyncMessage {
    SessionsSync {
        sessions: Vec<SessionView>,
        activity: Vec<WorkerActivity>,
    },
    AgentsSync { agents: Vec<AgentDefinition> },
    RepositoriesSync { repositories: Vec<Repository> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerActivity {
    pub session_id: String,
    pub worker_id: String,
    pub state: ActivityState,
}

/// Client → server messages on a worker WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    RequestHistory {
        #[serde(rename = "fromOffset")]
        from_offset: Option<u64>,
    },
}

/// Server → client messages on a worker WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerServerMessage {
    Output { data: String, offset: u64 },
    History { data: String },
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    Error { code: String, message: String },
}
