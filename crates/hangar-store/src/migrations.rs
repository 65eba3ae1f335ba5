use rusqlite::Connection;
use tracing::info;

use crate::errors::StoreError;

/// Ordered migration list. `PRAGMA user_version` records how many have run;
/// new migrations append, existing entries never change.
const MIGRATIONS: &[&str] = &[
    // 1: initial schema
    r#"
    CREATE TABLE repositories (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        path             TEXT NOT NULL UNIQUE,
        setup_command    TEXT,
        cleanup_command  TEXT,
        env_vars         TEXT,
        description      TEXT,
        default_agent_id TEXT,
        default_branch   TEXT,
        created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE agents (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL UNIQUE,
        agent_type        TEXT NOT NULL DEFAULT 'pty',
        command_template  TEXT NOT NULL,
        continue_template TEXT,
        headless_template TEXT,
        description       TEXT,
        is_built_in       INTEGER NOT NULL DEFAULT 0,
        asking_patterns   TEXT,
        created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE worktrees (
        id            TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path          TEXT NOT NULL UNIQUE,
        index_number  INTEGER NOT NULL,
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE sessions (
        id             TEXT PRIMARY KEY,
        session_type   TEXT NOT NULL,
        location_path  TEXT NOT NULL,
        repository_id  TEXT REFERENCES repositories(id),
        worktree_id    TEXT REFERENCES worktrees(id),
        server_pid     INTEGER,
        title          TEXT,
        initial_prompt TEXT,
        created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE TABLE workers (
        id          TEXT PRIMARY KEY,
        session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        worker_type TEXT NOT NULL,
        name        TEXT NOT NULL,
        agent_id    TEXT,
        pid         INTEGER,
        base_commit TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE INDEX idx_workers_session ON workers(session_id);

    CREATE TABLE jobs (
        id            TEXT PRIMARY KEY,
        job_type      TEXT NOT NULL,
        payload       TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'pending',
        priority      INTEGER NOT NULL DEFAULT 0,
        attempts      INTEGER NOT NULL DEFAULT 0,
        max_attempts  INTEGER NOT NULL DEFAULT 5,
        next_retry_at INTEGER NOT NULL,
        last_error    TEXT,
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        started_at    TEXT,
        completed_at  TEXT
    );

    CREATE INDEX idx_jobs_claim ON jobs(status, next_retry_at, priority);

    CREATE TABLE inbound_event_notifications (
        id         TEXT PRIMARY KEY,
        job_id     TEXT NOT NULL,
        session_id TEXT NOT NULL,
        worker_id  TEXT NOT NULL,
        handler_id TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (job_id, session_id, worker_id, handler_id)
    );
    "#,
    // 2: per-repository Slack notification config
    r#"
    CREATE TABLE repository_slack_configs (
        repository_id TEXT PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
        webhook_url   TEXT NOT NULL,
        enabled       INTEGER NOT NULL DEFAULT 1,
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );
    "#,
];

/// Run any migrations past the recorded `user_version`.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    let pending = &MIGRATIONS[current as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    for (offset, sql) in pending.iter().enumerate() {
        let version = current + offset as i64 + 1;
        conn.execute_batch(&format!("BEGIN; {} PRAGMA user_version = {}; COMMIT;", sql, version))
            .map_err(|e| StoreError::Migration(format!("migration {}: {}", version, e)))?;
        info!(event = "store.migrate_applied", version = version);
    }

    info!(
        event = "store.migrate_completed",
        from = current,
        to = MIGRATIONS.len(),
    );
    Ok(())
}
