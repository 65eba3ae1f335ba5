//! hangar-daemon: the orchestration server.
//!
//! Composes the leaf crates into the running system: PTY adapter, output
//! log, activity detector, worker registry, session manager, worktree
//! service, event hub, job handlers, and the HTTP/WS surface.

pub mod activity;
pub mod config;
pub mod errors;
pub mod events;
pub mod gitio;
pub mod http;
pub mod jobs;
pub mod output;
pub mod pid;
pub mod pty;
pub mod server;
pub mod sessions;
pub mod workers;
pub mod worktrees;
pub mod ws;

pub use config::DaemonConfig;
pub use errors::DaemonError;
pub use server::run_server;
