pub mod service;

pub use service::{BranchMode, CreateWorktreeOutcome, CreateWorktreeRequest, WorktreeService};
