pub mod adapter;

pub use adapter::{PtyEvent, PtyHandle, SpawnSpec, spawn_pty, terminate_pid};
