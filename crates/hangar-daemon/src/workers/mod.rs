pub mod registry;

pub use registry::{WorkerRegistry, WorkerSpawn, WorkerStreamEvent};
