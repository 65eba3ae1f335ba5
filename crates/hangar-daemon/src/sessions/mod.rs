pub mod manager;

pub use manager::{CreateSessionRequest, CreateWorkerRequest, SessionManager};
