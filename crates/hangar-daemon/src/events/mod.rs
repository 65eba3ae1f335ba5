pub mod hub;
pub mod types;

pub use hub::EventHub;
pub use types::Event;
