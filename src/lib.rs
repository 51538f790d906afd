pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod correlation;
pub mod db;
pub mod error;
pub mod hub;
pub mod supervisor;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main components for easier use
pub use context::AppContext;
pub use correlation::{CorrelatedViolation, CorrelationEngine, CorrelationWindow};
pub use error::Error;
pub use hub::BroadcastHub;
pub use supervisor::TaskSupervisor;
