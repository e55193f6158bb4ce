//! Subscription session module

pub mod provider;
pub mod simulated;

pub use provider::{SessionError, SubscriptionSession};
pub use simulated::{Operation, RecordedRequest, SimulatedSession, SimulationConfig};
