//! The embedded topic broker used by the `embedded` relay backend.

pub mod engine;
pub mod message;
pub mod topic;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use engine::Broker;

/// The broker as shared between the WebSocket server, the retry loop and
/// the relay.
pub type SharedBroker = Arc<Mutex<Broker>>;

/// Lock the shared broker, recovering from poisoning.
pub fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}
