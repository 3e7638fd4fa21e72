//! A subscriber connected to the embedded broker.

pub mod pubsub_client;
pub use pubsub_client::Client;
