//! Startup and command-level errors.
//!
//! Request handling never produces this type; it only covers the failures
//! that stop the binary (bad configuration, unreachable storage, sockets
//! that cannot be bound).

use thiserror::Error;

use crate::persistence::StoreError;
use crate::push::PushError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("push notifier error: {0}")]
    Push(#[from] PushError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("{0}")]
    Other(String),
}
