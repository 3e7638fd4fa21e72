//! REST gateway: JSON over HTTP in front of [`FutsideService`](crate::service::FutsideService).

pub mod errors;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;

pub use errors::ApiError;
pub use router::create_router;
pub use state::{AppState, SharedState};

#[cfg(test)]
mod tests;
