use std::sync::Arc;
use std::time::Instant;

use crate::service::FutsideService;

/// Shared application state passed to all handlers via Axum's State extractor.
pub struct AppState {
    pub service: FutsideService,
    pub start_time: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(service: FutsideService) -> SharedState {
        Arc::new(AppState {
            service,
            start_time: Instant::now(),
        })
    }
}
