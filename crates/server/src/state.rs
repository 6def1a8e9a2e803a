use std::sync::Arc;

use relay_core::CompletionRelay;

use crate::config::AppConfig;

/// Shared handler state. Cheap to clone; everything behind it is read-only.
#[derive(Clone)]
pub struct AppState {
    pub relay: CompletionRelay,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(relay: CompletionRelay, config: AppConfig) -> Self {
        Self {
            relay,
            config: Arc::new(config),
        }
    }
}
