use std::sync::Arc;

use crate::config::AppConfig;
use crate::driver::MatchDriver;
use crate::feedback::FeedbackGenerator;
use crate::questions::QuestionSource;
use crate::store::MemoryStore;
use crate::types::MatchSettings;

/// Shared state handed to every WebSocket session and HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub driver: MatchDriver,
    pub config: AppConfig,
}

impl AppState {
    /// State backed by the in-memory match store
    pub fn new(
        config: AppConfig,
        questions: Arc<dyn QuestionSource>,
        feedback: Arc<dyn FeedbackGenerator>,
    ) -> Self {
        let driver = MatchDriver::new(Arc::new(MemoryStore::new()), questions, feedback)
            .with_match_ttl(config.match_ttl);
        Self { driver, config }
    }

    /// Fill in whatever a client left out from the server defaults
    pub fn settings_or_default(&self, settings: Option<MatchSettings>) -> MatchSettings {
        settings.unwrap_or_else(|| self.config.default_settings.clone())
    }
}
