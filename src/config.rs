//! Server configuration from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::MatchSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Settings used when a client creates a match without specifying them
    pub default_settings: MatchSettings,
    /// Matches untouched for longer than this are deleted; zero disables the sweep
    pub match_ttl: Duration,
    pub question_bank_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            default_settings: MatchSettings::default(),
            match_ttl: Duration::from_secs(24 * 60 * 60),
            question_bank_path: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: parse_env("BIND_ADDR").unwrap_or(defaults.bind_addr),
            default_settings: MatchSettings {
                questions_per_team: parse_env::<u32>("QUESTIONS_PER_TEAM")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.default_settings.questions_per_team),
                time_per_question: parse_env::<u32>("TIME_PER_QUESTION")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.default_settings.time_per_question),
                question_filter: Default::default(),
            },
            match_ttl: parse_env("MATCH_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.match_ttl),
            question_bank_path: std::env::var("QUESTION_BANK_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}
