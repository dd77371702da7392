use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that forces a PASS on every turn whose deadline has passed
pub fn spawn_turn_deadline_watcher(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;

            match state.driver.expire_overdue(chrono::Utc::now()).await {
                Ok(expired) => {
                    for (match_id, outcome) in expired {
                        tracing::debug!("Deadline passed in match {}: {:?}", match_id, outcome);
                    }
                }
                Err(e) => tracing::error!("Turn deadline scan failed: {}", e),
            }
        }
    });
}

/// Spawn a background task that deletes matches nobody has touched within the TTL
pub fn spawn_abandoned_match_sweeper(state: Arc<AppState>) {
    if state.config.match_ttl.is_zero() {
        tracing::info!("Abandoned match sweep disabled");
        return;
    }

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;

            match state.driver.sweep_abandoned(chrono::Utc::now()).await {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!("Swept {} abandoned matches", removed.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Abandoned match sweep failed: {}", e),
            }
        }
    });
}
