//! Daily background refresh of every cached matrix view.

use std::time::Duration;

use crate::AppState;

/// Rebuilds all three derived views for one server. Used by the scheduler,
/// the manual refresh endpoints and the one-shot refresh binary.
pub async fn refresh_server(state: &AppState, server: &str) -> Result<(), crate::error::ServiceError> {
    state
        .drop_matrix
        .refresh_all_drop_matrix_elements(server)
        .await?;
    state
        .pattern_matrix
        .refresh_all_pattern_matrix_elements(server)
        .await?;
    state.trend.refresh_saved_trend_results(server).await?;
    Ok(())
}

/// Spawn the daily refresh loop. The first pass runs immediately so a fresh
/// deployment serves data without waiting a day.
pub fn spawn_refresh_scheduler(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            for server in state.caches.servers() {
                tracing::info!("scheduled refresh for {server} starting");
                if let Err(e) = refresh_server(&state, &server).await {
                    tracing::error!("scheduled refresh for {server} failed: {e}");
                }
            }
        }
    });
}
