//! Background tasks that mutate state independently of client requests.

use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

/// How often the liveness sweep runs
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// How long a heartbeat may lapse before a player is removed
const HEARTBEAT_THRESHOLD_SECS: i64 = 90;

/// How often expired lobbies are reaped
const EXPIRY_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the liveness monitor: any connected player whose heartbeat lapsed
/// past the threshold is demoted to DISCONNECTED and removed from the
/// roster, with the removal broadcast to the game topic.
pub fn spawn_liveness_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;

            let removed = state
                .sweep_stale_players(chrono::Duration::seconds(HEARTBEAT_THRESHOLD_SECS))
                .await;
            if removed > 0 {
                tracing::info!("Liveness sweep removed {} stale players", removed);
            }
        }
    });
}

/// Spawn the lobby expiry sweep
pub fn spawn_expiry_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(EXPIRY_INTERVAL).await;

            let expired = state.expire_stale_games().await;
            if expired > 0 {
                tracing::info!("Expired {} stale lobbies", expired);
            }
        }
    });
}
