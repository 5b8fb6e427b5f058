use super::{AppState, GameError, GameResult};
use crate::protocol::{RemovalReason, ServerMessage};
use crate::types::*;

impl AppState {
    /// Connected players of a game, sorted by join order (ULID ids sort
    /// chronologically)
    pub async fn connected_roster(&self, game_id: &GameId) -> Vec<Player> {
        let mut roster: Vec<Player> = self
            .players
            .read()
            .await
            .values()
            .filter(|p| p.game_id == *game_id && p.connection == ConnectionStatus::Connected)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        roster
    }

    pub async fn get_player(&self, player_id: &PlayerId) -> Option<Player> {
        self.players.read().await.get(player_id).cloned()
    }

    /// Refresh a player's liveness timestamp. Disconnection is permanent
    /// for the session, so a heartbeat from a removed player is rejected.
    pub async fn heartbeat(&self, player_id: &PlayerId) -> GameResult<()> {
        let mut players = self.players.write().await;
        let player = players
            .get_mut(player_id)
            .ok_or_else(|| GameError::NotFound("Player not found".to_string()))?;

        if player.connection != ConnectionStatus::Connected {
            return Err(GameError::Validation(
                "Player has been removed from the game".to_string(),
            ));
        }

        player.last_heartbeat = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    /// Explicit departure: immediate removal without waiting for the sweep
    pub async fn leave(&self, player_id: &PlayerId) -> GameResult<()> {
        let game_id = {
            let mut players = self.players.write().await;
            let player = players
                .get_mut(player_id)
                .ok_or_else(|| GameError::NotFound("Player not found".to_string()))?;
            player.connection = ConnectionStatus::Disconnected;
            player.game_id.clone()
        };

        tracing::info!("Player {} left", player_id);
        self.broadcast_game(
            &game_id,
            ServerMessage::PlayerRemoved {
                player_id: player_id.clone(),
                reason: RemovalReason::Left,
            },
        )
        .await;
        Ok(())
    }

    /// Liveness sweep: demote players whose heartbeat lapsed past the
    /// threshold and broadcast each removal. Returns how many were removed.
    pub async fn sweep_stale_players(&self, threshold: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - threshold;

        let removed: Vec<(PlayerId, GameId)> = {
            let mut players = self.players.write().await;
            let mut removed = Vec::new();
            for p in players
                .values_mut()
                .filter(|p| p.connection == ConnectionStatus::Connected)
            {
                let stale = match chrono::DateTime::parse_from_rfc3339(&p.last_heartbeat) {
                    Ok(ts) => ts < cutoff,
                    // Unparsable timestamp: treat as stale rather than
                    // keeping a zombie on the roster
                    Err(_) => true,
                };
                if stale {
                    p.connection = ConnectionStatus::Disconnected;
                    removed.push((p.id.clone(), p.game_id.clone()));
                }
            }
            removed
        };

        for (player_id, game_id) in &removed {
            tracing::info!("Player {} timed out, removing from roster", player_id);
            self.broadcast_game(
                game_id,
                ServerMessage::PlayerRemoved {
                    player_id: player_id.clone(),
                    reason: RemovalReason::Disconnected,
                },
            )
            .await;
        }

        removed.len()
    }

    /// Expire lobbies that outlived their expiry horizon
    pub async fn expire_stale_games(&self) -> usize {
        let now = chrono::Utc::now();

        let expired: Vec<Game> = {
            let mut games = self.games.write().await;
            let mut expired = Vec::new();
            for g in games
                .values_mut()
                .filter(|g| g.status == GameStatus::Waiting)
            {
                let past = chrono::DateTime::parse_from_rfc3339(&g.expires_at)
                    .map(|ts| ts < now)
                    .unwrap_or(false);
                if past {
                    g.status = GameStatus::Expired;
                    expired.push(g.clone());
                }
            }
            expired
        };

        for game in &expired {
            tracing::info!("Game {} expired", game.join_code);
            self.broadcast_game(&game.id, ServerMessage::GameUpdated { game: game.clone() })
                .await;
        }

        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lobby_with_players(state: &AppState, names: &[&str]) -> (Game, Vec<Player>) {
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        let mut players = Vec::new();
        for name in names {
            let (p, _) = state.join_game(&game.join_code, name).await.unwrap();
            players.push(p);
        }
        (game, players)
    }

    #[tokio::test]
    async fn test_heartbeat_updates_timestamp() {
        let state = AppState::new();
        let (_, players) = lobby_with_players(&state, &["Alice"]).await;

        let before = state.get_player(&players[0].id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        state.heartbeat(&players[0].id).await.unwrap();
        let after = state.get_player(&players[0].id).await.unwrap();
        assert!(after.last_heartbeat >= before.last_heartbeat);
    }

    #[tokio::test]
    async fn test_heartbeat_rejected_after_leave() {
        let state = AppState::new();
        let (_, players) = lobby_with_players(&state, &["Alice"]).await;

        state.leave(&players[0].id).await.unwrap();
        let result = state.heartbeat(&players[0].id).await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[tokio::test]
    async fn test_leave_removes_from_roster() {
        let state = AppState::new();
        let (game, players) = lobby_with_players(&state, &["Alice", "Bob"]).await;

        state.leave(&players[0].id).await.unwrap();
        let roster = state.connected_roster(&game.id).await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Bob");
    }

    #[tokio::test]
    async fn test_sweep_demotes_stale_players() {
        let state = AppState::new();
        let (game, players) = lobby_with_players(&state, &["Alice", "Bob"]).await;

        // Age Alice's heartbeat past the threshold
        {
            let mut all = state.players.write().await;
            let alice = all.get_mut(&players[0].id).unwrap();
            alice.last_heartbeat =
                (chrono::Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        }

        let removed = state.sweep_stale_players(chrono::Duration::seconds(90)).await;
        assert_eq!(removed, 1);

        let roster = state.connected_roster(&game.id).await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Bob");

        let alice = state.get_player(&players[0].id).await.unwrap();
        assert_eq!(alice.connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_sweep_broadcasts_removal() {
        let state = AppState::new();
        let (game, players) = lobby_with_players(&state, &["Alice", "Bob"]).await;
        let mut rx = state.subscribe(&game.id).await;

        {
            let mut all = state.players.write().await;
            let alice = all.get_mut(&players[0].id).unwrap();
            alice.last_heartbeat =
                (chrono::Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        }
        state.sweep_stale_players(chrono::Duration::seconds(90)).await;

        let msg = rx.recv().await.unwrap();
        match msg {
            ServerMessage::PlayerRemoved { player_id, reason } => {
                assert_eq!(player_id, players[0].id);
                assert_eq!(reason, RemovalReason::Disconnected);
            }
            other => panic!("expected PlayerRemoved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_player_excluded_from_selection() {
        let state = AppState::new();
        let (game, players) =
            lobby_with_players(&state, &["A", "B", "C", "D", "E", "F"]).await;

        {
            let mut all = state.players.write().await;
            let p = all.get_mut(&players[0].id).unwrap();
            p.last_heartbeat = (chrono::Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        }
        state.sweep_stale_players(chrono::Duration::seconds(90)).await;

        state.start_game(&game.join_code).await.unwrap();
        let round = state.current_round(&game.id).await.unwrap();
        assert!(!round.is_participant(&players[0].id));
    }

    #[tokio::test]
    async fn test_expire_stale_games() {
        let state = AppState::new();
        let (game, _) = lobby_with_players(&state, &["Alice"]).await;

        {
            let mut games = state.games.write().await;
            let g = games.get_mut(&game.id).unwrap();
            g.expires_at = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        }

        let expired = state.expire_stale_games().await;
        assert_eq!(expired, 1);
        let g = state.find_game_by_code(&game.join_code).await.unwrap();
        assert_eq!(g.status, GameStatus::Expired);

        // Expired lobby is no longer joinable
        let result = state.join_game(&game.join_code, "Late").await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }
}
