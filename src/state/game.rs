use super::{AppState, GameError, GameResult};
use crate::protocol::{ServerMessage, TeamScore};
use crate::team;
use crate::types::*;
use rand::Rng;

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

const MIN_ROUNDS: u32 = 1;
const MAX_ROUNDS: u32 = 20;

/// How long a lobby stays joinable before the expiry sweep reaps it
const GAME_EXPIRY_HOURS: i64 = 24;

/// Generate a random join code (6 characters)
fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

impl AppState {
    /// Create a new game in the lobby state
    pub async fn create_game(
        &self,
        host_name: String,
        total_rounds: u32,
        mode: GameMode,
    ) -> GameResult<Game> {
        let host_name = host_name.trim().to_string();
        if host_name.is_empty() {
            return Err(GameError::Validation("Host name cannot be empty".into()));
        }
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&total_rounds) {
            return Err(GameError::Validation(format!(
                "Round count must be between {} and {}",
                MIN_ROUNDS, MAX_ROUNDS
            )));
        }

        let mut games = self.games.write().await;

        // Generate a unique join code (check for collisions among live games)
        let join_code = loop {
            let code = generate_join_code();
            if !games.values().any(|g| g.join_code == code) {
                break code;
            }
        };

        let now = chrono::Utc::now();
        let game = Game {
            id: ulid::Ulid::new().to_string(),
            join_code,
            host_name,
            mode,
            status: GameStatus::Waiting,
            current_round: 0,
            total_rounds,
            created_at: now.to_rfc3339(),
            expires_at: (now + chrono::Duration::hours(GAME_EXPIRY_HOURS)).to_rfc3339(),
        };

        games.insert(game.id.clone(), game.clone());
        tracing::info!("Created game {} with code {}", game.id, game.join_code);

        Ok(game)
    }

    pub async fn find_game_by_code(&self, code: &str) -> Option<Game> {
        let code = code.trim().to_uppercase();
        self.games
            .read()
            .await
            .values()
            .find(|g| g.join_code == code)
            .cloned()
    }

    /// Join a waiting game. The first joiner becomes the host player.
    pub async fn join_game(&self, code: &str, player_name: &str) -> GameResult<(Player, Game)> {
        let game = self
            .find_game_by_code(code)
            .await
            .ok_or_else(|| GameError::NotFound(format!("No game with code {}", code)))?;

        if game.status != GameStatus::Waiting {
            return Err(GameError::Validation(
                "Game has already started".to_string(),
            ));
        }
        if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(&game.expires_at) {
            if chrono::Utc::now() > expires {
                return Err(GameError::Validation("Game has expired".to_string()));
            }
        }

        let name = player_name.trim().to_string();
        if name.is_empty() {
            return Err(GameError::Validation("Player name cannot be empty".into()));
        }

        // Uniqueness check and insert under one write lock so two racing
        // joins with the same name cannot both succeed
        let player = {
            let mut players = self.players.write().await;
            let roster: Vec<Player> = players
                .values()
                .filter(|p| p.game_id == game.id)
                .cloned()
                .collect();

            if roster
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&name))
            {
                return Err(GameError::Validation(format!(
                    "Name '{}' is already taken",
                    name
                )));
            }

            let player = Player {
                id: ulid::Ulid::new().to_string(),
                game_id: game.id.clone(),
                name,
                team: team::assign_team(&roster),
                score: 0,
                is_host: roster.is_empty(),
                connection: ConnectionStatus::Connected,
                last_heartbeat: chrono::Utc::now().to_rfc3339(),
                times_selected: 0,
            };
            players.insert(player.id.clone(), player.clone());
            player
        };

        tracing::info!(
            "Player {} joined game {} on team {:?}",
            player.name,
            game.join_code,
            player.team
        );
        self.broadcast_game(
            &game.id,
            ServerMessage::PlayerJoined {
                player: player.clone(),
            },
        )
        .await;

        Ok((player, game))
    }

    /// Start a waiting game and create round 1
    pub async fn start_game(&self, code: &str) -> GameResult<Game> {
        let game = self
            .find_game_by_code(code)
            .await
            .ok_or_else(|| GameError::NotFound(format!("No game with code {}", code)))?;

        if game.status != GameStatus::Waiting {
            return Err(GameError::Validation(
                "Game is not in the lobby".to_string(),
            ));
        }

        let roster = self.connected_roster(&game.id).await;
        if roster.len() < 2 {
            return Err(GameError::Validation(
                "At least 2 connected players are required".to_string(),
            ));
        }
        if !roster.iter().any(|p| p.team == Team::Good)
            || !roster.iter().any(|p| p.team == Team::Evil)
        {
            return Err(GameError::Validation(
                "Both teams need at least one player".to_string(),
            ));
        }

        // Round creation runs under the advancement lock like any other
        // round transition; refusal means another start or advance is in
        // flight and the game must not leave the lobby
        let _guard = self.try_advance_lock(&game.id).ok_or_else(|| {
            GameError::Validation("Round advancement already in progress".to_string())
        })?;

        let game = {
            let mut games = self.games.write().await;
            let g = games
                .get_mut(&game.id)
                .ok_or_else(|| GameError::NotFound("Game disappeared".to_string()))?;
            if g.mode == GameMode::PlayEveryone {
                // Everyone gets selected once: one pair per round
                g.total_rounds = (roster.len() as u32).div_ceil(2);
            }
            g.status = GameStatus::InProgress;
            g.clone()
        };

        tracing::info!("Starting game {} ({} rounds)", game.join_code, game.total_rounds);
        self.broadcast_game(&game.id, ServerMessage::GameStarted { game: game.clone() })
            .await;

        self.create_round(&game.id).await?;

        Ok(game)
    }

    /// Advance to the next round, or complete the game when the last round
    /// has been played. Idempotent under the per-game advancement lock: a
    /// duplicate request while one is in flight is a silent no-op.
    pub async fn advance_round(&self, code: &str) -> GameResult<Option<Round>> {
        let game = self
            .find_game_by_code(code)
            .await
            .ok_or_else(|| GameError::NotFound(format!("No game with code {}", code)))?;

        if game.status != GameStatus::InProgress {
            return Err(GameError::Validation(
                "Game is not in progress".to_string(),
            ));
        }

        let _guard = match self.try_advance_lock(&game.id) {
            Some(guard) => guard,
            None => {
                tracing::debug!(
                    "Duplicate advance for game {} while one is in flight",
                    game.join_code
                );
                return Ok(None);
            }
        };

        // A live round is never abandoned by an advance; its timers would
        // keep firing and mutate scores underneath the new round
        if let Some(current) = self.current_round(&game.id).await {
            if current.status != RoundStatus::Complete {
                return Err(GameError::Validation(
                    "Current round is still in progress".to_string(),
                ));
            }
        }

        if game.current_round >= game.total_rounds {
            self.complete_game(&game.id).await?;
            return Ok(None);
        }

        let round = self.create_round(&game.id).await?;
        Ok(Some(round))
    }

    async fn complete_game(&self, game_id: &GameId) -> GameResult<()> {
        let game = {
            let mut games = self.games.write().await;
            let g = games
                .get_mut(game_id)
                .ok_or_else(|| GameError::NotFound("Game not found".to_string()))?;
            g.status = GameStatus::Completed;
            g.clone()
        };

        let final_scores = self.team_score_totals(game_id).await;
        tracing::info!("Game {} completed: {:?}", game.join_code, final_scores);

        self.broadcast_game(
            game_id,
            ServerMessage::GameCompleted {
                game,
                final_scores,
            },
        )
        .await;
        Ok(())
    }

    /// Cumulative score per team across the roster
    pub async fn team_score_totals(&self, game_id: &GameId) -> Vec<TeamScore> {
        let players = self.players.read().await;
        let mut good = 0u32;
        let mut evil = 0u32;
        for p in players.values().filter(|p| p.game_id == *game_id) {
            match p.team {
                Team::Good => good += p.score,
                Team::Evil => evil += p.score,
            }
        }
        vec![
            TeamScore {
                team: Team::Good,
                total: good,
            },
            TeamScore {
                team: Team::Evil,
                total: evil,
            },
        ]
    }

    /// Return a completed game to the lobby: round history deleted, scores
    /// zeroed, roster preserved.
    pub async fn reset_to_lobby(&self, code: &str) -> GameResult<Game> {
        let game = self
            .find_game_by_code(code)
            .await
            .ok_or_else(|| GameError::NotFound(format!("No game with code {}", code)))?;

        if game.status != GameStatus::Completed {
            return Err(GameError::Validation(
                "Only a completed game can be reset".to_string(),
            ));
        }

        let round_ids: Vec<RoundId> = {
            let mut rounds = self.rounds.write().await;
            let ids: Vec<RoundId> = rounds
                .values()
                .filter(|r| r.game_id == game.id)
                .map(|r| r.id.clone())
                .collect();
            for id in &ids {
                rounds.remove(id);
            }
            ids
        };
        {
            let mut submissions = self.submissions.write().await;
            submissions.retain(|_, s| !round_ids.contains(&s.round_id));
        }
        {
            let mut votes = self.votes.write().await;
            votes.retain(|_, v| !round_ids.contains(&v.round_id));
        }
        {
            let mut players = self.players.write().await;
            for p in players.values_mut().filter(|p| p.game_id == game.id) {
                p.score = 0;
                p.times_selected = 0;
            }
        }

        let game = {
            let mut games = self.games.write().await;
            let g = games
                .get_mut(&game.id)
                .ok_or_else(|| GameError::NotFound("Game disappeared".to_string()))?;
            g.status = GameStatus::Waiting;
            g.current_round = 0;
            g.clone()
        };

        let players = self.connected_roster(&game.id).await;
        tracing::info!("Game {} reset to lobby", game.join_code);
        self.broadcast_game(
            &game.id,
            ServerMessage::GameResetToLobby {
                game: game.clone(),
                players,
            },
        )
        .await;

        Ok(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_code_alphabet_excludes_confusables() {
        for _ in 0..50 {
            let code = generate_join_code();
            assert_eq!(code.len(), CODE_LENGTH);
            for c in code.chars() {
                assert!(!"0O1IL".contains(c), "confusable char {} in {}", c, code);
            }
        }
    }

    #[tokio::test]
    async fn test_create_game_validates_round_bounds() {
        let state = AppState::new();
        assert!(state
            .create_game("Host".into(), 0, GameMode::Classic)
            .await
            .is_err());
        assert!(state
            .create_game("Host".into(), 21, GameMode::Classic)
            .await
            .is_err());
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        assert_eq!(game.status, GameStatus::Waiting);
        assert_eq!(game.total_rounds, 5);
        assert_eq!(game.current_round, 0);
    }

    #[tokio::test]
    async fn test_join_rejects_duplicate_name_case_insensitive() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();

        state.join_game(&game.join_code, "Alice").await.unwrap();
        let result = state.join_game(&game.join_code, "ALICE").await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[tokio::test]
    async fn test_first_joiner_is_host() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();

        let (alice, _) = state.join_game(&game.join_code, "Alice").await.unwrap();
        let (bob, _) = state.join_game(&game.join_code, "Bob").await.unwrap();
        assert!(alice.is_host);
        assert!(!bob.is_host);
    }

    #[tokio::test]
    async fn test_join_balances_teams() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();

        for name in ["A", "B", "C", "D"] {
            state.join_game(&game.join_code, name).await.unwrap();
        }
        let roster = state.connected_roster(&game.id).await;
        let good = roster.iter().filter(|p| p.team == Team::Good).count();
        let evil = roster.iter().filter(|p| p.team == Team::Evil).count();
        assert_eq!(good, 2);
        assert_eq!(evil, 2);
    }

    #[tokio::test]
    async fn test_start_requires_two_players_on_both_teams() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();

        assert!(state.start_game(&game.join_code).await.is_err());
        state.join_game(&game.join_code, "Alice").await.unwrap();
        assert!(state.start_game(&game.join_code).await.is_err());
    }

    #[tokio::test]
    async fn test_start_play_everyone_computes_rounds() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 1, GameMode::PlayEveryone)
            .await
            .unwrap();

        for name in ["A", "B", "C", "D", "E"] {
            state.join_game(&game.join_code, name).await.unwrap();
        }
        let started = state.start_game(&game.join_code).await.unwrap();
        // ceil(5 / 2) = 3
        assert_eq!(started.total_rounds, 3);
        assert_eq!(started.status, GameStatus::InProgress);
    }

    #[tokio::test]
    async fn test_join_rejected_after_start() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        for name in ["A", "B", "C", "D"] {
            state.join_game(&game.join_code, name).await.unwrap();
        }
        state.start_game(&game.join_code).await.unwrap();

        let result = state.join_game(&game.join_code, "Late").await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[tokio::test]
    async fn test_advance_rejected_while_round_in_progress() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        for name in ["A", "B", "C", "D"] {
            state.join_game(&game.join_code, name).await.unwrap();
        }
        state.start_game(&game.join_code).await.unwrap();

        // Round 1 is still prompting; advancing would leave it live with
        // armed timers underneath round 2
        let result = state.advance_round(&game.join_code).await;
        assert!(matches!(result, Err(GameError::Validation(_))));

        let game = state.find_game_by_code(&game.join_code).await.unwrap();
        assert_eq!(game.current_round, 1);
    }

    #[tokio::test]
    async fn test_start_refused_while_advance_lock_held() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        for name in ["A", "B", "C", "D"] {
            state.join_game(&game.join_code, name).await.unwrap();
        }

        let _guard = state.try_advance_lock(&game.id).unwrap();
        let result = state.start_game(&game.join_code).await;
        assert!(matches!(result, Err(GameError::Validation(_))));

        // The refused start leaves the lobby untouched
        let game = state.find_game_by_code(&game.join_code).await.unwrap();
        assert_eq!(game.status, GameStatus::Waiting);
        assert_eq!(game.current_round, 0);
    }

    #[tokio::test]
    async fn test_reset_requires_completed_game() {
        let state = AppState::new();
        let game = state
            .create_game("Host".into(), 5, GameMode::Classic)
            .await
            .unwrap();
        let result = state.reset_to_lobby(&game.join_code).await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }
}
