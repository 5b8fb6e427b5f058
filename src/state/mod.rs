mod game;
mod player;
mod round;
mod vote;

use crate::imagegen::Generator;
use crate::protocol::{ServerMessage, VoteTally};
use crate::types::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};

pub use round::{PROMPTING_SECONDS, VOTING_SECONDS};

/// Result type for state-layer operations
pub type GameResult<T> = Result<T, GameError>;

/// Error taxonomy for client-initiated operations.
///
/// Validation and not-found failures are rejected synchronously with no
/// state mutation. Consistency violations indicate a defect upstream
/// (a player's persisted team disagreeing with their round slot) and are
/// never silently reconciled.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl GameError {
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Validation(_) => "VALIDATION",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::Consistency(_) => "CONSISTENCY",
        }
    }
}

/// Shared application state: the authoritative store for all entities plus
/// the per-game broadcast topics and the round-advancement locks.
#[derive(Clone)]
pub struct AppState {
    pub games: Arc<RwLock<HashMap<GameId, Game>>>,
    pub players: Arc<RwLock<HashMap<PlayerId, Player>>>,
    pub rounds: Arc<RwLock<HashMap<RoundId, Round>>>,
    pub submissions: Arc<RwLock<HashMap<SubmissionId, Submission>>>,
    pub votes: Arc<RwLock<HashMap<VoteId, Vote>>>,
    /// One broadcast channel per game topic
    topics: Arc<RwLock<HashMap<GameId, broadcast::Sender<ServerMessage>>>>,
    /// Games with a round advancement currently in flight
    advance_locks: Arc<Mutex<HashSet<GameId>>>,
    pub generator: Arc<Generator>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_generator(Generator::new(None, Default::default()))
    }

    pub fn with_generator(generator: Generator) -> Self {
        Self {
            games: Arc::new(RwLock::new(HashMap::new())),
            players: Arc::new(RwLock::new(HashMap::new())),
            rounds: Arc::new(RwLock::new(HashMap::new())),
            submissions: Arc::new(RwLock::new(HashMap::new())),
            votes: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(RwLock::new(HashMap::new())),
            advance_locks: Arc::new(Mutex::new(HashSet::new())),
            generator: Arc::new(generator),
        }
    }

    /// Subscribe to a game's topic, creating the channel on first use
    pub async fn subscribe(&self, game_id: &GameId) -> broadcast::Receiver<ServerMessage> {
        let mut topics = self.topics.write().await;
        topics
            .entry(game_id.clone())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Fire-and-forget broadcast to everyone subscribed to a game.
    /// At most once per state change; a missed message is recoverable only
    /// via an explicit Resync.
    pub async fn broadcast_game(&self, game_id: &GameId, msg: ServerMessage) {
        let topics = self.topics.read().await;
        if let Some(tx) = topics.get(game_id) {
            // Send errors just mean nobody is listening
            let _ = tx.send(msg);
        }
    }

    /// Try to take the per-game advancement lock. Returns None when another
    /// advancement is already in flight; callers treat that as a duplicate
    /// request and no-op.
    pub fn try_advance_lock(&self, game_id: &GameId) -> Option<AdvanceGuard> {
        let mut held = match self.advance_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if held.insert(game_id.clone()) {
            Some(AdvanceGuard {
                locks: self.advance_locks.clone(),
                game_id: game_id.clone(),
            })
        } else {
            None
        }
    }

    /// Assemble the authoritative full-state snapshot for a game
    pub async fn full_state(&self, code: &str) -> GameResult<ServerMessage> {
        let game = self
            .find_game_by_code(code)
            .await
            .ok_or_else(|| GameError::NotFound(format!("No game with code {}", code)))?;

        let players = self.connected_roster(&game.id).await;
        let round = self.current_round(&game.id).await;

        let (submissions, tally) = match &round {
            Some(r) => {
                let subs = self.round_submissions(&r.id).await;
                let tally = if r.status == RoundStatus::Voting || r.status == RoundStatus::Complete
                {
                    Some(self.tally_votes(&r.id).await)
                } else {
                    None
                };
                (subs, tally)
            }
            None => (Vec::new(), None),
        };

        Ok(ServerMessage::FullState {
            game,
            players,
            round,
            submissions,
            tally,
        })
    }

    /// The round matching the game's current round counter, if any
    pub async fn current_round(&self, game_id: &GameId) -> Option<Round> {
        let number = {
            let games = self.games.read().await;
            let game = games.get(game_id)?;
            if game.current_round == 0 {
                return None;
            }
            game.current_round
        };

        self.rounds
            .read()
            .await
            .values()
            .find(|r| r.game_id == *game_id && r.number == number)
            .cloned()
    }

    pub async fn round_submissions(&self, round_id: &RoundId) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .values()
            .filter(|s| s.round_id == *round_id)
            .cloned()
            .collect()
    }

    pub(crate) async fn tally_for(&self, round_id: &RoundId, eligible: u32) -> VoteTally {
        let votes = self.votes.read().await;
        let mut good = 0u32;
        let mut evil = 0u32;
        for vote in votes.values().filter(|v| v.round_id == *round_id) {
            match vote.team {
                Team::Good => good += 1,
                Team::Evil => evil += 1,
            }
        }
        VoteTally {
            good,
            evil,
            votes: good + evil,
            eligible,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for the per-game advancement lock
pub struct AdvanceGuard {
    locks: Arc<Mutex<HashSet<GameId>>>,
    game_id: GameId,
}

impl Drop for AdvanceGuard {
    fn drop(&mut self) {
        let mut held = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.game_id);
    }
}
