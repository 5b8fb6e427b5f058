use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;
pub type RoundId = String;
pub type SubmissionId = String;
pub type VoteId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Waiting,
    InProgress,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Fixed round count chosen at creation
    Classic,
    /// Round count recomputed at start so every player gets selected once
    PlayEveryone,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Team {
    Good,
    Evil,
}

impl Team {
    pub fn opponent(&self) -> Team {
        match self {
            Team::Good => Team::Evil,
            Team::Evil => Team::Good,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Prompting,
    Generating,
    Voting,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    /// Short human-entered join code (confusable-free alphabet)
    pub join_code: String,
    pub host_name: String,
    pub mode: GameMode,
    pub status: GameStatus,
    /// 0 before round 1; invariant: current_round <= total_rounds
    pub current_round: u32,
    pub total_rounds: u32,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub game_id: GameId,
    /// Unique per game, case-insensitive
    pub name: String,
    pub team: Team,
    pub score: u32,
    pub is_host: bool,
    pub connection: ConnectionStatus,
    pub last_heartbeat: String,
    /// How many rounds this player has been selected as a participant
    pub times_selected: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub game_id: GameId,
    /// 1-based, unique per game
    pub number: u32,
    pub status: RoundStatus,
    /// The neutral target image both teams try to approximate
    pub reference_image_url: Option<String>,
    pub reference_prompt: String,
    pub reference_status: GenerationStatus,
    pub reference_error: Option<String>,
    pub reference_attempts: u32,
    pub good_participant: PlayerId,
    pub evil_participant: PlayerId,
    pub prompting_deadline: String,
    pub winning_team: Option<Team>,
    pub auto_completed: bool,
    pub all_images_ready: bool,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl Round {
    pub fn is_participant(&self, player_id: &str) -> bool {
        self.good_participant == player_id || self.evil_participant == player_id
    }

    /// The round slot a participant was assigned to, if any
    pub fn slot_for(&self, player_id: &str) -> Option<Team> {
        if self.good_participant == player_id {
            Some(Team::Good)
        } else if self.evil_participant == player_id {
            Some(Team::Evil)
        } else {
            None
        }
    }

    pub fn participant_for(&self, team: Team) -> &PlayerId {
        match team {
            Team::Good => &self.good_participant,
            Team::Evil => &self.evil_participant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub team: Team,
    pub prompt_text: String,
    pub image_url: Option<String>,
    pub status: GenerationStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub team: Team,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_opponent() {
        assert_eq!(Team::Good.opponent(), Team::Evil);
        assert_eq!(Team::Evil.opponent(), Team::Good);
    }

    #[test]
    fn test_round_slot_lookup() {
        let round = Round {
            id: "r1".to_string(),
            game_id: "g1".to_string(),
            number: 1,
            status: RoundStatus::Prompting,
            reference_image_url: None,
            reference_prompt: "a lighthouse".to_string(),
            reference_status: GenerationStatus::Pending,
            reference_error: None,
            reference_attempts: 0,
            good_participant: "alice".to_string(),
            evil_participant: "bob".to_string(),
            prompting_deadline: chrono::Utc::now().to_rfc3339(),
            winning_team: None,
            auto_completed: false,
            all_images_ready: false,
            started_at: chrono::Utc::now().to_rfc3339(),
            ended_at: None,
        };

        assert_eq!(round.slot_for("alice"), Some(Team::Good));
        assert_eq!(round.slot_for("bob"), Some(Team::Evil));
        assert_eq!(round.slot_for("carol"), None);
        assert!(round.is_participant("alice"));
        assert!(!round.is_participant("carol"));
    }
}
