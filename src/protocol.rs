use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateGame {
        host_name: String,
        total_rounds: u32,
        mode: GameMode,
    },
    JoinGame {
        code: String,
        player_name: String,
    },
    StartGame {
        code: String,
    },
    SubmitPrompt {
        round_id: RoundId,
        player_id: PlayerId,
        text: String,
    },
    SubmitVote {
        round_id: RoundId,
        player_id: PlayerId,
        team: Team,
    },
    AdvanceRound {
        code: String,
    },
    ResetToLobby {
        code: String,
    },
    Heartbeat {
        player_id: PlayerId,
    },
    Leave {
        player_id: PlayerId,
        code: String,
    },
    /// Client-reported prompting-deadline-elapsed signal. The server arms its
    /// own timer for the same deadline, so this is a compatible extra trigger.
    ReportPromptTimeout {
        round_id: RoundId,
    },
    /// Request a full authoritative snapshot (recovery after missed broadcasts)
    Resync {
        code: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: String,
    },
    /// Authoritative snapshot, sent on join/resync
    FullState {
        game: Game,
        players: Vec<Player>,
        round: Option<Round>,
        submissions: Vec<Submission>,
        tally: Option<VoteTally>,
    },
    GameCreated {
        game: Game,
        join_code: String,
    },
    Joined {
        player: Player,
        game: Game,
    },
    PlayerJoined {
        player: Player,
    },
    GameStarted {
        game: Game,
    },
    RoundStarted {
        round: Round,
    },
    RoundUpdated {
        round: Round,
    },
    GenerationProgress {
        team: Team,
        step: u32,
        total_steps: u32,
        message: String,
        percent: u32,
    },
    GenerationComplete {
        team: Team,
        submission: Submission,
    },
    GenerationError {
        team: Team,
        error: String,
    },
    VotingStarted {
        round: Round,
        all_images_ready: bool,
    },
    VoteTallyUpdated {
        tally: VoteTally,
    },
    VoteAccepted {
        vote: Vote,
    },
    PromptAccepted {
        submission: Submission,
    },
    /// Normal completion (all votes in, or voting window elapsed)
    RoundCompleted {
        round: Round,
        players: Vec<Player>,
    },
    /// Forced completion with a default winner (one team never submitted)
    RoundAutoCompleted {
        round: Round,
        players: Vec<Player>,
    },
    /// Forced completion with no winner (neither team submitted)
    RoundSkipped {
        round: Round,
        players: Vec<Player>,
    },
    GameUpdated {
        game: Game,
    },
    GameCompleted {
        game: Game,
        final_scores: Vec<TeamScore>,
    },
    GameResetToLobby {
        game: Game,
        players: Vec<Player>,
    },
    PlayerRemoved {
        player_id: PlayerId,
        reason: RemovalReason,
    },
    Error {
        code: String,
        msg: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Disconnected,
    Left,
}

/// Per-team vote counts plus progress toward the eligible-voter total
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTally {
    pub good: u32,
    pub evil: u32,
    pub votes: u32,
    pub eligible: u32,
}

/// Final per-team score totals, broadcast with GameCompleted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamScore {
    pub team: Team,
    pub total: u32,
}
