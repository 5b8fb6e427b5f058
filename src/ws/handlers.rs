//! WebSocket message dispatch
//!
//! Entry point for handling client messages: validation and not-found
//! failures come back as Error frames; broadcasts fan out through the
//! game topic as a side effect of the state operations.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, GameError};
use std::sync::Arc;

fn error_reply(e: GameError) -> Option<ServerMessage> {
    Some(ServerMessage::Error {
        code: e.code().to_string(),
        msg: e.to_string(),
    })
}

/// Handle a client message and return the direct reply, if any
pub async fn handle_message(msg: ClientMessage, state: &Arc<AppState>) -> Option<ServerMessage> {
    match msg {
        ClientMessage::CreateGame {
            host_name,
            total_rounds,
            mode,
        } => match state.create_game(host_name, total_rounds, mode).await {
            Ok(game) => {
                let join_code = game.join_code.clone();
                Some(ServerMessage::GameCreated { game, join_code })
            }
            Err(e) => error_reply(e),
        },

        ClientMessage::JoinGame { code, player_name } => {
            match state.join_game(&code, &player_name).await {
                Ok((player, game)) => Some(ServerMessage::Joined { player, game }),
                Err(e) => error_reply(e),
            }
        }

        ClientMessage::StartGame { code } => match state.start_game(&code).await {
            Ok(game) => Some(ServerMessage::GameStarted { game }),
            Err(e) => error_reply(e),
        },

        ClientMessage::SubmitPrompt {
            round_id,
            player_id,
            text,
        } => match state.submit_prompt(&round_id, &player_id, &text).await {
            Ok(submission) => Some(ServerMessage::PromptAccepted { submission }),
            Err(e) => error_reply(e),
        },

        ClientMessage::SubmitVote {
            round_id,
            player_id,
            team,
        } => match state.submit_vote(&round_id, &player_id, team).await {
            Ok(vote) => Some(ServerMessage::VoteAccepted { vote }),
            Err(e) => error_reply(e),
        },

        ClientMessage::AdvanceRound { code } => match state.advance_round(&code).await {
            // Both the next-round and game-completed outcomes broadcast;
            // a duplicate request while locked is a silent no-op
            Ok(_) => None,
            Err(e) => error_reply(e),
        },

        ClientMessage::ResetToLobby { code } => match state.reset_to_lobby(&code).await {
            Ok(_) => None,
            Err(e) => error_reply(e),
        },

        ClientMessage::Heartbeat { player_id } => match state.heartbeat(&player_id).await {
            Ok(()) => None,
            Err(e) => error_reply(e),
        },

        ClientMessage::Leave { player_id, code: _ } => match state.leave(&player_id).await {
            Ok(()) => None,
            Err(e) => error_reply(e),
        },

        ClientMessage::ReportPromptTimeout { round_id } => {
            // Compatible client-side trigger for the server-armed timer;
            // freshness-checked inside, so a stale report no-ops
            state.auto_complete_prompting(&round_id).await;
            None
        }

        ClientMessage::Resync { code } => match state.full_state(&code).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => error_reply(e),
        },
    }
}
