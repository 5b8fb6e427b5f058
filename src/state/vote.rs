use super::{AppState, GameError, GameResult};
use crate::protocol::{ServerMessage, VoteTally};
use crate::types::*;

impl AppState {
    /// Record a vote. When the recorded count reaches the eligible-voter
    /// count (connected roster minus the two participants) the round
    /// completes immediately, without waiting for the voting timer.
    pub async fn submit_vote(
        &self,
        round_id: &RoundId,
        player_id: &PlayerId,
        team: Team,
    ) -> GameResult<Vote> {
        let round = self
            .rounds
            .read()
            .await
            .get(round_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound("Round not found".to_string()))?;

        if round.status != RoundStatus::Voting {
            return Err(GameError::Validation(
                "Round is not accepting votes".to_string(),
            ));
        }
        if round.is_participant(player_id) {
            return Err(GameError::Validation(
                "Round participants cannot vote".to_string(),
            ));
        }

        let player = self
            .players
            .read()
            .await
            .get(player_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound("Player not found".to_string()))?;
        if player.game_id != round.game_id {
            return Err(GameError::Validation(
                "Player does not belong to this game".to_string(),
            ));
        }
        if player.connection != ConnectionStatus::Connected {
            return Err(GameError::Validation(
                "Disconnected players cannot vote".to_string(),
            ));
        }

        // Read-then-insert under the write lock: exactly one vote per
        // (round, player) survives a race
        let vote = {
            let mut votes = self.votes.write().await;
            if votes
                .values()
                .any(|v| v.round_id == *round_id && v.player_id == *player_id)
            {
                return Err(GameError::Validation("Already voted".to_string()));
            }

            let vote = Vote {
                id: ulid::Ulid::new().to_string(),
                round_id: round_id.clone(),
                player_id: player_id.clone(),
                team,
            };
            votes.insert(vote.id.clone(), vote.clone());
            vote
        };

        let tally = self.tally_votes(round_id).await;
        tracing::info!(
            "Vote recorded for round {}: {} GOOD / {} EVIL ({}/{})",
            round.number,
            tally.good,
            tally.evil,
            tally.votes,
            tally.eligible
        );
        self.broadcast_game(
            &round.game_id,
            ServerMessage::VoteTallyUpdated {
                tally: tally.clone(),
            },
        )
        .await;

        if tally.votes >= tally.eligible {
            self.complete_voting(round_id).await;
        }

        Ok(vote)
    }

    /// Current tally with the eligible-voter count for the round's game
    pub async fn tally_votes(&self, round_id: &RoundId) -> VoteTally {
        let game_id = {
            let rounds = self.rounds.read().await;
            rounds.get(round_id).map(|r| r.game_id.clone())
        };

        let eligible = match game_id {
            Some(game_id) => {
                let connected = self.connected_roster(&game_id).await.len() as u32;
                connected.saturating_sub(2)
            }
            None => 0,
        };

        self.tally_for(round_id, eligible).await
    }
}
