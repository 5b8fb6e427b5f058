//! Round lifecycle engine.
//!
//! Owns round creation, prompt intake, the prompting-timeout and voting
//! timers, the generation-complete transition, and completion/scoring.
//! Every timer callback re-reads the round's status before mutating, so
//! whichever of the timer and the event-driven path loses the race becomes
//! a no-op.

use super::{AppState, GameError, GameResult};
use crate::imagegen::{GenerationStep, ProgressFn, SizeHint};
use crate::protocol::ServerMessage;
use crate::types::*;
use rand::prelude::IndexedRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Prompting window, also used as the deadline persisted on the round
pub const PROMPTING_SECONDS: i64 = 50;
/// Voting window, armed when all images are ready
pub const VOTING_SECONDS: u64 = 50;

const MAX_PROMPT_CHARS: usize = 500;

/// Fixed seed prompt for round 1
const SEED_REFERENCE_PROMPT: &str =
    "A lighthouse on a rocky cliff at golden hour, dramatic clouds, oil painting";

/// Themed pool for later rounds when no text model authors the reference
const REFERENCE_PROMPT_POOL: &[&str] = &[
    "A fox reading a newspaper in a cozy armchair, warm lamplight, storybook illustration",
    "An ancient tree growing through the ruins of a cathedral, morning mist, fantasy art",
    "A street market on a rainy evening, neon reflections on wet cobblestones",
    "A hot air balloon drifting over snow-capped mountains at dawn, soft pastels",
    "A robot tending a rooftop garden in a futuristic city, golden sunset",
    "An underwater library with fish swimming between the shelves, dreamlike",
    "A steam train crossing a viaduct above a sea of clouds, vintage poster style",
    "A cat astronaut planting a flag on a cheese moon, retro sci-fi illustration",
];

impl AppState {
    /// Create the next round for a game: select participants, persist the
    /// round with its prompting deadline, kick off reference generation,
    /// and arm the prompting timer. Callers hold the advancement lock.
    pub async fn create_round(&self, game_id: &GameId) -> GameResult<Round> {
        let game = self
            .games
            .read()
            .await
            .get(game_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound("Game not found".to_string()))?;

        if game.status != GameStatus::InProgress {
            return Err(GameError::Validation(
                "Game is not in progress".to_string(),
            ));
        }
        if game.current_round >= game.total_rounds {
            return Err(GameError::Validation(
                "All rounds have been played".to_string(),
            ));
        }

        let number = game.current_round + 1;
        let roster = self.connected_roster(game_id).await;
        let recent = self.recent_participants(game_id, number).await;

        let (good, evil) = crate::team::select_participants(&roster, &recent)
            .map_err(|e| GameError::Validation(format!("Cannot create round: {}", e)))?;

        let reference_prompt = self.pick_reference_prompt(game_id, number).await;
        let now = chrono::Utc::now();

        let round = Round {
            id: ulid::Ulid::new().to_string(),
            game_id: game_id.clone(),
            number,
            status: RoundStatus::Prompting,
            reference_image_url: None,
            reference_prompt,
            reference_status: GenerationStatus::Generating,
            reference_error: None,
            reference_attempts: 0,
            good_participant: good.clone(),
            evil_participant: evil.clone(),
            prompting_deadline: (now + chrono::Duration::seconds(PROMPTING_SECONDS)).to_rfc3339(),
            winning_team: None,
            auto_completed: false,
            all_images_ready: false,
            started_at: now.to_rfc3339(),
            ended_at: None,
        };

        self.rounds
            .write()
            .await
            .insert(round.id.clone(), round.clone());
        {
            let mut games = self.games.write().await;
            if let Some(g) = games.get_mut(game_id) {
                g.current_round = number;
            }
        }
        {
            let mut players = self.players.write().await;
            for id in [&good, &evil] {
                if let Some(p) = players.get_mut(id) {
                    p.times_selected += 1;
                }
            }
        }

        tracing::info!(
            "Round {} of game {} started: {} (GOOD) vs {} (EVIL)",
            number,
            game.join_code,
            good,
            evil
        );
        self.broadcast_game(
            game_id,
            ServerMessage::RoundStarted {
                round: round.clone(),
            },
        )
        .await;

        // Reference generation runs detached; the round is never blocked
        // from starting by a slow or failed reference image
        let state = self.clone();
        let round_id = round.id.clone();
        let prompt = round.reference_prompt.clone();
        tokio::spawn(async move {
            state.generate_reference(&round_id, &prompt).await;
        });

        // Server-authoritative prompting timer; the client-reported signal
        // funnels into the same freshness-checked path
        let state = self.clone();
        let round_id = round.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(PROMPTING_SECONDS as u64)).await;
            state.auto_complete_prompting(&round_id).await;
        });

        Ok(round)
    }

    /// Round 1 uses the fixed seed; later rounds draw from the pool,
    /// never repeating the previous round's prompt.
    async fn pick_reference_prompt(&self, game_id: &GameId, number: u32) -> String {
        if number == 1 {
            return SEED_REFERENCE_PROMPT.to_string();
        }

        let previous = {
            let rounds = self.rounds.read().await;
            rounds
                .values()
                .find(|r| r.game_id == *game_id && r.number == number - 1)
                .map(|r| r.reference_prompt.clone())
        };

        let candidates: Vec<&str> = REFERENCE_PROMPT_POOL
            .iter()
            .copied()
            .filter(|p| previous.as_deref() != Some(*p))
            .collect();
        candidates
            .choose(&mut rand::rng())
            .map(|p| p.to_string())
            .unwrap_or_else(|| SEED_REFERENCE_PROMPT.to_string())
    }

    /// Participants of the last two rounds (relative to `upcoming_number`)
    async fn recent_participants(
        &self,
        game_id: &GameId,
        upcoming_number: u32,
    ) -> HashSet<PlayerId> {
        let rounds = self.rounds.read().await;
        rounds
            .values()
            .filter(|r| {
                r.game_id == *game_id
                    && r.number < upcoming_number
                    && r.number + 2 >= upcoming_number
            })
            .flat_map(|r| [r.good_participant.clone(), r.evil_participant.clone()])
            .collect()
    }

    async fn generate_reference(&self, round_id: &RoundId, prompt: &str) {
        let outcome = self
            .generator
            .generate(prompt, SizeHint::Preview, None)
            .await;

        let round = {
            let mut rounds = self.rounds.write().await;
            match rounds.get_mut(round_id) {
                Some(r) => {
                    r.reference_image_url = Some(outcome.url);
                    r.reference_status = outcome.status;
                    r.reference_attempts = outcome.attempts;
                    r.reference_error = outcome.error;
                    r.clone()
                }
                None => return,
            }
        };

        if round.reference_status == GenerationStatus::Failed {
            tracing::warn!(
                "Reference image for round {} fell back after {} attempts",
                round.number,
                round.reference_attempts
            );
        }
        let game_id = round.game_id.clone();
        self.broadcast_game(&game_id, ServerMessage::RoundUpdated { round })
            .await;
    }

    /// Prompt intake. On the second accepted submission the round moves to
    /// GENERATING and image generation is triggered without blocking the
    /// caller.
    pub async fn submit_prompt(
        &self,
        round_id: &RoundId,
        player_id: &PlayerId,
        text: &str,
    ) -> GameResult<Submission> {
        let round = self
            .rounds
            .read()
            .await
            .get(round_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound("Round not found".to_string()))?;

        if round.status != RoundStatus::Prompting {
            return Err(GameError::Validation(
                "Round is not accepting prompts".to_string(),
            ));
        }

        let slot = round.slot_for(player_id).ok_or_else(|| {
            GameError::Validation("Only the round participants may submit a prompt".to_string())
        })?;

        let player = self
            .players
            .read()
            .await
            .get(player_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound("Player not found".to_string()))?;

        // The persisted team must agree with the assigned round slot; a
        // mismatch means selection corrupted upstream and must surface
        // rather than be reconciled here
        if player.team != slot {
            tracing::error!(
                "Player {} persisted team {:?} disagrees with round slot {:?} in round {}",
                player_id,
                player.team,
                slot,
                round_id
            );
            return Err(GameError::Consistency(format!(
                "player {} team does not match assigned round slot",
                player_id
            )));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::Validation("Prompt cannot be empty".into()));
        }
        if text.chars().count() > MAX_PROMPT_CHARS {
            return Err(GameError::Validation(format!(
                "Prompt must be at most {} characters",
                MAX_PROMPT_CHARS
            )));
        }

        // Read-then-insert under the write lock: exactly one submission per
        // (round, team) survives a race
        let (submission, total) = {
            let mut submissions = self.submissions.write().await;
            if submissions
                .values()
                .any(|s| s.round_id == *round_id && s.team == slot)
            {
                return Err(GameError::Validation(format!(
                    "Team {:?} has already submitted",
                    slot
                )));
            }

            let submission = Submission {
                id: ulid::Ulid::new().to_string(),
                round_id: round_id.clone(),
                player_id: player_id.clone(),
                team: slot,
                prompt_text: text.to_string(),
                image_url: None,
                status: GenerationStatus::Pending,
                attempts: 0,
                error: None,
                generated_at: None,
            };
            submissions.insert(submission.id.clone(), submission.clone());
            let total = submissions
                .values()
                .filter(|s| s.round_id == *round_id)
                .count();
            (submission, total)
        };

        tracing::info!(
            "Team {:?} prompt accepted for round {} ({}/2)",
            slot,
            round.number,
            total
        );

        if total == 2 {
            let round = {
                let mut rounds = self.rounds.write().await;
                match rounds.get_mut(round_id) {
                    Some(r) if r.status == RoundStatus::Prompting => {
                        r.status = RoundStatus::Generating;
                        Some(r.clone())
                    }
                    _ => None,
                }
            };

            if let Some(round) = round {
                self.broadcast_game(
                    &round.game_id,
                    ServerMessage::RoundUpdated {
                        round: round.clone(),
                    },
                )
                .await;

                // Generation runs detached; the submission result returns
                // to the caller immediately
                let state = self.clone();
                let round_id = round_id.clone();
                tokio::spawn(async move {
                    state.generate_submission_images(&round_id).await;
                });
            }
        }

        Ok(submission)
    }

    /// Generate both teams' images in parallel, then move the round to
    /// VOTING. Failed generations still receive the fallback artifact so
    /// voting is never blocked.
    async fn generate_submission_images(&self, round_id: &RoundId) {
        let pending = self.round_submissions(round_id).await;

        let tasks = pending.into_iter().map(|submission| {
            let state = self.clone();
            async move { state.generate_one_submission(submission).await }
        });
        futures::future::join_all(tasks).await;

        self.finish_generation(round_id).await;
    }

    async fn generate_one_submission(&self, submission: Submission) {
        let game_id = {
            let rounds = self.rounds.read().await;
            match rounds.get(&submission.round_id) {
                Some(r) => r.game_id.clone(),
                None => return,
            }
        };

        {
            let mut submissions = self.submissions.write().await;
            if let Some(s) = submissions.get_mut(&submission.id) {
                s.status = GenerationStatus::Generating;
            }
        }

        // Progress milestones stream to the game topic as they happen
        let progress_state = self.clone();
        let progress_game = game_id.clone();
        let team = submission.team;
        let progress: ProgressFn = Arc::new(move |step: GenerationStep| {
            let (step_no, total_steps, message) = step.describe();
            let state = progress_state.clone();
            let game_id = progress_game.clone();
            tokio::spawn(async move {
                state
                    .broadcast_game(
                        &game_id,
                        ServerMessage::GenerationProgress {
                            team,
                            step: step_no,
                            total_steps,
                            message,
                            percent: step_no * 100 / total_steps,
                        },
                    )
                    .await;
            });
        });

        let outcome = self
            .generator
            .generate(&submission.prompt_text, SizeHint::Full, Some(&progress))
            .await;

        let failed = outcome.status == GenerationStatus::Failed;
        let error = outcome.error.clone();

        let updated = {
            let mut submissions = self.submissions.write().await;
            match submissions.get_mut(&submission.id) {
                Some(s) => {
                    s.image_url = Some(outcome.url);
                    s.status = outcome.status;
                    s.attempts = outcome.attempts;
                    s.error = outcome.error;
                    s.generated_at = Some(chrono::Utc::now().to_rfc3339());
                    s.clone()
                }
                None => return,
            }
        };

        if failed {
            self.broadcast_game(
                &game_id,
                ServerMessage::GenerationError {
                    team,
                    error: error.unwrap_or_else(|| "generation failed".to_string()),
                },
            )
            .await;
        } else {
            self.broadcast_game(
                &game_id,
                ServerMessage::GenerationComplete {
                    team,
                    submission: updated,
                },
            )
            .await;
        }
    }

    /// Once both submissions are settled, transition to VOTING and arm the
    /// voting timer.
    async fn finish_generation(&self, round_id: &RoundId) {
        let round = {
            let mut rounds = self.rounds.write().await;
            match rounds.get_mut(round_id) {
                Some(r) if r.status == RoundStatus::Generating => {
                    r.status = RoundStatus::Voting;
                    r.all_images_ready = true;
                    r.clone()
                }
                // Already advanced elsewhere; the race loser no-ops
                _ => return,
            }
        };

        tracing::info!("Round {} voting open", round.number);
        self.broadcast_game(
            &round.game_id,
            ServerMessage::VotingStarted {
                round: round.clone(),
                all_images_ready: true,
            },
        )
        .await;

        let state = self.clone();
        let round_id = round_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(VOTING_SECONDS)).await;
            state.complete_voting(&round_id).await;
        });
    }

    /// Forced completion when the prompting deadline elapses. Three
    /// outcomes: both submitted (no-op, normal flow supersedes), one
    /// submitted (that team's participant wins by default), none submitted
    /// (no winner). Clock authority stays with the persisted deadline: a
    /// report arriving before it has elapsed is ignored.
    pub async fn auto_complete_prompting(&self, round_id: &RoundId) {
        let deadline = {
            let rounds = self.rounds.read().await;
            match rounds.get(round_id) {
                Some(r) if r.status == RoundStatus::Prompting => r.prompting_deadline.clone(),
                // Round already advanced; the timer is a no-op
                _ => return,
            }
        };

        if let Ok(deadline) = chrono::DateTime::parse_from_rfc3339(&deadline) {
            if chrono::Utc::now() < deadline {
                return;
            }
        }

        let submissions = self.round_submissions(round_id).await;
        if submissions.len() >= 2 {
            return;
        }

        let winner = submissions.first().map(|s| s.team);

        let round = {
            let mut rounds = self.rounds.write().await;
            match rounds.get_mut(round_id) {
                Some(r) if r.status == RoundStatus::Prompting => {
                    r.status = RoundStatus::Complete;
                    r.winning_team = winner;
                    r.auto_completed = true;
                    r.ended_at = Some(chrono::Utc::now().to_rfc3339());
                    r.clone()
                }
                _ => return,
            }
        };

        if let Some(team) = winner {
            self.award_point(&round, team).await;
            tracing::info!(
                "Round {} auto-completed: team {:?} wins by default",
                round.number,
                team
            );
        } else {
            tracing::info!("Round {} skipped: no prompts submitted", round.number);
        }

        let players = self.connected_roster(&round.game_id).await;
        let msg = if winner.is_some() {
            ServerMessage::RoundAutoCompleted {
                round: round.clone(),
                players,
            }
        } else {
            ServerMessage::RoundSkipped {
                round: round.clone(),
                players,
            }
        };
        self.broadcast_game(&round.game_id, msg).await;
    }

    /// Complete a voting round: called when every eligible voter has voted
    /// or when the voting timer fires. The winner is the team with strictly
    /// more votes; a tie yields no winner and no score change.
    pub async fn complete_voting(&self, round_id: &RoundId) {
        let voting = {
            let rounds = self.rounds.read().await;
            matches!(
                rounds.get(round_id),
                Some(r) if r.status == RoundStatus::Voting
            )
        };
        if !voting {
            return;
        }

        let tally = self.tally_votes(round_id).await;
        let winner = match tally.good.cmp(&tally.evil) {
            std::cmp::Ordering::Greater => Some(Team::Good),
            std::cmp::Ordering::Less => Some(Team::Evil),
            std::cmp::Ordering::Equal => None,
        };

        let round = {
            let mut rounds = self.rounds.write().await;
            match rounds.get_mut(round_id) {
                Some(r) if r.status == RoundStatus::Voting => {
                    r.status = RoundStatus::Complete;
                    r.winning_team = winner;
                    r.ended_at = Some(chrono::Utc::now().to_rfc3339());
                    r.clone()
                }
                // Lost the race against another completion path
                _ => return,
            }
        };

        if let Some(team) = winner {
            self.award_point(&round, team).await;
        }
        tracing::info!(
            "Round {} completed: winner {:?} ({} GOOD / {} EVIL)",
            round.number,
            winner,
            tally.good,
            tally.evil
        );

        // Completion always re-fetches the roster; scores may have changed
        let game_id = round.game_id.clone();
        let players = self.connected_roster(&game_id).await;
        self.broadcast_game(&game_id, ServerMessage::RoundCompleted { round, players })
            .await;
    }

    /// +1 to the winning team's participant (not the whole team)
    async fn award_point(&self, round: &Round, team: Team) {
        let winner_id = round.participant_for(team);
        let mut players = self.players.write().await;
        if let Some(p) = players.get_mut(winner_id) {
            p.score += 1;
        }
    }
}
