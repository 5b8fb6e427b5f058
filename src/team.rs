//! Team balancing and round-participant selection.
//!
//! Pure functions over a roster snapshot; all randomness is confined to
//! tie-breaks so results never worsen balance.

use crate::types::{Player, PlayerId, Team};
use rand::prelude::IndexedRandom;
use rand::Rng;
use std::collections::HashSet;

/// Errors from participant selection
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("team {0:?} has no eligible players")]
    EmptyTeam(Team),
}

/// Assign a new player to the team with fewer members; ties break randomly.
pub fn assign_team(roster: &[Player]) -> Team {
    let good = roster.iter().filter(|p| p.team == Team::Good).count();
    let evil = roster.iter().filter(|p| p.team == Team::Evil).count();

    match good.cmp(&evil) {
        std::cmp::Ordering::Less => Team::Good,
        std::cmp::Ordering::Greater => Team::Evil,
        std::cmp::Ordering::Equal => {
            if rand::rng().random_bool(0.5) {
                Team::Good
            } else {
                Team::Evil
            }
        }
    }
}

/// Select the two round participants, one per team.
///
/// Players in `recently_selected` (chosen in either of the last two rounds)
/// are excluded; if that empties a team, the exclusion is cleared and
/// selection retried once. Within each team the player with the minimum
/// times_selected wins, random tie-break among the minima.
pub fn select_participants(
    roster: &[Player],
    recently_selected: &HashSet<PlayerId>,
) -> Result<(PlayerId, PlayerId), SelectionError> {
    match try_select(roster, recently_selected) {
        Ok(pair) => Ok(pair),
        // Exclusion starved a team: retry with the exclusion list cleared
        Err(_) => try_select(roster, &HashSet::new()),
    }
}

fn try_select(
    roster: &[Player],
    excluded: &HashSet<PlayerId>,
) -> Result<(PlayerId, PlayerId), SelectionError> {
    let good = pick_from_team(roster, Team::Good, excluded)?;
    let evil = pick_from_team(roster, Team::Evil, excluded)?;
    Ok((good, evil))
}

fn pick_from_team(
    roster: &[Player],
    team: Team,
    excluded: &HashSet<PlayerId>,
) -> Result<PlayerId, SelectionError> {
    let eligible: Vec<&Player> = roster
        .iter()
        .filter(|p| p.team == team && !excluded.contains(&p.id))
        .collect();

    let min = eligible
        .iter()
        .map(|p| p.times_selected)
        .min()
        .ok_or(SelectionError::EmptyTeam(team))?;

    let minima: Vec<&&Player> = eligible
        .iter()
        .filter(|p| p.times_selected == min)
        .collect();

    // minima is non-empty here, but avoid unwrap anyway
    minima
        .choose(&mut rand::rng())
        .map(|p| p.id.clone())
        .ok_or(SelectionError::EmptyTeam(team))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionStatus;

    fn player(id: &str, team: Team, times_selected: u32) -> Player {
        Player {
            id: id.to_string(),
            game_id: "g1".to_string(),
            name: id.to_string(),
            team,
            score: 0,
            is_host: false,
            connection: ConnectionStatus::Connected,
            last_heartbeat: chrono::Utc::now().to_rfc3339(),
            times_selected,
        }
    }

    #[test]
    fn test_assign_team_prefers_smaller() {
        let roster = vec![
            player("a", Team::Good, 0),
            player("b", Team::Good, 0),
            player("c", Team::Evil, 0),
        ];
        assert_eq!(assign_team(&roster), Team::Evil);

        let roster = vec![player("a", Team::Evil, 0)];
        assert_eq!(assign_team(&roster), Team::Good);
    }

    #[test]
    fn test_assign_team_never_worsens_balance() {
        // With equal teams either answer keeps the delta at 1
        let roster = vec![player("a", Team::Good, 0), player("b", Team::Evil, 0)];
        for _ in 0..20 {
            let _ = assign_team(&roster);
        }
    }

    #[test]
    fn test_select_prefers_least_selected() {
        let roster = vec![
            player("a", Team::Good, 3),
            player("b", Team::Good, 1),
            player("c", Team::Evil, 0),
            player("d", Team::Evil, 2),
        ];
        let (good, evil) = select_participants(&roster, &HashSet::new()).unwrap();
        assert_eq!(good, "b");
        assert_eq!(evil, "c");
    }

    #[test]
    fn test_select_never_pairs_same_team() {
        let roster = vec![
            player("a", Team::Good, 0),
            player("b", Team::Good, 0),
            player("c", Team::Evil, 0),
            player("d", Team::Evil, 0),
        ];
        for _ in 0..20 {
            let (good, evil) = select_participants(&roster, &HashSet::new()).unwrap();
            assert!(roster.iter().any(|p| p.id == good && p.team == Team::Good));
            assert!(roster.iter().any(|p| p.id == evil && p.team == Team::Evil));
        }
    }

    #[test]
    fn test_select_respects_exclusion() {
        let roster = vec![
            player("a", Team::Good, 0),
            player("b", Team::Good, 5),
            player("c", Team::Evil, 0),
            player("d", Team::Evil, 5),
        ];
        let excluded: HashSet<PlayerId> = ["a".to_string(), "c".to_string()].into();
        let (good, evil) = select_participants(&roster, &excluded).unwrap();
        assert_eq!(good, "b");
        assert_eq!(evil, "d");
    }

    #[test]
    fn test_select_retries_when_exclusion_starves_team() {
        // Excluding the only Evil player forces the retry with exclusions cleared
        let roster = vec![
            player("a", Team::Good, 0),
            player("b", Team::Good, 0),
            player("c", Team::Evil, 0),
        ];
        let excluded: HashSet<PlayerId> = ["c".to_string()].into();
        let (_, evil) = select_participants(&roster, &excluded).unwrap();
        assert_eq!(evil, "c");
    }

    #[test]
    fn test_select_fails_with_empty_team() {
        let roster = vec![player("a", Team::Good, 0), player("b", Team::Good, 0)];
        let result = select_participants(&roster, &HashSet::new());
        assert_eq!(result, Err(SelectionError::EmptyTeam(Team::Evil)));
    }
}
