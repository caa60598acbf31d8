//! Battle system constants - fixed capacities and ranges
//!
//! Tunable values live in `BattleConfig`; these are structural limits.

use std::ops::Range;

use crate::core::types::Team;

// Map
pub const MAP_SIZE: i32 = 64;

// Unit pool (fixed capacity, one contiguous range per team)
pub const MAX_PLAYER_UNITS: usize = 8;
pub const MAX_CIVILIAN_UNITS: usize = 16;
pub const MAX_HOSTILE_UNITS: usize = 16;

pub const PLAYER_UNITS_START: usize = 0;
pub const PLAYER_UNITS_END: usize = PLAYER_UNITS_START + MAX_PLAYER_UNITS;
pub const CIVILIAN_UNITS_START: usize = PLAYER_UNITS_END;
pub const CIVILIAN_UNITS_END: usize = CIVILIAN_UNITS_START + MAX_CIVILIAN_UNITS;
pub const HOSTILE_UNITS_START: usize = CIVILIAN_UNITS_END;
pub const HOSTILE_UNITS_END: usize = HOSTILE_UNITS_START + MAX_HOSTILE_UNITS;
pub const MAX_UNITS: usize = HOSTILE_UNITS_END;

// Unit geometry (world units, 1 tile = 1.0)
pub const UNIT_HEIGHT: f32 = 1.6;
pub const UNIT_RADIUS: f32 = 0.35;
pub const WEAPON_HEIGHT: f32 = 1.1;
pub const TARGET_HEIGHT: f32 = 0.9;
pub const WORLD_HEIGHT: f32 = 8.0;

// Shot resolution
pub const SHOT_MARCH_STEP: f32 = 0.05;
pub const EXPLOSION_PULLBACK: f32 = 0.2;

/// Pool slots reserved for a team
pub fn team_range(team: Team) -> Range<usize> {
    match team {
        Team::Player => PLAYER_UNITS_START..PLAYER_UNITS_END,
        Team::Civilian => CIVILIAN_UNITS_START..CIVILIAN_UNITS_END,
        Team::Hostile => HOSTILE_UNITS_START..HOSTILE_UNITS_END,
    }
}

/// Team owning a pool slot
pub fn team_of_slot(index: usize) -> Option<Team> {
    Team::ALL
        .into_iter()
        .find(|team| team_range(*team).contains(&index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_are_contiguous() {
        assert_eq!(team_range(Team::Player).end, team_range(Team::Civilian).start);
        assert_eq!(team_range(Team::Civilian).end, team_range(Team::Hostile).start);
        assert_eq!(team_range(Team::Hostile).end, MAX_UNITS);
    }

    #[test]
    fn test_pool_fits_target_rows() {
        // Target rows are 64-bit masks indexed by slot.
        assert!(MAX_UNITS <= 64);
    }

    #[test]
    fn test_team_of_slot() {
        assert_eq!(team_of_slot(0), Some(Team::Player));
        assert_eq!(team_of_slot(CIVILIAN_UNITS_START), Some(Team::Civilian));
        assert_eq!(team_of_slot(MAX_UNITS - 1), Some(Team::Hostile));
        assert_eq!(team_of_slot(MAX_UNITS), None);
    }
}
