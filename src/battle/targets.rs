//! Target tracking: who can see which enemy, and what changed since last time
//!
//! Targets are rebuilt from the visibility engine and diffed against the
//! previous build. Every bit that flips becomes a `TargetEvent`. Events
//! live until the tick that produced them is finished.

use serde::{Deserialize, Serialize};

use crate::battle::battle_map::BattleMap;
use crate::battle::constants::MAX_UNITS;
use crate::battle::units::UnitPool;
use crate::battle::visibility::VisibilityEngine;
use crate::core::types::{GridPos, Team, UnitId};

/// Who gained or lost sight of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Viewer {
    Unit(UnitId),
    Team(Team),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetEvent {
    pub viewer: Viewer,
    pub target: UnitId,
    /// true: sight gained; false: sight lost
    pub gain: bool,
}

impl TargetEvent {
    pub fn is_team_level(&self) -> bool {
        matches!(self.viewer, Viewer::Team(_))
    }
}

/// Visibility of enemies at unit and team granularity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    unit: [u64; MAX_UNITS],
    team: [u64; 3],
    team_count: [[u32; 3]; 3],
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            unit: [0; MAX_UNITS],
            team: [0; 3],
            team_count: [[0; 3]; 3],
        }
    }
}

impl Targets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn bit(target: UnitId) -> u64 {
        1u64 << target.index()
    }

    /// Record that `viewer` (on `viewer_team`) sees `target` (on `target_team`)
    pub fn set(&mut self, viewer: UnitId, viewer_team: Team, target: UnitId, target_team: Team) {
        let bit = Self::bit(target);
        self.unit[viewer.index()] |= bit;
        let team_row = &mut self.team[viewer_team.index()];
        if *team_row & bit == 0 {
            *team_row |= bit;
            self.team_count[viewer_team.index()][target_team.index()] += 1;
        }
    }

    pub fn can_see(&self, viewer: UnitId, target: UnitId) -> bool {
        self.unit[viewer.index()] & Self::bit(target) != 0
    }

    pub fn team_can_see(&self, team: Team, target: UnitId) -> bool {
        self.team[team.index()] & Self::bit(target) != 0
    }

    /// Number of distinct `target_team` units seen by `viewer_team`
    pub fn team_count(&self, viewer_team: Team, target_team: Team) -> u32 {
        self.team_count[viewer_team.index()][target_team.index()]
    }

    pub fn unit_targets(&self, viewer: UnitId) -> impl Iterator<Item = UnitId> {
        bits(self.unit[viewer.index()])
    }

    pub fn team_targets(&self, team: Team) -> impl Iterator<Item = UnitId> {
        bits(self.team[team.index()])
    }

    /// Build targets from current visibility. Only mutually hostile living
    /// units are considered.
    pub fn compute(map: &BattleMap, units: &UnitPool, vis: &mut VisibilityEngine) -> Self {
        let mut targets = Self::new();
        let alive: Vec<(UnitId, Team, GridPos)> =
            units.iter_alive().map(|u| (u.id, u.team, u.pos)).collect();
        for &(viewer, viewer_team, _) in &alive {
            for &(target, target_team, target_pos) in &alive {
                if viewer_team.is_hostile_to(target_team)
                    && vis.unit_can_see(map, units, viewer, target_pos)
                {
                    targets.set(viewer, viewer_team, target, target_team);
                }
            }
        }
        targets
    }

    /// Append the changes from `previous` to `self` as events
    pub fn diff(&self, previous: &Targets, events: &mut Vec<TargetEvent>) {
        for viewer in 0..MAX_UNITS {
            let changed = self.unit[viewer] ^ previous.unit[viewer];
            for target in bits(changed) {
                events.push(TargetEvent {
                    viewer: Viewer::Unit(UnitId::new(viewer)),
                    target,
                    gain: self.unit[viewer] & Self::bit(target) != 0,
                });
            }
        }
        for team in Team::ALL {
            let row = team.index();
            let changed = self.team[row] ^ previous.team[row];
            for target in bits(changed) {
                events.push(TargetEvent {
                    viewer: Viewer::Team(team),
                    target,
                    gain: self.team[row] & Self::bit(target) != 0,
                });
            }
        }
    }
}

fn bits(mut mask: u64) -> impl Iterator<Item = UnitId> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let index = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        Some(UnitId::new(index))
    })
}

/// Current targets plus the events of the tick in progress
#[derive(Debug, Clone, Default)]
pub struct TargetTracker {
    current: Targets,
    events: Vec<TargetEvent>,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild targets and append the resulting events
    pub fn recompute(&mut self, map: &BattleMap, units: &UnitPool, vis: &mut VisibilityEngine) {
        let next = Targets::compute(map, units, vis);
        let before = self.events.len();
        next.diff(&self.current, &mut self.events);
        self.current = next;
        if self.events.len() > before {
            tracing::trace!("Target events: {:?}", &self.events[before..]);
        }
    }

    pub fn targets(&self) -> &Targets {
        &self.current
    }

    pub fn events(&self) -> &[TargetEvent] {
        &self.events
    }

    /// Remove and return the first event matching `pred`
    pub fn take_event(&mut self, pred: impl Fn(&TargetEvent) -> bool) -> Option<TargetEvent> {
        let index = self.events.iter().position(pred)?;
        Some(self.events.remove(index))
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::units::{Inventory, Stats};
    use crate::core::config::BattleConfig;

    #[test]
    fn test_team_count_counts_targets_once() {
        let mut targets = Targets::new();
        let a = UnitId::new(0);
        let b = UnitId::new(1);
        let enemy = UnitId::new(30);
        targets.set(a, Team::Player, enemy, Team::Hostile);
        targets.set(b, Team::Player, enemy, Team::Hostile);
        assert_eq!(targets.team_count(Team::Player, Team::Hostile), 1);
        assert!(targets.can_see(a, enemy));
        assert!(targets.team_can_see(Team::Player, enemy));
        assert_eq!(targets.team_targets(Team::Player).collect::<Vec<_>>(), vec![enemy]);
    }

    #[test]
    fn test_diff_emits_gain_and_loss() {
        let viewer = UnitId::new(2);
        let target = UnitId::new(25);
        let empty = Targets::new();
        let mut seen = Targets::new();
        seen.set(viewer, Team::Player, target, Team::Hostile);

        let mut events = Vec::new();
        seen.diff(&empty, &mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.gain));
        assert_eq!(events.iter().filter(|e| e.is_team_level()).count(), 1);

        events.clear();
        empty.diff(&seen, &mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.gain));
    }

    #[test]
    fn test_civilians_are_not_targets() {
        let map = BattleMap::new(16);
        let mut units = UnitPool::new();
        let mut vis = VisibilityEngine::new(16, &BattleConfig::default());
        let player = units
            .spawn(Team::Player, GridPos::new(2, 2), Stats::default(), Inventory::default())
            .unwrap();
        let civ = units
            .spawn(Team::Civilian, GridPos::new(3, 3), Stats::default(), Inventory::default())
            .unwrap();
        let hostile = units
            .spawn(Team::Hostile, GridPos::new(4, 4), Stats::default(), Inventory::default())
            .unwrap();

        let targets = Targets::compute(&map, &units, &mut vis);
        assert!(targets.can_see(player, hostile));
        assert!(targets.can_see(hostile, player));
        assert!(!targets.can_see(player, civ));
        assert!(!targets.can_see(hostile, civ));
    }

    #[test]
    fn test_tracker_take_event() {
        let map = BattleMap::new(16);
        let mut units = UnitPool::new();
        let mut vis = VisibilityEngine::new(16, &BattleConfig::default());
        units.spawn(Team::Player, GridPos::new(2, 2), Stats::default(), Inventory::default());
        units.spawn(Team::Hostile, GridPos::new(5, 2), Stats::default(), Inventory::default());

        let mut tracker = TargetTracker::new();
        tracker.recompute(&map, &units, &mut vis);
        assert_eq!(tracker.events().len(), 4);

        let taken = tracker.take_event(|e| e.is_team_level() && e.viewer == Viewer::Team(Team::Hostile));
        assert!(taken.is_some());
        assert_eq!(tracker.events().len(), 3);

        tracker.clear_events();
        tracker.recompute(&map, &units, &mut vis);
        assert!(tracker.events().is_empty());
    }
}
