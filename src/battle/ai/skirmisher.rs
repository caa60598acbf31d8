//! Skirmisher - a simple reference AI
//!
//! Shoots the nearest visible enemy with the most efficient fire mode,
//! otherwise makes one move per turn: toward the nearest enemy the team
//! knows about, or a short wander when nothing is in sight.

use ahash::AHashSet;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::battle::ai::{AiAction, AiContext, AiController, AiDecision};
use crate::battle::constants::TARGET_HEIGHT;
use crate::battle::pather::SolveResult;
use crate::battle::units::Unit;
use crate::battle::weapons::{FireMode, Item};
use crate::core::error::Result;
use crate::core::types::{GridPos, UnitId};

/// Tunable behavior, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiProfile {
    pub name: String,
    /// Shots below this hit chance are not taken
    pub min_hit_chance: f32,
    /// Close in on known enemies instead of wandering
    pub advance: bool,
    /// How far a unit wanders when no enemy is known
    pub wander_radius: i32,
}

impl Default for AiProfile {
    fn default() -> Self {
        Self {
            name: "skirmisher".into(),
            min_hit_chance: 0.05,
            advance: true,
            wander_radius: 6,
        }
    }
}

impl AiProfile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

pub struct Skirmisher {
    profile: AiProfile,
    rng: ChaCha8Rng,
    /// Units that already moved this turn
    moved: AHashSet<UnitId>,
}

impl Skirmisher {
    /// Create a new skirmisher with default seed
    pub fn new(profile: AiProfile) -> Self {
        Self::with_seed(profile, 42)
    }

    /// Create with specific RNG seed for deterministic behavior
    pub fn with_seed(profile: AiProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: ChaCha8Rng::seed_from_u64(seed),
            moved: AHashSet::new(),
        }
    }

    pub fn profile(&self) -> &AiProfile {
        &self.profile
    }

    /// Pick up a weapon, or clips for the weapon in hand
    fn arm(&self, me: &Unit, ctx: &AiContext) -> Option<AiAction> {
        if me.weapon().is_none() && me.inventory.secondary.is_some() {
            return Some(AiAction::SwapWeapon);
        }
        if me.inventory.is_full() || me.inventory.rounds_available() > 0 {
            return None;
        }
        let storage = ctx.map.storage(me.pos)?;
        let items: Vec<usize> = storage
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| match (item, me.weapon()) {
                (Item::Weapon(_), None) => true,
                (Item::Clip { weapon, .. }, Some(held)) => *weapon == held,
                _ => false,
            })
            .map(|(i, _)| i)
            .collect();
        (!items.is_empty()).then_some(AiAction::PickUp { items })
    }

    fn choose_shot(&self, me: &Unit, ctx: &AiContext) -> Option<AiAction> {
        let weapon = me.weapon()?;
        let target = ctx
            .targets
            .unit_targets(me.id)
            .filter_map(|id| ctx.units.alive(id))
            .min_by_key(|t| t.pos.distance_squared(me.pos))?;
        let distance = me.world_pos.distance(target.world_pos);

        let best = FireMode::ALL
            .into_iter()
            .filter(|mode| me.can_fire(ctx.weapons, *mode))
            .map(|mode| {
                let stats = ctx
                    .weapons
                    .fire_statistics(weapon, mode, me.stats.accuracy, distance);
                (mode, stats)
            })
            .filter(|(_, stats)| stats.hit_chance >= self.profile.min_hit_chance)
            .max_by(|a, b| a.1.damage_per_tu.total_cmp(&b.1.damage_per_tu))?;

        Some(AiAction::Shoot {
            target: target.world_pos.extend(TARGET_HEIGHT),
            mode: best.0,
        })
    }

    fn choose_move(&mut self, me: &Unit, ctx: &mut AiContext) -> Option<AiAction> {
        // Keep enough time for one cheap shot after moving.
        let reserve = me
            .weapon()
            .map(|w| ctx.weapons.time_units(w, FireMode::Snap))
            .unwrap_or(0.0);
        let budget = (me.tu - reserve).max(0.0);
        let reach = ctx
            .pather
            .near_path(ctx.map, ctx.units, Some(me.id), me.pos, budget);

        let mut tiles: Vec<GridPos> = reach
            .keys()
            .copied()
            .filter(|p| *p != me.pos)
            .collect();
        tiles.sort_by_key(|p| (p.y, p.x));

        let enemy = ctx
            .targets
            .team_targets(me.team)
            .filter_map(|id| ctx.units.alive(id))
            .min_by_key(|t| t.pos.distance_squared(me.pos))
            .map(|t| t.pos);

        let goal = match enemy {
            Some(enemy) if self.profile.advance => tiles
                .iter()
                .copied()
                .min_by_key(|p| p.distance_squared(enemy))
                .filter(|p| p.distance_squared(enemy) < me.pos.distance_squared(enemy)),
            _ => {
                let radius2 = self.profile.wander_radius * self.profile.wander_radius;
                tiles.retain(|p| p.distance_squared(me.pos) <= radius2);
                tiles.choose(&mut self.rng).copied()
            }
        }?;

        match ctx
            .pather
            .solve_path(ctx.map, ctx.units, Some(me.id), me.pos, goal)
        {
            SolveResult::Solved { path, .. } => Some(AiAction::Move { path }),
            _ => None,
        }
    }
}

impl AiController for Skirmisher {
    fn start_turn(&mut self, _ctx: &mut AiContext) {
        self.moved.clear();
    }

    fn think(&mut self, unit: UnitId, ctx: &mut AiContext) -> AiDecision {
        let Some(me) = ctx.units.alive(unit).cloned() else {
            return AiDecision::done();
        };

        if let Some(action) = self.arm(&me, ctx) {
            return AiDecision::act(action);
        }
        if let Some(action) = self.choose_shot(&me, ctx) {
            return AiDecision::act(action);
        }
        if self.moved.insert(unit) {
            if let Some(action) = self.choose_move(&me, ctx) {
                return AiDecision::act(action);
            }
        }
        AiDecision::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::battle_map::BattleMap;
    use crate::battle::pathfinding::MapPather;
    use crate::battle::targets::Targets;
    use crate::battle::units::{Inventory, Stats, UnitPool};
    use crate::battle::visibility::VisibilityEngine;
    use crate::battle::weapons::WeaponTable;
    use crate::core::config::BattleConfig;
    use crate::core::types::Team;

    struct Fixture {
        map: BattleMap,
        units: UnitPool,
        vis: VisibilityEngine,
        pather: MapPather,
        weapons: WeaponTable,
    }

    impl Fixture {
        fn new() -> Self {
            let config = BattleConfig::default();
            Self {
                map: BattleMap::new(24),
                units: UnitPool::new(),
                vis: VisibilityEngine::new(24, &config),
                pather: MapPather::new(24, &config),
                weapons: WeaponTable::standard(),
            }
        }

        fn think(&mut self, ai: &mut Skirmisher, unit: UnitId) -> AiDecision {
            let targets = Targets::compute(&self.map, &self.units, &mut self.vis);
            let mut ctx = AiContext {
                map: &self.map,
                units: &self.units,
                targets: &targets,
                visibility: &mut self.vis,
                pather: &mut self.pather,
                weapons: &self.weapons,
            };
            ai.think(unit, &mut ctx)
        }
    }

    #[test]
    fn test_shoots_visible_enemy() {
        let mut fx = Fixture::new();
        let rifle = fx.weapons.find("rifle").unwrap();
        let me = fx
            .units
            .spawn(Team::Hostile, GridPos::new(5, 5), Stats::default(), Inventory::armed(rifle, 20))
            .unwrap();
        fx.units
            .spawn(Team::Player, GridPos::new(8, 5), Stats::default(), Inventory::default());

        let decision = fx.think(&mut Skirmisher::new(AiProfile::default()), me);
        assert!(matches!(decision.action, AiAction::Shoot { .. }));
        assert!(!decision.done);
    }

    #[test]
    fn test_wanders_once_then_done() {
        let mut fx = Fixture::new();
        let me = fx
            .units
            .spawn(Team::Hostile, GridPos::new(12, 12), Stats::default(), Inventory::default())
            .unwrap();
        let mut ai = Skirmisher::new(AiProfile::default());

        let first = fx.think(&mut ai, me);
        let AiAction::Move { path } = first.action else {
            panic!("expected a move, got {:?}", first.action);
        };
        assert_eq!(path.first(), Some(&GridPos::new(12, 12)));

        let second = fx.think(&mut ai, me);
        assert!(second.done);
    }

    #[test]
    fn test_picks_up_weapon_when_unarmed() {
        let mut fx = Fixture::new();
        let pistol = fx.weapons.find("pistol").unwrap();
        let me = fx
            .units
            .spawn(Team::Hostile, GridPos::new(3, 3), Stats::default(), Inventory::default())
            .unwrap();
        fx.map.add_item(GridPos::new(3, 3), Item::Weapon(pistol));

        let decision = fx.think(&mut Skirmisher::new(AiProfile::default()), me);
        assert_eq!(decision.action, AiAction::PickUp { items: vec![0] });
    }

    #[test]
    fn test_profile_from_toml() {
        let profile = AiProfile::from_toml_str("advance = false\nwander_radius = 2\n").unwrap();
        assert!(!profile.advance);
        assert_eq!(profile.wander_radius, 2);
        assert_eq!(profile.name, "skirmisher");
    }
}
