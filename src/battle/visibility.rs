//! Per-unit visibility with light attenuation and lazy recomputation
//!
//! Each unit owns a bit-plane of the tiles it can currently see. Planes are
//! computed on first query after invalidation by walking rays outward from
//! the unit, spending a light budget per tile. Invalidation is explicit:
//! per unit, by map rectangle against each unit's sight bounds, or global.

use crate::battle::battle_map::{BattleMap, FULL_LIGHT};
use crate::battle::constants::MAX_UNITS;
use crate::battle::grid::{ring_offsets, BitGrid, LineWalk, TileRect};
use crate::battle::units::UnitPool;
use crate::core::config::BattleConfig;
use crate::core::types::{GridPos, Team, UnitId};

/// Luminance at or below which a tile counts as fully dark
const DARK_LUMINANCE: f32 = 255.0;

/// Light budget costs, resolved from config
#[derive(Debug, Clone, Copy)]
struct LightCosts {
    light: f32,
    dark_friendly: f32,
    dark_hostile: f32,
    obscured: f32,
    diagonal_factor: f32,
}

impl LightCosts {
    /// Budget spent entering a tile of the given luminance
    fn for_luminance(&self, team: Team, luminance: u16) -> f32 {
        let dark = if team == Team::Hostile {
            self.dark_hostile
        } else {
            self.dark_friendly
        };
        let t = ((luminance as f32 - DARK_LUMINANCE) / (FULL_LIGHT as f32 - DARK_LUMINANCE))
            .clamp(0.0, 1.0);
        dark + (self.light - dark) * t
    }
}

#[derive(Debug, Clone)]
pub struct VisibilityEngine {
    planes: Vec<BitGrid>,
    valid: [bool; MAX_UNITS],
    fog: BitGrid,
    fog_dirty: bool,
    processed: BitGrid,
    range: i32,
    costs: LightCosts,
}

impl VisibilityEngine {
    pub fn new(map_size: i32, config: &BattleConfig) -> Self {
        Self {
            planes: vec![BitGrid::new(map_size, map_size); MAX_UNITS],
            valid: [false; MAX_UNITS],
            fog: BitGrid::new(map_size, map_size),
            fog_dirty: true,
            processed: BitGrid::new(map_size, map_size),
            range: config.eyesight_range,
            costs: LightCosts {
                light: config.light_cost,
                dark_friendly: config.dark_cost_friendly,
                dark_hostile: config.dark_cost_hostile,
                obscured: config.obscured_cost,
                diagonal_factor: config.diagonal_light_factor,
            },
        }
    }

    pub fn is_valid(&self, id: UnitId) -> bool {
        self.valid.get(id.index()).copied().unwrap_or(false)
    }

    /// Mark one unit's plane stale. Player units also dirty the fog.
    pub fn invalidate_unit(&mut self, id: UnitId, team: Team) {
        if let Some(valid) = self.valid.get_mut(id.index()) {
            *valid = false;
        }
        if team == Team::Player {
            self.fog_dirty = true;
        }
    }

    /// Mark stale every living unit whose sight bounds overlap `rect`
    pub fn invalidate_rect(&mut self, rect: TileRect, units: &UnitPool) {
        for unit in units.iter_alive() {
            if TileRect::around(unit.pos, self.range).intersects(&rect) {
                self.invalidate_unit(unit.id, unit.team);
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        self.valid = [false; MAX_UNITS];
        self.fog_dirty = true;
    }

    /// Can unit `id` see tile `pos`? Dead and unused units see nothing.
    pub fn unit_can_see(
        &mut self,
        map: &BattleMap,
        units: &UnitPool,
        id: UnitId,
        pos: GridPos,
    ) -> bool {
        if units.alive(id).is_none() {
            return false;
        }
        self.ensure(map, units, id);
        self.planes[id.index()].get(pos)
    }

    /// Can any living unit of `team` see tile `pos`?
    pub fn team_can_see(
        &mut self,
        map: &BattleMap,
        units: &UnitPool,
        team: Team,
        pos: GridPos,
    ) -> bool {
        let members: Vec<UnitId> = units
            .team(team)
            .filter(|u| u.is_alive())
            .map(|u| u.id)
            .collect();
        members
            .into_iter()
            .any(|id| self.unit_can_see(map, units, id, pos))
    }

    /// Player team's fog-of-war plane, rebuilt only when dirty. Returns
    /// whether it was rebuilt.
    pub fn update_fog(&mut self, map: &BattleMap, units: &UnitPool) -> bool {
        if !self.fog_dirty {
            return false;
        }
        let members: Vec<UnitId> = units
            .team(Team::Player)
            .filter(|u| u.is_alive())
            .map(|u| u.id)
            .collect();
        let mut fog = BitGrid::new(map.size(), map.size());
        for id in members {
            self.ensure(map, units, id);
            for pos in self.planes[id.index()].iter_set() {
                fog.set(pos, true);
            }
        }
        self.fog = fog;
        self.fog_dirty = false;
        true
    }

    pub fn fog(&self) -> &BitGrid {
        &self.fog
    }

    fn ensure(&mut self, map: &BattleMap, units: &UnitPool, id: UnitId) {
        if self.valid[id.index()] {
            return;
        }
        let Some(unit) = units.alive(id) else {
            return;
        };
        let (origin, team) = (unit.pos, unit.team);
        self.compute(map, id, origin, team);
        self.valid[id.index()] = true;
        tracing::trace!(
            "Recomputed visibility for unit {}: {} tiles",
            id.0,
            self.planes[id.index()].count()
        );
    }

    fn compute(&mut self, map: &BattleMap, id: UnitId, origin: GridPos, team: Team) {
        let mut plane = std::mem::replace(&mut self.planes[id.index()], BitGrid::new(0, 0));
        if plane.width() != map.size() {
            plane = BitGrid::new(map.size(), map.size());
        }
        if self.processed.width() != map.size() {
            self.processed = BitGrid::new(map.size(), map.size());
        }
        plane.clear_all();
        self.processed.clear_all();

        plane.set(origin, true);
        self.processed.set(origin, true);

        let range2 = self.range * self.range;
        for r in (1..=self.range).rev() {
            for (dx, dy) in ring_offsets(r) {
                let target = origin.offset(dx, dy);
                if dx * dx + dy * dy > range2
                    || !map.in_bounds(target)
                    || self.processed.get(target)
                {
                    continue;
                }
                self.cast_ray(map, team, origin, target, &mut plane);
            }
        }

        self.planes[id.index()] = plane;
    }

    fn cast_ray(
        &mut self,
        map: &BattleMap,
        team: Team,
        origin: GridPos,
        target: GridPos,
        plane: &mut BitGrid,
    ) {
        let mut light = 1.0f32;
        let mut can_see = true;

        for (p, q) in LineWalk::new(origin, target) {
            if can_see {
                can_see = map.can_see(p, q);
            }
            if can_see {
                let dist = if p.is_diagonal_to(q) {
                    self.costs.diagonal_factor
                } else {
                    1.0
                };
                let cost = if map.is_obscured(q) {
                    self.costs.obscured
                } else {
                    self.costs.for_luminance(team, map.luminance(q))
                };
                light -= cost * dist;
                if light < 0.0 {
                    can_see = false;
                }
            }
            self.processed.set(q, true);
            if can_see {
                plane.set(q, true);
            }
        }
    }
}
