//! Battle execution loop
//!
//! Each tick: advance the top action -> refresh fog -> on any completed step
//! or popped action: doors -> targets -> interruption -> reaction fire ->
//! clear events -> end condition. An AI team with an empty stack is asked
//! for its next action; when every unit is done the turn passes.

use std::f32::consts::TAU;

use ahash::AHashMap;
use bitflags::bitflags;
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::battle::actions::{Action, ActionQueue, Struck};
use crate::battle::ai::{AiAction, AiContext, AiController};
use crate::battle::battle_map::BattleMap;
use crate::battle::constants::{
    EXPLOSION_PULLBACK, SHOT_MARCH_STEP, TARGET_HEIGHT, UNIT_HEIGHT, UNIT_RADIUS, WEAPON_HEIGHT,
    WORLD_HEIGHT,
};
use crate::battle::grid::{ring_offsets, union_into, BitGrid, LineWalk, TileRect};
use crate::battle::pathfinding::{MapPather, PathResult};
use crate::battle::targets::{TargetEvent, TargetTracker, Targets, Viewer};
use crate::battle::units::{Inventory, Stats, Unit, UnitPool};
use crate::battle::visibility::VisibilityEngine;
use crate::battle::weapons::{DamageDesc, FireMode, WeaponOracle};
use crate::core::config::BattleConfig;
use crate::core::types::{
    delta_to_rotation, facing_vector, min_delta_degrees, normalize_degrees, vector_to_rotation,
    Direction, GridPos, Millis, Team, UnitId,
};

/// Upper bound on decisions for one unit within one AI pass
const MAX_THINKS_PER_UNIT: u32 = 8;

bitflags! {
    /// What happened during one tick
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TickResult: u8 {
        /// A moving unit crossed a waypoint
        const STEP_COMPLETE = 1 << 0;
        /// A unit's action (move, rotate, shoot) finished
        const UNIT_ACTION_COMPLETE = 1 << 1;
        /// Any other action (hit, delay, camera) finished
        const OTHER_ACTION_COMPLETE = 1 << 2;
    }
}

/// Battle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BattlePhase {
    #[default]
    Deployment, // Placing units
    Active,   // Battle in progress
    Finished, // Battle over
}

/// Battle outcome, from the player's side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BattleOutcome {
    #[default]
    Undecided,
    Victory,
    Defeat,
    Draw,
}

/// Log entry for battle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleEvent {
    pub turn: u32,
    pub time: Millis,
    pub event_type: BattleEventType,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleEventType {
    TurnStarted,
    UnitKilled,
    ReactionFire,
    MoveInterrupted,
    DoorsChanged,
    MapDamaged,
    BattleEnded,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BattleEventLog {
    pub events: Vec<BattleEvent>,
}

impl BattleEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event_type: BattleEventType, description: String, turn: u32, time: Millis) {
        self.events.push(BattleEvent {
            turn,
            time,
            event_type,
            description,
        });
    }

    pub fn count(&self, event_type: BattleEventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

/// Outcome of a move request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveRequest {
    Accepted { tu_cost: f32 },
    AlreadyThere,
    NoPath,
    InsufficientTu { needed: f32, available: f32 },
    /// Actions are still resolving, or the battle is not active
    Busy,
    /// Not a living unit of the team whose turn it is
    InvalidUnit,
}

/// Player selection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub soldier: Option<UnitId>,
    pub target: Option<UnitId>,
}

/// How far an explosion reaches a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlastReach {
    Clear,
    /// Only the final edge is blocked: the obstacle itself takes damage
    Obstacle,
    Blocked,
}

pub struct BattleState {
    pub(crate) map: BattleMap,
    pub(crate) units: UnitPool,
    pub(crate) actions: ActionQueue,
    pub(crate) visibility: VisibilityEngine,
    pub(crate) targets: TargetTracker,
    pub(crate) pather: MapPather,
    pub(crate) config: BattleConfig,
    pub(crate) weapons: Box<dyn WeaponOracle>,
    pub(crate) ai: [Option<Box<dyn AiController>>; 3],
    pub(crate) rng: ChaCha8Rng,
    pub(crate) current_team: Team,
    pub(crate) turn: u32,
    pub(crate) time: Millis,
    pub(crate) phase: BattlePhase,
    pub(crate) outcome: BattleOutcome,
    pub(crate) selection: Selection,
    pub(crate) camera: Vec2,
    pub(crate) log: BattleEventLog,
    /// Team of the unit that crossed a waypoint this tick
    stepped_team: Option<Team>,
}

impl BattleState {
    pub fn new(map: BattleMap, config: BattleConfig, weapons: Box<dyn WeaponOracle>) -> Self {
        let size = map.size();
        Self {
            visibility: VisibilityEngine::new(size, &config),
            pather: MapPather::new(size, &config),
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            map,
            units: UnitPool::new(),
            actions: ActionQueue::new(),
            targets: TargetTracker::new(),
            config,
            weapons,
            ai: [None, None, None],
            current_team: Team::Player,
            turn: 1,
            time: 0,
            phase: BattlePhase::Deployment,
            outcome: BattleOutcome::Undecided,
            selection: Selection::default(),
            camera: Vec2::splat(size as f32 / 2.0),
            log: BattleEventLog::new(),
            stepped_team: None,
        }
    }

    // === SETUP ===

    /// Bring a unit into play
    pub fn spawn_unit(
        &mut self,
        team: Team,
        pos: GridPos,
        stats: Stats,
        inventory: Inventory,
    ) -> Option<UnitId> {
        let id = self.units.spawn(team, pos, stats, inventory)?;
        self.visibility.invalidate_unit(id, team);
        Some(id)
    }

    /// Hand a team to a computer controller
    pub fn set_ai(&mut self, team: Team, controller: Box<dyn AiController>) {
        self.ai[team.index()] = Some(controller);
    }

    pub fn is_ai_team(&self, team: Team) -> bool {
        self.ai[team.index()].is_some()
    }

    /// Mutable map access; all visibility is recomputed afterwards
    pub fn map_mut(&mut self) -> &mut BattleMap {
        self.visibility.invalidate_all();
        &mut self.map
    }

    /// Mutable unit access; all visibility is recomputed afterwards
    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.visibility.invalidate_all();
        self.units.get_mut(id)
    }

    /// Teleport a unit to a tile
    pub fn place_unit(&mut self, id: UnitId, pos: GridPos) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.set_pos(pos);
            let team = unit.team;
            self.visibility.invalidate_unit(id, team);
        }
    }

    /// Leave deployment and start the first turn
    pub fn start_battle(&mut self) {
        if self.phase != BattlePhase::Deployment {
            return;
        }
        self.phase = BattlePhase::Active;
        tracing::info!(
            "Battle started: {} player units, {} hostile units",
            self.units.team_alive_count(Team::Player),
            self.units.team_alive_count(Team::Hostile)
        );
        self.begin_turn();
    }

    // === QUERIES ===

    pub fn map(&self) -> &BattleMap {
        &self.map
    }

    pub fn units(&self) -> &UnitPool {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    pub fn weapons(&self) -> &dyn WeaponOracle {
        self.weapons.as_ref()
    }

    pub fn current_team(&self) -> Team {
        self.current_team
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn phase(&self) -> BattlePhase {
        self.phase
    }

    pub fn outcome(&self) -> BattleOutcome {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.phase == BattlePhase::Finished
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn camera(&self) -> Vec2 {
        self.camera
    }

    pub fn log(&self) -> &BattleEventLog {
        &self.log
    }

    pub fn targets(&self) -> &Targets {
        self.targets.targets()
    }

    /// Target events of the tick in progress; empty between ticks
    pub fn target_events(&self) -> &[TargetEvent] {
        self.targets.events()
    }

    /// Player fog of war as of the last tick
    pub fn fog(&self) -> &BitGrid {
        self.visibility.fog()
    }

    pub fn can_see(&mut self, id: UnitId, pos: GridPos) -> bool {
        self.visibility
            .unit_can_see(&self.map, &self.units, id, pos)
    }

    pub fn team_can_see(&mut self, team: Team, pos: GridPos) -> bool {
        self.visibility
            .team_can_see(&self.map, &self.units, team, pos)
    }

    pub fn visibility_valid(&self, id: UnitId) -> bool {
        self.visibility.is_valid(id)
    }

    /// Tiles a unit can reach with its remaining TU, for move overlays
    pub fn near_path(&mut self, id: UnitId) -> AHashMap<GridPos, f32> {
        let Some(unit) = self.units.alive(id) else {
            return AHashMap::new();
        };
        let (pos, tu) = (unit.pos, unit.tu);
        self.pather
            .near_path(&self.map, &self.units, Some(id), pos, tu)
    }

    /// Path for a unit without committing to it
    pub fn find_path(&mut self, id: UnitId, dest: GridPos) -> PathResult {
        let Some(start) = self.units.alive(id).map(|u| u.pos) else {
            return PathResult::NoSolution;
        };
        self.pather
            .solve_path(&self.map, &self.units, Some(id), start, dest)
    }

    // === PLAYER COMMANDS ===

    pub fn select(&mut self, soldier: Option<UnitId>) {
        self.selection.soldier = soldier;
    }

    pub fn set_target(&mut self, target: Option<UnitId>) {
        self.selection.target = target;
    }

    fn can_command(&self, id: UnitId) -> bool {
        self.phase == BattlePhase::Active
            && self
                .units
                .alive(id)
                .is_some_and(|u| u.team == self.current_team)
    }

    /// Path a unit to `dest` and queue the move if it is affordable
    pub fn request_move(&mut self, id: UnitId, dest: GridPos) -> MoveRequest {
        if self.phase != BattlePhase::Active || !self.actions.is_empty() {
            return MoveRequest::Busy;
        }
        if !self.can_command(id) {
            return MoveRequest::InvalidUnit;
        }
        match self.find_path(id, dest) {
            PathResult::Solved { path, .. } => self.push_move(id, path),
            PathResult::StartEndSame => MoveRequest::AlreadyThere,
            PathResult::NoSolution | PathResult::OutOfMemory => MoveRequest::NoPath,
        }
    }

    /// Queue a move along an explicit path. Every step must be walkable
    /// and the whole path's TU cost affordable up front.
    pub fn push_move(&mut self, id: UnitId, path: Vec<GridPos>) -> MoveRequest {
        let Some(unit) = self.units.alive(id) else {
            return MoveRequest::InvalidUnit;
        };
        if path.len() < 2 {
            return MoveRequest::AlreadyThere;
        }
        let contiguous = path[0] == unit.pos
            && path.windows(2).all(|w| {
                let (dx, dy) = ((w[1].x - w[0].x).abs(), (w[1].y - w[0].y).abs());
                dx <= 1 && dy <= 1 && dx + dy > 0
            });
        if !contiguous
            || !self
                .pather
                .path_clear(&self.map, &self.units, Some(id), &path)
        {
            return MoveRequest::NoPath;
        }

        let needed = self.pather.path_tu_cost(&path);
        if needed > unit.tu + 1e-4 {
            return MoveRequest::InsufficientTu {
                needed,
                available: unit.tu,
            };
        }

        tracing::debug!(
            "Unit {} moving {} steps for {:.2} TU",
            id.0,
            path.len() - 1,
            needed
        );
        self.actions.push(Action::Move {
            unit: id,
            path,
            step: 0,
            fraction: 0.0,
        });
        MoveRequest::Accepted { tu_cost: needed }
    }

    /// Player shot at a world point
    pub fn shoot(&mut self, id: UnitId, target: Vec3, mode: FireMode) -> bool {
        if !self.actions.is_empty() || !self.can_command(id) {
            return false;
        }
        self.push_shoot_action(id, target, mode, 1.0, false)
    }

    /// Player shot at a unit's body
    pub fn shoot_unit(&mut self, id: UnitId, target: UnitId, mode: FireMode) -> bool {
        let Some(point) = self.units.alive(target).map(|t| t.world_pos.extend(TARGET_HEIGHT)) else {
            return false;
        };
        self.shoot(id, point, mode)
    }

    /// Turn a unit to face a heading
    pub fn push_rotate_action(&mut self, id: UnitId, heading: f32) -> bool {
        if self.units.alive(id).is_none() {
            return false;
        }
        self.actions.push(Action::Rotate {
            unit: id,
            target: normalize_degrees(heading),
        });
        true
    }

    /// Spend TU and rounds, then queue one Shoot per round followed by a
    /// Rotate toward the target (so the turn resolves first). Each round is
    /// jittered by the weapon spread, the shooter's accuracy and
    /// `use_error`. With `clear_move`, a Move on top of the stack is
    /// cancelled.
    pub fn push_shoot_action(
        &mut self,
        id: UnitId,
        target: Vec3,
        mode: FireMode,
        use_error: f32,
        clear_move: bool,
    ) -> bool {
        let weapons = self.weapons.as_ref();
        let Some(unit) = self.units.get_mut(id) else {
            return false;
        };
        let Some(weapon) = unit.weapon() else {
            return false;
        };
        if !unit.can_fire(weapons, mode) {
            return false;
        }
        unit.use_tu(weapons.time_units(weapon, mode));

        let origin = unit.world_pos.extend(WEAPON_HEIGHT);
        let aim = target - origin;
        let length = aim.length();
        let spread = weapons.accuracy(weapon, mode) * unit.stats.accuracy * use_error;
        let dir = aim.normalize_or_zero();
        let (u, v) = if dir == Vec3::ZERO {
            (Vec3::X, Vec3::Y)
        } else {
            let u = dir.any_orthonormal_vector();
            (u, dir.cross(u))
        };

        for _ in 0..mode.rounds() {
            let d = length * self.rng.gen::<f32>() * spread;
            let theta = self.rng.gen::<f32>() * TAU;
            let jittered = target + (u * theta.cos() + v * theta.sin()) * d;

            if clear_move && self.actions.top().is_some_and(Action::is_move) {
                self.actions.clear();
            }
            self.actions.push(Action::Shoot {
                unit: id,
                target: jittered,
                mode,
            });
            unit.inventory.use_round();
        }

        self.actions.push(Action::Rotate {
            unit: id,
            target: vector_to_rotation(aim.truncate()),
        });
        true
    }

    /// Take items from the storage on the unit's tile. Returns how many
    /// were taken.
    pub fn pick_up(&mut self, id: UnitId, items: &[usize]) -> usize {
        let Some(pos) = self.units.alive(id).map(|u| u.pos) else {
            return 0;
        };
        let Some(mut storage) = self.map.take_storage(pos) else {
            return 0;
        };

        let mut wanted: Vec<usize> = items
            .iter()
            .copied()
            .filter(|i| *i < storage.items.len())
            .collect();
        wanted.sort_unstable_by(|a, b| b.cmp(a));
        wanted.dedup();
        let mut taken: Vec<_> = wanted.into_iter().map(|i| storage.items.remove(i)).collect();
        taken.reverse();

        let mut count = 0;
        if let Some(unit) = self.units.get_mut(id) {
            for item in taken {
                match unit.inventory.add_item(item) {
                    Ok(()) => count += 1,
                    Err(item) => storage.items.push(item),
                }
            }
        }
        self.map.put_storage(pos, storage);
        count
    }

    pub fn swap_weapon(&mut self, id: UnitId) -> bool {
        self.units
            .get_mut(id)
            .filter(|u| u.is_alive())
            .is_some_and(|u| u.inventory.swap_weapon())
    }

    /// Finish the current team's turn. Refused while actions resolve.
    pub fn end_turn(&mut self) -> bool {
        if self.phase != BattlePhase::Active || !self.actions.is_empty() {
            return false;
        }
        self.next_turn();
        true
    }

    // === TICK ===

    /// Advance the simulation by `delta` milliseconds
    pub fn tick(&mut self, current_time: Millis, delta: Millis) -> TickResult {
        if self.phase != BattlePhase::Active {
            return TickResult::empty();
        }
        self.time = current_time;
        self.stepped_team = None;

        let result = self.process_action(delta);
        self.visibility.update_fog(&self.map, &self.units);

        if !result.is_empty() {
            self.process_doors();
            self.calc_team_targets();
            self.stop_for_new_team_target();
            self.do_reaction_fire();
            self.targets.clear_events();
            self.check_end_condition();
        }

        if self.phase != BattlePhase::Active {
            return result;
        }

        if self.is_ai_team(self.current_team) {
            if self.actions.is_empty() && self.process_ai() {
                self.next_turn();
            }
        } else {
            self.clear_dead_selection();
        }
        result
    }

    fn process_action(&mut self, delta: Millis) -> TickResult {
        let Some(action) = self.actions.pop() else {
            return TickResult::empty();
        };
        let dt = delta as f32 / 1000.0;

        match action {
            Action::Move {
                unit,
                path,
                step,
                fraction,
            } => self.process_move(unit, path, step, fraction, dt),
            Action::Rotate { unit, target } => self.process_rotate(unit, target, dt),
            Action::Shoot { unit, target, mode } => self.process_shoot(unit, target, mode),
            Action::ApplyHit {
                shooter,
                damage,
                explosive,
                point,
                normal,
                struck,
            } => self.process_hit(shooter, damage, explosive, point, normal, struck),
            Action::Delay { remaining } => {
                let remaining = remaining.saturating_sub(delta);
                if remaining == 0 {
                    return TickResult::OTHER_ACTION_COMPLETE;
                }
                self.actions.push(Action::Delay { remaining });
                TickResult::empty()
            }
            Action::CameraPan { target, speed } => {
                let to_target = target - self.camera;
                let travel = speed * dt;
                if to_target.length() <= travel {
                    self.camera = target;
                    return TickResult::OTHER_ACTION_COMPLETE;
                }
                self.camera += to_target.normalize_or_zero() * travel;
                self.actions.push(Action::CameraPan { target, speed });
                TickResult::empty()
            }
        }
    }

    /// Advance along the path; at most one waypoint is crossed per tick
    fn process_move(
        &mut self,
        id: UnitId,
        path: Vec<GridPos>,
        mut step: usize,
        mut fraction: f32,
        dt: f32,
    ) -> TickResult {
        let Some(unit) = self.units.get_mut(id).filter(|u| u.is_alive()) else {
            return TickResult::UNIT_ACTION_COMPLETE;
        };
        if step + 1 >= path.len() {
            return TickResult::UNIT_ACTION_COMPLETE;
        }

        let (from, to) = (path[step], path[step + 1]);
        let segment = if from.is_diagonal_to(to) {
            self.config.diagonal_step_tu
        } else {
            self.config.orthogonal_step_tu
        };
        unit.facing = delta_to_rotation(to.x - from.x, to.y - from.y);

        let travel = self.config.move_speed * dt;
        if fraction + travel < segment {
            fraction += travel;
            unit.world_pos = from.center().lerp(to.center(), fraction / segment);
            self.actions.push(Action::Move {
                unit: id,
                path,
                step,
                fraction,
            });
            return TickResult::empty();
        }

        step += 1;
        unit.set_pos(to);
        unit.use_tu(segment);
        let team = unit.team;
        self.visibility.invalidate_unit(id, team);
        self.stepped_team = Some(team);

        if step + 1 >= path.len() {
            return TickResult::STEP_COMPLETE | TickResult::UNIT_ACTION_COMPLETE;
        }
        self.actions.push(Action::Move {
            unit: id,
            path,
            step,
            fraction: 0.0,
        });
        TickResult::STEP_COMPLETE
    }

    fn process_rotate(&mut self, id: UnitId, target: f32, dt: f32) -> TickResult {
        let Some(unit) = self.units.get_mut(id).filter(|u| u.is_alive()) else {
            return TickResult::UNIT_ACTION_COMPLETE;
        };
        let delta = min_delta_degrees(unit.facing, target);
        let max_turn = self.config.rotation_speed * dt;
        if delta.abs() <= max_turn {
            unit.facing = normalize_degrees(target);
            return TickResult::UNIT_ACTION_COMPLETE;
        }
        unit.facing = normalize_degrees(unit.facing + max_turn * delta.signum());
        self.actions.push(Action::Rotate { unit: id, target });
        TickResult::empty()
    }

    fn process_shoot(&mut self, id: UnitId, target: Vec3, mode: FireMode) -> TickResult {
        let Some((origin, weapon)) = self
            .units
            .alive(id)
            .and_then(|u| Some((u.world_pos.extend(WEAPON_HEIGHT), u.weapon()?)))
        else {
            return TickResult::UNIT_ACTION_COMPLETE;
        };

        let Some((point, struck)) = self.cast_shot(id, origin, target) else {
            return TickResult::UNIT_ACTION_COMPLETE;
        };
        let hit_something = struck.is_some();

        self.actions.push(Action::ApplyHit {
            shooter: id,
            damage: self.weapons.damage_base(weapon, mode),
            explosive: self.weapons.is_explosive(weapon),
            point,
            normal: (target - origin).normalize_or_zero(),
            struck,
        });

        let delay = self.weapons.effect_delay(weapon);
        if delay > 0 {
            self.actions.push(Action::Delay { remaining: delay });
        }

        let impact = point.truncate();
        let tile = GridPos::new(impact.x.floor() as i32, impact.y.floor() as i32);
        if hit_something
            && self.visibility.fog().get(tile)
            && self.camera.distance(impact) > self.config.camera_view_radius
        {
            self.actions.push(Action::CameraPan {
                target: impact,
                speed: self.config.camera_pan_speed,
            });
        }

        TickResult::UNIT_ACTION_COMPLETE
    }

    /// March a ray from `origin` toward `target` and beyond. Returns the
    /// impact point and what was struck, or None if the shot left the map.
    fn cast_shot(&self, shooter: UnitId, origin: Vec3, target: Vec3) -> Option<(Vec3, Option<Struck>)> {
        let dir = (target - origin).normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }

        let size = self.map.size() as f32;
        let bodies: Vec<(UnitId, Vec2)> = self
            .units
            .iter_alive()
            .filter(|u| u.id != shooter)
            .map(|u| (u.id, u.world_pos))
            .collect();
        let tile_of = |p: Vec3| GridPos::new(p.x.floor() as i32, p.y.floor() as i32);

        let max_travel = size * 2.0 + WORLD_HEIGHT;
        let mut prev = tile_of(origin);
        let mut t = 0.0;
        while t < max_travel {
            t += SHOT_MARCH_STEP;
            let p = origin + dir * t;

            if p.z <= 0.0 {
                return Some((Vec3::new(p.x, p.y, 0.0), None));
            }
            if p.x < 0.0 || p.y < 0.0 || p.x >= size || p.y >= size || p.z >= WORLD_HEIGHT {
                return None;
            }

            let tile = tile_of(p);
            if tile != prev {
                if !self.map.can_see(prev, tile) {
                    let struck = if self.map.tile(tile).is_some_and(|cell| cell.content.is_some()) {
                        tile
                    } else {
                        prev
                    };
                    let last_free = origin + dir * (t - SHOT_MARCH_STEP);
                    return Some((last_free, Some(Struck::World(struck))));
                }
                prev = tile;
            }

            if p.z < UNIT_HEIGHT {
                let flat = p.truncate();
                if let Some((id, _)) = bodies
                    .iter()
                    .find(|(_, body)| body.distance_squared(flat) < UNIT_RADIUS * UNIT_RADIUS)
                {
                    return Some((p, Some(Struck::Unit(*id))));
                }
            }
        }
        None
    }

    fn process_hit(
        &mut self,
        shooter: UnitId,
        damage: DamageDesc,
        explosive: bool,
        point: Vec3,
        normal: Vec3,
        struck: Option<Struck>,
    ) -> TickResult {
        if explosive {
            self.explode(shooter, damage, point, normal);
        } else {
            match struck {
                Some(Struck::Unit(id)) => self.damage_unit(id, damage.total(), shooter),
                Some(Struck::World(tile)) => self.damage_map(tile, damage.total()),
                None => {}
            }
        }
        TickResult::OTHER_ACTION_COMPLETE
    }

    /// Ring-by-ring blast damage, falling off with distance and stopped by
    /// line of sight from the blast center
    fn explode(&mut self, shooter: UnitId, damage: DamageDesc, point: Vec3, normal: Vec3) {
        let radius = self.config.explosion_radius;
        let center = GridPos::new(
            (point.x - EXPLOSION_PULLBACK * normal.x).floor() as i32,
            (point.y - EXPLOSION_PULLBACK * normal.y).floor() as i32,
        );
        tracing::debug!("Explosion at ({}, {})", center.x, center.y);

        let mut smoked: Option<TileRect> = None;
        for rad in 0..=radius {
            let amount = damage.scaled(falloff(rad, radius)).total();
            for (dx, dy) in ring_offsets(rad) {
                let tile = center.offset(dx, dy);
                if dx * dx + dy * dy > radius * radius || !self.map.in_bounds(tile) {
                    continue;
                }
                match self.blast_reach(center, tile) {
                    BlastReach::Blocked => {}
                    BlastReach::Obstacle => self.damage_map(tile, amount),
                    BlastReach::Clear => {
                        if let Some(id) = self.units.unit_at(tile) {
                            self.damage_unit(id, amount, shooter);
                        }
                        self.damage_map(tile, amount);
                        if self.rng.gen_bool(0.5) {
                            let extra = self.config.smoke_extra_turns;
                            let turns = self.config.smoke_min_turns
                                + if extra > 0 { self.rng.gen_range(0..extra) } else { 0 };
                            self.map.add_smoke(tile, turns);
                            union_into(&mut smoked, TileRect::new(tile, tile));
                        }
                    }
                }
            }
        }

        if let Some(rect) = smoked {
            self.visibility.invalidate_rect(rect, &self.units);
        }
    }

    fn blast_reach(&self, center: GridPos, tile: GridPos) -> BlastReach {
        let walk = LineWalk::new(center, tile);
        let last = walk.num_steps() - 1;
        for (i, (p, q)) in walk.enumerate() {
            if !self.map.can_see(p, q) {
                return if i as i32 == last {
                    BlastReach::Obstacle
                } else {
                    BlastReach::Blocked
                };
            }
        }
        BlastReach::Clear
    }

    fn damage_unit(&mut self, id: UnitId, amount: f32, shooter: UnitId) {
        let Some(unit) = self.units.get_mut(id) else {
            return;
        };
        let team = unit.team;
        if !unit.apply_damage(amount.round() as i32) {
            return;
        }

        self.visibility.invalidate_unit(id, team);
        if shooter != id {
            if let Some(killer) = self.units.get_mut(shooter) {
                killer.kills += 1;
            }
        }
        if self.selection.target == Some(id) {
            self.selection.target = None;
        }
        tracing::debug!("Unit {} killed by unit {}", id.0, shooter.0);
        self.log_event(
            BattleEventType::UnitKilled,
            format!("Unit {} ({:?}) killed by unit {}", id.0, team, shooter.0),
        );
    }

    fn damage_map(&mut self, tile: GridPos, amount: f32) {
        if let Some(rect) = self.map.damage_tile(tile, amount.round() as i32) {
            self.visibility.invalidate_rect(rect, &self.units);
            self.log_event(
                BattleEventType::MapDamaged,
                format!("Tile ({}, {}) destroyed", tile.x, tile.y),
            );
        }
    }

    // === POST-STEP PIPELINE ===

    /// Open doors next to living units, close the rest
    pub fn process_doors(&mut self) {
        let mut changed = false;
        for pos in self.map.door_positions() {
            let occupied = self.units.iter_alive().any(|u| {
                u.pos == pos || Direction::ALL.iter().any(|d| pos.step(*d) == u.pos)
            });
            changed |= self.map.set_door_open(pos, occupied);
        }
        if changed {
            self.visibility.invalidate_all();
            tracing::debug!("Doors changed, visibility invalidated");
            self.log_event(BattleEventType::DoorsChanged, "Doors changed".into());
        }
    }

    /// Rebuild targets and queue the resulting events
    pub fn calc_team_targets(&mut self) {
        self.targets
            .recompute(&self.map, &self.units, &mut self.visibility);
    }

    /// Abort a single pending move when the moving team spots something
    /// new. Player teams stop on team-level sightings only; AI teams also
    /// stop on unit-level sightings.
    pub fn stop_for_new_team_target(&mut self) {
        if self.actions.len() != 1 {
            return;
        }
        let Some(Action::Move { unit, fraction, .. }) = self.actions.top() else {
            return;
        };
        if *fraction != 0.0 {
            return;
        }
        let Some(team) = self.units.get(*unit).map(|u| u.team) else {
            return;
        };
        if team != self.current_team {
            return;
        }

        let ai_team = self.is_ai_team(team);
        let units = &self.units;
        let interrupts = |e: &TargetEvent| {
            e.gain
                && match e.viewer {
                    Viewer::Team(t) => t == team,
                    Viewer::Unit(v) => ai_team && units.get(v).is_some_and(|u| u.team == team),
                }
        };
        let mut stopped = false;
        while self.targets.take_event(&interrupts).is_some() {
            stopped = true;
        }

        if stopped {
            self.actions.clear();
            tracing::debug!("{:?} move interrupted by new sighting", team);
            self.log_event(
                BattleEventType::MoveInterrupted,
                format!("{:?} move interrupted by a new sighting", team),
            );
        }
    }

    /// Reaction fire is possible between steps of the current team's move
    fn reaction_window_open(&self) -> bool {
        match self.actions.top() {
            Some(Action::Move { unit, fraction, .. }) => {
                *fraction == 0.0
                    && self
                        .units
                        .get(*unit)
                        .is_some_and(|u| u.team == self.current_team)
            }
            None => self.stepped_team == Some(self.current_team),
            Some(_) => false,
        }
    }

    /// Let the opponents of the moving team shoot at what they just spotted.
    /// Every qualifying event is consumed, fired on or not.
    pub fn do_reaction_fire(&mut self) {
        if !self.reaction_window_open() {
            return;
        }
        let mover_team = self.current_team;
        let reacting_team = mover_team.opponent();

        loop {
            let units = &self.units;
            let qualifies = |e: &TargetEvent| {
                e.gain
                    && matches!(e.viewer, Viewer::Unit(v) if units.get(v).is_some_and(|u| u.team == reacting_team))
                    && units.get(e.target).is_some_and(|t| t.team == mover_team)
            };
            let Some(event) = self.targets.take_event(qualifies) else {
                break;
            };
            if let Viewer::Unit(viewer) = event.viewer {
                self.try_reaction_shot(viewer, event.target);
            }
        }
    }

    fn try_reaction_shot(&mut self, viewer: UnitId, target: UnitId) {
        let (Some(v), Some(t)) = (self.units.alive(viewer), self.units.alive(target)) else {
            return;
        };
        let Some(weapon) = v.weapon() else {
            return;
        };
        let min_range = self.config.explosive_reaction_min_range;
        if self.weapons.is_explosive(weapon) && v.pos.distance_squared(t.pos) < min_range * min_range {
            return;
        }

        let to_target = (t.world_pos - v.world_pos).normalize_or_zero();
        let alignment = self.config.reaction_facing_offset
            + self.config.reaction_facing_scale * facing_vector(v.facing).dot(to_target);
        let chance = v.stats.reaction * alignment;
        let aim = t.world_pos.extend(TARGET_HEIGHT);

        let roll: f32 = self.rng.gen();
        tracing::debug!(
            "Reaction roll unit {} -> unit {}: {:.2} vs chance {:.2}",
            viewer.0,
            target.0,
            roll,
            chance
        );
        if roll >= chance {
            return;
        }

        let error = self.config.reaction_error_base - alignment;
        let fired = self.push_shoot_action(viewer, aim, FireMode::Auto, error, true)
            || self.push_shoot_action(viewer, aim, FireMode::Snap, error, true);
        if fired {
            self.log_event(
                BattleEventType::ReactionFire,
                format!("Unit {} reaction fire at unit {}", viewer.0, target.0),
            );
        }
    }

    fn check_end_condition(&mut self) {
        if let Some(outcome) = check_battle_end(self) {
            self.phase = BattlePhase::Finished;
            self.outcome = outcome;
            self.actions.clear();
            tracing::info!("Battle ended on turn {}: {:?}", self.turn, outcome);
            self.log_event(BattleEventType::BattleEnded, format!("{:?}", outcome));
        }
    }

    fn clear_dead_selection(&mut self) {
        if self.selection.soldier.is_some_and(|id| self.units.alive(id).is_none()) {
            self.selection.soldier = None;
        }
        if self.selection.target.is_some_and(|id| self.units.alive(id).is_none()) {
            self.selection.target = None;
        }
    }

    // === TURNS ===

    /// Civilians only take turns when a controller drives them
    fn next_team(&self) -> Team {
        let mut index = self.current_team.index();
        loop {
            index = (index + 1) % Team::ALL.len();
            let team = Team::ALL[index];
            if team == Team::Civilian
                && !(self.is_ai_team(team) && self.units.team_alive_count(team) > 0)
            {
                continue;
            }
            return team;
        }
    }

    /// Pass control to the next team
    pub fn next_turn(&mut self) {
        self.actions.clear();
        self.current_team = self.next_team();
        self.turn += 1;
        if let Some(rect) = self.map.do_sub_turn() {
            self.visibility.invalidate_rect(rect, &self.units);
        }
        self.begin_turn();
    }

    /// Turn-boundary bookkeeping: restore TU, doors, targets, AI
    fn begin_turn(&mut self) {
        let team = self.current_team;
        for unit in self.units.iter_mut().filter(|u| u.team == team) {
            unit.new_turn();
        }
        self.process_doors();
        self.calc_team_targets();
        self.targets.clear_events();

        if let Some(mut ai) = self.ai[team.index()].take() {
            ai.start_turn(&mut self.ai_context());
            self.ai[team.index()] = Some(ai);
        }

        tracing::info!("Turn {}: {:?} to act", self.turn, team);
        self.log_event(BattleEventType::TurnStarted, format!("{:?} turn", team));
    }

    fn ai_context(&mut self) -> AiContext<'_> {
        AiContext {
            map: &self.map,
            units: &self.units,
            targets: self.targets.targets(),
            visibility: &mut self.visibility,
            pather: &mut self.pather,
            weapons: self.weapons.as_ref(),
        }
    }

    /// Run the AI of the current team until it queues an action. Returns
    /// true when every unit of the team is done for the turn.
    fn process_ai(&mut self) -> bool {
        let team = self.current_team;
        let Some(mut ai) = self.ai[team.index()].take() else {
            return true;
        };
        let finished = self.run_ai(ai.as_mut(), team);
        self.ai[team.index()] = Some(ai);
        finished
    }

    fn run_ai(&mut self, ai: &mut dyn AiController, team: Team) -> bool {
        let pending: Vec<UnitId> = self
            .units
            .team(team)
            .filter(|u| u.is_alive() && !u.user_done)
            .map(|u| u.id)
            .collect();

        for id in pending {
            let mut thinks = 0;
            loop {
                let decision = ai.think(id, &mut self.ai_context());
                let acted = self.apply_ai_action(id, decision.action);
                thinks += 1;

                if decision.done || !acted || thinks >= MAX_THINKS_PER_UNIT {
                    if let Some(unit) = self.units.get_mut(id) {
                        unit.user_done = true;
                    }
                }
                if !self.actions.is_empty() {
                    return false;
                }
                if self.units.get(id).map_or(true, |u| u.user_done) {
                    break;
                }
            }
        }

        self.units
            .team(team)
            .filter(|u| u.is_alive())
            .all(|u| u.user_done)
    }

    fn apply_ai_action(&mut self, id: UnitId, action: AiAction) -> bool {
        match action {
            AiAction::None => false,
            AiAction::Move { path } => {
                matches!(self.push_move(id, path), MoveRequest::Accepted { .. })
            }
            AiAction::Shoot { target, mode } => {
                self.push_shoot_action(id, target, mode, 1.0, false)
            }
            AiAction::PickUp { items } => self.pick_up(id, &items) > 0,
            AiAction::SwapWeapon => self.swap_weapon(id),
        }
    }

    fn log_event(&mut self, event_type: BattleEventType, description: String) {
        self.log.push(event_type, description, self.turn, self.time);
    }
}

/// Explosion damage multiplier for ring `rad` of a blast of `radius`
pub fn falloff(rad: i32, radius: i32) -> f32 {
    (1 + radius - rad) as f32 / (1 + radius) as f32
}

/// Check if the battle should end
pub fn check_battle_end(state: &BattleState) -> Option<BattleOutcome> {
    let players = state.units.team_alive_count(Team::Player);
    let hostiles = state.units.team_alive_count(Team::Hostile);
    match (players, hostiles) {
        (0, 0) => Some(BattleOutcome::Draw),
        (_, 0) => Some(BattleOutcome::Victory),
        (0, _) => Some(BattleOutcome::Defeat),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::weapons::WeaponTable;

    fn state(size: i32) -> BattleState {
        BattleState::new(
            BattleMap::new(size),
            BattleConfig::default(),
            Box::new(WeaponTable::standard()),
        )
    }

    fn run_until_idle(state: &mut BattleState, max_ticks: u32) {
        let mut time = 0;
        for _ in 0..max_ticks {
            if state.actions().is_empty() {
                return;
            }
            time += 50;
            state.tick(time, 50);
        }
    }

    #[test]
    fn test_falloff_is_monotonic() {
        assert_eq!(falloff(0, 2), 1.0);
        assert!(falloff(1, 2) > falloff(2, 2));
        assert!(falloff(2, 2) > 0.0);
    }

    #[test]
    fn test_move_deducts_tu_per_step() {
        let mut state = state(16);
        let id = state
            .spawn_unit(Team::Player, GridPos::new(2, 2), Stats::default(), Inventory::default())
            .unwrap();
        state.spawn_unit(Team::Hostile, GridPos::new(15, 15), Stats::default(), Inventory::default());
        state.start_battle();

        let path = vec![GridPos::new(2, 2), GridPos::new(3, 2), GridPos::new(4, 3)];
        let MoveRequest::Accepted { tu_cost } = state.push_move(id, path) else {
            panic!("move rejected");
        };
        assert!((tu_cost - 2.41).abs() < 1e-4);
        run_until_idle(&mut state, 100);

        let unit = state.unit(id).unwrap();
        assert_eq!(unit.pos, GridPos::new(4, 3));
        assert!((unit.tu - (40.0 - 2.41)).abs() < 1e-4);
    }

    #[test]
    fn test_unaffordable_move_rejected_before_push() {
        let mut state = state(16);
        let id = state
            .spawn_unit(Team::Player, GridPos::new(0, 0), Stats::default(), Inventory::default())
            .unwrap();
        state.spawn_unit(Team::Hostile, GridPos::new(15, 15), Stats::default(), Inventory::default());
        state.start_battle();
        state.unit_mut(id).unwrap().tu = 3.0;

        let result = state.request_move(id, GridPos::new(5, 0));
        assert!(matches!(result, MoveRequest::InsufficientTu { .. }));
        assert!(state.actions().is_empty());
    }

    #[test]
    fn test_rotate_takes_short_way() {
        let mut state = state(8);
        let id = state
            .spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::default())
            .unwrap();
        state.unit_mut(id).unwrap().facing = 350.0;
        state.push_rotate_action(id, 10.0);
        state.start_battle();
        // 400 deg/s for 25 ms is 10 degrees.
        state.tick(25, 25);
        assert!((state.unit(id).unwrap().facing - 0.0).abs() < 1e-3);
    }

    #[test]
    fn test_delay_counts_down() {
        let mut state = state(8);
        state.spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::default());
        state.spawn_unit(Team::Hostile, GridPos::new(7, 7), Stats::default(), Inventory::default());
        state.start_battle();
        state.actions.push(Action::Delay { remaining: 100 });
        assert_eq!(state.tick(60, 60), TickResult::empty());
        assert_eq!(state.tick(120, 60), TickResult::OTHER_ACTION_COMPLETE);
        assert!(state.actions().is_empty());
    }

    #[test]
    fn test_camera_pan_travels_at_speed() {
        let mut state = state(32);
        state.spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::default());
        state.spawn_unit(Team::Hostile, GridPos::new(30, 30), Stats::default(), Inventory::default());
        state.start_battle();
        assert_eq!(state.camera(), Vec2::new(16.0, 16.0));

        let target = Vec2::new(20.0, 16.0);
        state.actions.push(Action::CameraPan { target, speed: 20.0 });
        for (i, x) in [17.0, 18.0, 19.0].into_iter().enumerate() {
            let time = 50 * (i as u32 + 1);
            assert_eq!(state.tick(time, 50), TickResult::empty());
            assert!((state.camera() - Vec2::new(x, 16.0)).length() < 1e-4);
        }
        assert_eq!(state.tick(200, 50), TickResult::OTHER_ACTION_COMPLETE);
        assert_eq!(state.camera(), target);
        assert!(state.actions().is_empty());
    }

    /// Sharpshooter at (2,2) and a sturdy unarmed hostile at (2,5), far
    /// from the camera at the map center
    fn range(size: i32) -> (BattleState, UnitId, UnitId) {
        let weapons = WeaponTable::standard();
        let rifle = weapons.find("rifle").unwrap();
        let mut state = BattleState::new(BattleMap::new(size), BattleConfig::default(), Box::new(weapons));
        let shooter = state
            .spawn_unit(
                Team::Player,
                GridPos::new(2, 2),
                Stats {
                    accuracy: 0.0,
                    ..Stats::default()
                },
                Inventory::armed(rifle, 10),
            )
            .unwrap();
        let target = state
            .spawn_unit(
                Team::Hostile,
                GridPos::new(2, 5),
                Stats {
                    hp: 1000,
                    total_hp: 1000,
                    ..Stats::default()
                },
                Inventory::default(),
            )
            .unwrap();
        state.start_battle();
        // One idle tick builds the player fog.
        state.tick(50, 50);
        (state, shooter, target)
    }

    /// Tick until the stack drains; returns the first camera pan target seen
    fn pan_seen(state: &mut BattleState) -> Option<Vec2> {
        let mut pan = None;
        let mut time = 50;
        for _ in 0..400 {
            if state.actions().is_empty() {
                break;
            }
            time += 50;
            state.tick(time, 50);
            if let Some(Action::CameraPan { target, .. }) = state.actions().top() {
                pan = pan.or(Some(*target));
            }
        }
        pan
    }

    #[test]
    fn test_visible_hit_far_from_camera_pans() {
        let (mut state, shooter, target) = range(32);
        assert!(state.fog().get(GridPos::new(2, 5)));
        assert!(state.shoot_unit(shooter, target, FireMode::Snap));

        let pan = pan_seen(&mut state).expect("no camera pan");
        assert!(pan.distance(Vec2::new(2.5, 5.5)) < 0.5);
        assert!(state.unit(target).unwrap().stats.hp < 1000);
        assert!(state.camera().distance(pan) < 1e-4);
    }

    #[test]
    fn test_ground_hit_does_not_pan() {
        let (mut state, shooter, _) = range(32);
        let camera = state.camera();
        assert!(state.shoot(shooter, Vec3::new(5.5, 2.5, 0.0), FireMode::Snap));
        assert_eq!(pan_seen(&mut state), None);
        assert_eq!(state.camera(), camera);
    }

    #[test]
    fn test_end_condition() {
        let mut state = state(8);
        state.spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::default());
        let hostile = state
            .spawn_unit(Team::Hostile, GridPos::new(6, 6), Stats::default(), Inventory::default())
            .unwrap();
        state.start_battle();
        assert_eq!(check_battle_end(&state), None);

        state.unit_mut(hostile).unwrap().apply_damage(1000);
        assert_eq!(check_battle_end(&state), Some(BattleOutcome::Victory));
    }

    #[test]
    fn test_door_opens_next_to_unit() {
        let mut state = state(8);
        let door = GridPos::new(3, 3);
        state
            .map_mut()
            .set_door(door, crate::battle::battle_map::DirMask::all());
        state.spawn_unit(Team::Player, GridPos::new(3, 2), Stats::default(), Inventory::default());
        state.process_doors();
        assert!(state.map().tile(door).and_then(|t| t.door).is_some_and(|d| d.open));
    }

    #[test]
    fn test_turns_alternate_and_restore_tu() {
        let mut state = state(8);
        let id = state
            .spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::default())
            .unwrap();
        state.spawn_unit(Team::Hostile, GridPos::new(6, 6), Stats::default(), Inventory::default());
        state.start_battle();
        state.unit_mut(id).unwrap().tu = 1.0;

        assert!(state.end_turn());
        assert_eq!(state.current_team(), Team::Hostile);
        assert!(state.end_turn());
        assert_eq!(state.current_team(), Team::Player);
        assert_eq!(state.unit(id).unwrap().tu, 40.0);
    }
}
