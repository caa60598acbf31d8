//! Map pathing adapter: exposes tile connectivity to the generic pather
//!
//! Each tile's blocked-direction mask is memoized with the query id it was
//! computed under. The query id is bumped when the map generation changes,
//! so a solve only pays for tiles whose mask is stale. Tiles held by other
//! units are checked separately and never enter the memo.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ahash::AHashMap;
use ordered_float::OrderedFloat;

use crate::battle::battle_map::{BattleMap, DirMask};
use crate::battle::grid::BitGrid;
use crate::battle::pather::{Graph, Pather, SolveResult, StateCost};
use crate::battle::units::UnitPool;
use crate::core::config::BattleConfig;
use crate::core::types::{Direction, GridPos, UnitId};

pub type PathResult = SolveResult<GridPos>;

/// Diagonal moves as pairs of orthogonal legs
const DIAGONALS: [(Direction, Direction); 4] = [
    (Direction::North, Direction::East),
    (Direction::East, Direction::South),
    (Direction::South, Direction::West),
    (Direction::West, Direction::North),
];

/// Per-tile memoized path masks
#[derive(Debug, Clone)]
struct MaskCache {
    size: i32,
    masks: Vec<(DirMask, u64)>,
    unit_blocks: BitGrid,
    query_id: u64,
    map_generation: u64,
}

impl MaskCache {
    fn new(size: i32) -> Self {
        Self {
            size,
            masks: vec![(DirMask::empty(), 0); (size * size) as usize],
            unit_blocks: BitGrid::new(size, size),
            query_id: 1,
            map_generation: 0,
        }
    }

    /// Re-read unit blocks, and bump the query id if the map changed
    fn refresh(&mut self, map: &BattleMap, units: &UnitPool, mover: Option<UnitId>) {
        if map.size() != self.size {
            *self = Self::new(map.size());
        }
        self.unit_blocks.clear_all();
        for unit in units.iter_alive().filter(|u| Some(u.id) != mover) {
            self.unit_blocks.set(unit.pos, true);
        }
        if map.generation() != self.map_generation {
            self.map_generation = map.generation();
            self.query_id += 1;
        }
    }

    fn mask(&mut self, map: &BattleMap, pos: GridPos) -> DirMask {
        if !map.in_bounds(pos) || self.unit_blocks.get(pos) {
            return DirMask::all();
        }
        let entry = &mut self.masks[(pos.y * self.size + pos.x) as usize];
        if entry.1 != self.query_id {
            *entry = (map.path_mask(pos), self.query_id);
        }
        entry.0
    }

    /// Movement between `pos` and its neighbor in `dir` is clear both ways
    fn connected(&mut self, map: &BattleMap, pos: GridPos, dir: Direction) -> bool {
        !self.mask(map, pos).blocks(dir) && !self.mask(map, pos.step(dir)).blocks(dir.opposite())
    }

    /// A diagonal step needs all four orthogonal legs around it open
    fn diagonal_clear(&mut self, map: &BattleMap, pos: GridPos, a: Direction, b: Direction) -> bool {
        self.connected(map, pos, a)
            && self.connected(map, pos.step(a), b)
            && self.connected(map, pos, b)
            && self.connected(map, pos.step(b), a)
    }

    /// Can a unit step from `from` into the adjacent tile `to`?
    fn can_step(&mut self, map: &BattleMap, from: GridPos, to: GridPos) -> bool {
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        if let Some(dir) = Direction::from_delta(dx, dy) {
            return self.connected(map, from, dir);
        }
        match (Direction::from_delta(dx, 0), Direction::from_delta(0, dy)) {
            (Some(h), Some(v)) if from.is_diagonal_to(to) => self.diagonal_clear(map, from, h, v),
            _ => false,
        }
    }

    /// All neighbors with their step kind (true for diagonal)
    fn neighbors(&mut self, map: &BattleMap, pos: GridPos, out: &mut Vec<(GridPos, bool)>) {
        for dir in Direction::ALL {
            if self.connected(map, pos, dir) {
                out.push((pos.step(dir), false));
            }
        }
        for (a, b) in DIAGONALS {
            if self.diagonal_clear(map, pos, a, b) {
                out.push((pos.step(a).step(b), true));
            }
        }
    }
}

/// Borrowed view handed to the pather for one solve
struct MapGraph<'a> {
    map: &'a BattleMap,
    cache: &'a mut MaskCache,
    diagonal_cost: f32,
    scratch: Vec<(GridPos, bool)>,
}

impl Graph for MapGraph<'_> {
    type State = GridPos;

    fn least_cost_estimate(&mut self, from: GridPos, to: GridPos) -> f32 {
        let dx = (to.x - from.x).abs();
        let dy = (to.y - from.y).abs();
        let (long, short) = (dx.max(dy), dx.min(dy));
        (long - short) as f32 + short as f32 * self.diagonal_cost
    }

    fn adjacent_cost(&mut self, state: GridPos, adjacent: &mut Vec<StateCost<GridPos>>) {
        self.scratch.clear();
        self.cache.neighbors(self.map, state, &mut self.scratch);
        adjacent.extend(self.scratch.iter().map(|&(pos, diagonal)| StateCost {
            state: pos,
            cost: if diagonal { self.diagonal_cost } else { 1.0 },
        }));
    }
}

/// Path requests against a battle map
#[derive(Debug)]
pub struct MapPather {
    pather: Pather<GridPos>,
    cache: MaskCache,
    diagonal_cost: f32,
    orthogonal_tu: f32,
    diagonal_tu: f32,
}

impl MapPather {
    pub fn new(map_size: i32, config: &BattleConfig) -> Self {
        Self {
            pather: Pather::new(config.pather_node_capacity),
            cache: MaskCache::new(map_size),
            diagonal_cost: config.diagonal_path_cost,
            orthogonal_tu: config.orthogonal_step_tu,
            diagonal_tu: config.diagonal_step_tu,
        }
    }

    /// Current query id; changes whenever cached masks became stale
    pub fn query_id(&self) -> u64 {
        self.cache.query_id
    }

    /// Find a path for `mover` (if any) from `start` to `end`. Other living
    /// units block their tiles. Recovers from pather exhaustion by one
    /// reset and retry.
    pub fn solve_path(
        &mut self,
        map: &BattleMap,
        units: &UnitPool,
        mover: Option<UnitId>,
        start: GridPos,
        end: GridPos,
    ) -> PathResult {
        self.cache.refresh(map, units, mover);

        let mut result = self.solve_once(map, start, end);
        if result == SolveResult::OutOfMemory {
            tracing::debug!(
                "Pather exhausted at {} nodes, resetting and retrying",
                self.pather.node_count()
            );
            self.pather.reset();
            result = self.solve_once(map, start, end);
        }
        result
    }

    fn solve_once(&mut self, map: &BattleMap, start: GridPos, end: GridPos) -> PathResult {
        let mut graph = MapGraph {
            map,
            cache: &mut self.cache,
            diagonal_cost: self.diagonal_cost,
            scratch: Vec::with_capacity(8),
        };
        self.pather.solve(&mut graph, start, end)
    }

    /// Tiles reachable from `start` for at most `max_tu` time units, with
    /// the cheapest TU cost of each
    pub fn near_path(
        &mut self,
        map: &BattleMap,
        units: &UnitPool,
        mover: Option<UnitId>,
        start: GridPos,
        max_tu: f32,
    ) -> AHashMap<GridPos, f32> {
        self.cache.refresh(map, units, mover);

        let mut best: AHashMap<GridPos, f32> = AHashMap::new();
        let mut open = BinaryHeap::new();
        let mut neighbors = Vec::with_capacity(8);
        best.insert(start, 0.0);
        open.push(Reverse((OrderedFloat(0.0f32), start.x, start.y)));

        while let Some(Reverse((OrderedFloat(cost), x, y))) = open.pop() {
            let pos = GridPos::new(x, y);
            if best.get(&pos).is_some_and(|&b| cost > b) {
                continue;
            }
            neighbors.clear();
            self.cache.neighbors(map, pos, &mut neighbors);
            for &(next, diagonal) in &neighbors {
                let step = if diagonal { self.diagonal_tu } else { self.orthogonal_tu };
                let total = cost + step;
                if total > max_tu + 1e-4 {
                    continue;
                }
                if best.get(&next).map_or(true, |&b| total < b) {
                    best.insert(next, total);
                    open.push(Reverse((OrderedFloat(total), next.x, next.y)));
                }
            }
        }
        best
    }

    /// Is every step of `path` walkable for `mover`? Other living units
    /// block their tiles, as they do for `solve_path`.
    pub fn path_clear(
        &mut self,
        map: &BattleMap,
        units: &UnitPool,
        mover: Option<UnitId>,
        path: &[GridPos],
    ) -> bool {
        self.cache.refresh(map, units, mover);
        let cache = &mut self.cache;
        path.windows(2).all(|w| cache.can_step(map, w[0], w[1]))
    }

    /// Time units a unit spends walking `path`
    pub fn path_tu_cost(&self, path: &[GridPos]) -> f32 {
        path_tu_cost(path, self.orthogonal_tu, self.diagonal_tu)
    }
}

/// Time units spent walking a path of adjacent tiles
pub fn path_tu_cost(path: &[GridPos], orthogonal_tu: f32, diagonal_tu: f32) -> f32 {
    path.windows(2)
        .map(|w| {
            if w[0].is_diagonal_to(w[1]) {
                diagonal_tu
            } else {
                orthogonal_tu
            }
        })
        .sum()
}
