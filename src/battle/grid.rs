//! Grid primitives: dense bit-planes and discrete line walking

use serde::{Deserialize, Serialize};

use crate::core::types::GridPos;

/// Dense 2D bit-plane over the map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitGrid {
    width: i32,
    height: i32,
    words: Vec<u64>,
}

impl BitGrid {
    pub fn new(width: i32, height: i32) -> Self {
        let bits = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn bit(&self, pos: GridPos) -> Option<(usize, u64)> {
        if !self.contains(pos) {
            return None;
        }
        let index = (pos.y * self.width + pos.x) as usize;
        Some((index / 64, 1u64 << (index % 64)))
    }

    /// Out of bounds reads are false
    pub fn get(&self, pos: GridPos) -> bool {
        self.bit(pos)
            .map(|(word, mask)| self.words[word] & mask != 0)
            .unwrap_or(false)
    }

    /// Out of bounds writes are ignored
    pub fn set(&mut self, pos: GridPos, value: bool) {
        if let Some((word, mask)) = self.bit(pos) {
            if value {
                self.words[word] |= mask;
            } else {
                self.words[word] &= !mask;
            }
        }
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// All set cells, row-major
    pub fn iter_set(&self) -> impl Iterator<Item = GridPos> + '_ {
        let width = self.width;
        (0..self.height)
            .flat_map(move |y| (0..width).map(move |x| GridPos::new(x, y)))
            .filter(|p| self.get(*p))
    }
}

/// Axis-aligned inclusive rectangle of tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub min: GridPos,
    pub max: GridPos,
}

impl TileRect {
    pub fn new(min: GridPos, max: GridPos) -> Self {
        Self { min, max }
    }

    /// Square of half-size `radius` around `center`
    pub fn around(center: GridPos, radius: i32) -> Self {
        Self::new(
            center.offset(-radius, -radius),
            center.offset(radius, radius),
        )
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }

    pub fn intersects(&self, other: &TileRect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    pub fn union(&self, other: &TileRect) -> TileRect {
        TileRect::new(
            GridPos::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            GridPos::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }
}

/// Grow an optional dirty region to include `rect`
pub fn union_into(region: &mut Option<TileRect>, rect: TileRect) {
    *region = Some(match region {
        Some(existing) => existing.union(&rect),
        None => rect,
    });
}

/// Offsets on the square ring at Chebyshev distance `r`; the origin for 0
pub fn ring_offsets(r: i32) -> impl Iterator<Item = (i32, i32)> {
    let horizontal = (-r..=r).flat_map(move |x| [(x, -r), (x, r)]);
    let vertical = (-r + 1..r).flat_map(move |y| [(-r, y), (r, y)]);
    let origin = (r == 0).then_some((0, 0));
    origin.into_iter().chain(horizontal.chain(vertical).filter(move |_| r > 0))
}

/// Discrete walk from one cell to another, one unit step at a time.
///
/// Yields `(p, q)` segments where `q` is the next cell after `p`; each segment
/// is orthogonal or diagonal. A walk from a cell to itself yields nothing.
#[derive(Debug, Clone)]
pub struct LineWalk {
    start: GridPos,
    dx: i32,
    dy: i32,
    steps: i32,
    current: i32,
}

impl LineWalk {
    pub fn new(from: GridPos, to: GridPos) -> Self {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        Self {
            start: from,
            dx,
            dy,
            steps: dx.abs().max(dy.abs()),
            current: 0,
        }
    }

    pub fn num_steps(&self) -> i32 {
        self.steps
    }

    /// The cell at step `i` of the walk
    pub fn point(&self, i: i32) -> GridPos {
        if self.steps == 0 {
            return self.start;
        }
        GridPos::new(
            self.start.x + round_div(self.dx * i, self.steps),
            self.start.y + round_div(self.dy * i, self.steps),
        )
    }
}

impl Iterator for LineWalk {
    type Item = (GridPos, GridPos);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.steps {
            return None;
        }
        let p = self.point(self.current);
        let q = self.point(self.current + 1);
        self.current += 1;
        Some((p, q))
    }
}

/// Integer division rounding half away from zero; `den` must be positive
fn round_div(num: i32, den: i32) -> i32 {
    debug_assert!(den > 0);
    if num >= 0 {
        (2 * num + den) / (2 * den)
    } else {
        -((-2 * num + den) / (2 * den))
    }
}
