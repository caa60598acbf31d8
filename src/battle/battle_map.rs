//! Battle map: tiles, walls, doors, destructible content, smoke and light
//!
//! Walls are stored per tile as a directional mask, so geometry may be
//! asymmetric: a wall on the north edge of one tile does not imply a wall on
//! the south edge of its neighbor. Every mutation that can change
//! connectivity bumps the map generation.

use ahash::AHashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::battle::grid::{union_into, TileRect};
use crate::battle::weapons::Item;
use crate::core::types::{Direction, GridPos};

/// Luminance of a fully lit tile (sum of the three color channels)
pub const FULL_LIGHT: u16 = 765;

bitflags! {
    /// Blocked edges of a tile, one bit per cardinal direction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DirMask: u8 {
        const NORTH = 1 << 0;
        const EAST = 1 << 1;
        const SOUTH = 1 << 2;
        const WEST = 1 << 3;
    }
}

impl DirMask {
    pub fn from_dir(dir: Direction) -> Self {
        Self::from_bits_truncate(1 << dir as u8)
    }

    pub fn blocks(self, dir: Direction) -> bool {
        self.contains(Self::from_dir(dir))
    }
}

/// A door: blocks its edges while closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Door {
    pub open: bool,
    pub mask: DirMask,
}

/// Destructible object standing on a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileContent {
    pub hp: i32,
    pub path_mask: DirMask,
    pub sight_mask: DirMask,
}

impl TileContent {
    /// An object filling the whole tile
    pub fn solid(hp: i32) -> Self {
        Self {
            hp,
            path_mask: DirMask::all(),
            sight_mask: DirMask::all(),
        }
    }
}

/// A single tile of the battle map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tile {
    /// Indestructible walls blocking movement
    pub walls: DirMask,
    /// Indestructible walls blocking sight
    pub sight_walls: DirMask,
    pub door: Option<Door>,
    pub content: Option<TileContent>,
    /// Turns of smoke remaining; obscured while non-zero
    pub smoke: u8,
    /// Night-time luminance, 0..=FULL_LIGHT
    pub light: u16,
}

/// Items lying on a tile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub items: Vec<Item>,
}

impl Storage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The full battle map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleMap {
    size: i32,
    tiles: Vec<Tile>,
    storage: AHashMap<GridPos, Storage>,
    generation: u64,
    day_time: bool,
}

impl BattleMap {
    /// Open, daylit map of `size` x `size` tiles
    pub fn new(size: i32) -> Self {
        debug_assert!(size > 0);
        Self {
            size,
            tiles: vec![Tile::default(); (size * size) as usize],
            storage: AHashMap::new(),
            generation: 1,
            day_time: true,
        }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn in_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.size && pos.y < self.size
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| (pos.y * self.size + pos.x) as usize)
    }

    pub fn tile(&self, pos: GridPos) -> Option<&Tile> {
        self.index(pos).map(|i| &self.tiles[i])
    }

    fn tile_mut(&mut self, pos: GridPos) -> Option<&mut Tile> {
        self.index(pos).map(move |i| &mut self.tiles[i])
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Monotonic counter bumped on every connectivity-relevant mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub fn day_time(&self) -> bool {
        self.day_time
    }

    pub fn set_day_time(&mut self, day: bool) {
        self.day_time = day;
    }

    // === GEOMETRY ===

    /// Replace the static walls of a tile (movement and sight)
    pub fn set_walls(&mut self, pos: GridPos, walls: DirMask) {
        if let Some(tile) = self.tile_mut(pos) {
            tile.walls = walls;
            tile.sight_walls = walls;
            self.bump_generation();
        }
    }

    /// Wall on the shared edge of `pos` and its neighbor in `dir`, both sides
    pub fn add_wall_between(&mut self, pos: GridPos, dir: Direction) {
        let other = pos.step(dir);
        if let Some(tile) = self.tile_mut(pos) {
            tile.walls |= DirMask::from_dir(dir);
            tile.sight_walls |= DirMask::from_dir(dir);
        }
        if let Some(tile) = self.tile_mut(other) {
            tile.walls |= DirMask::from_dir(dir.opposite());
            tile.sight_walls |= DirMask::from_dir(dir.opposite());
        }
        self.bump_generation();
    }

    pub fn set_content(&mut self, pos: GridPos, content: Option<TileContent>) {
        if let Some(tile) = self.tile_mut(pos) {
            tile.content = content;
            self.bump_generation();
        }
    }

    pub fn set_door(&mut self, pos: GridPos, mask: DirMask) {
        if let Some(tile) = self.tile_mut(pos) {
            tile.door = Some(Door { open: false, mask });
            self.bump_generation();
        }
    }

    /// Open or close a door. Returns true if its state changed.
    pub fn set_door_open(&mut self, pos: GridPos, open: bool) -> bool {
        let changed = match self.tile_mut(pos).and_then(|t| t.door.as_mut()) {
            Some(door) if door.open != open => {
                door.open = open;
                true
            }
            _ => false,
        };
        if changed {
            self.bump_generation();
        }
        changed
    }

    pub fn door_positions(&self) -> Vec<GridPos> {
        let size = self.size;
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.door.is_some())
            .map(|(i, _)| GridPos::new(i as i32 % size, i as i32 / size))
            .collect()
    }

    /// Directions blocked for movement out of a tile by static geometry.
    /// Off-map tiles are blocked in every direction.
    pub fn path_mask(&self, pos: GridPos) -> DirMask {
        let Some(tile) = self.tile(pos) else {
            return DirMask::all();
        };
        let mut mask = tile.walls;
        if let Some(content) = tile.content {
            mask |= content.path_mask;
        }
        if let Some(door) = tile.door.filter(|d| !d.open) {
            mask |= door.mask;
        }
        mask
    }

    /// Directions blocked for sight out of a tile
    pub fn sight_mask(&self, pos: GridPos) -> DirMask {
        let Some(tile) = self.tile(pos) else {
            return DirMask::all();
        };
        let mut mask = tile.sight_walls;
        if let Some(content) = tile.content {
            mask |= content.sight_mask;
        }
        if let Some(door) = tile.door.filter(|d| !d.open) {
            mask |= door.mask;
        }
        mask
    }

    fn sight_edge_clear(&self, from: GridPos, dir: Direction) -> bool {
        let to = from.step(dir);
        self.in_bounds(to)
            && !self.sight_mask(from).blocks(dir)
            && !self.sight_mask(to).blocks(dir.opposite())
    }

    /// Can sight pass from `p` into the adjacent tile `q`?
    ///
    /// Orthogonal: the shared edge must be clear from both sides. Diagonal:
    /// at least one elbow route through an orthogonal neighbor must be clear.
    pub fn can_see(&self, p: GridPos, q: GridPos) -> bool {
        let (dx, dy) = (q.x - p.x, q.y - p.y);
        if let Some(dir) = Direction::from_delta(dx, dy) {
            return self.sight_edge_clear(p, dir);
        }
        debug_assert!(p.is_diagonal_to(q));
        let (Some(h), Some(v)) = (Direction::from_delta(dx, 0), Direction::from_delta(0, dy)) else {
            return false;
        };
        let via_h = self.sight_edge_clear(p, h) && self.sight_edge_clear(p.step(h), v);
        let via_v = self.sight_edge_clear(p, v) && self.sight_edge_clear(p.step(v), h);
        via_h || via_v
    }

    // === LIGHT & SMOKE ===

    pub fn set_light(&mut self, pos: GridPos, luminance: u16) {
        if let Some(tile) = self.tile_mut(pos) {
            tile.light = luminance.min(FULL_LIGHT);
        }
    }

    /// Fill the whole lightmap with one luminance
    pub fn fill_light(&mut self, luminance: u16) {
        let lum = luminance.min(FULL_LIGHT);
        self.tiles.iter_mut().for_each(|t| t.light = lum);
    }

    /// Effective luminance; full light during the day
    pub fn luminance(&self, pos: GridPos) -> u16 {
        if self.day_time {
            return FULL_LIGHT;
        }
        self.tile(pos).map(|t| t.light).unwrap_or(0)
    }

    pub fn is_obscured(&self, pos: GridPos) -> bool {
        self.tile(pos).is_some_and(|t| t.smoke > 0)
    }

    /// Add smoke; an existing longer smoke is kept
    pub fn add_smoke(&mut self, pos: GridPos, turns: u8) {
        if let Some(tile) = self.tile_mut(pos) {
            tile.smoke = tile.smoke.max(turns);
        }
    }

    /// Per-turn map update. Decays smoke; returns the region whose
    /// obscured state changed.
    pub fn do_sub_turn(&mut self) -> Option<TileRect> {
        let size = self.size;
        let mut changed = None;
        for (i, tile) in self.tiles.iter_mut().enumerate() {
            if tile.smoke > 0 {
                tile.smoke -= 1;
                if tile.smoke == 0 {
                    let pos = GridPos::new(i as i32 % size, i as i32 / size);
                    union_into(&mut changed, TileRect::new(pos, pos));
                }
            }
        }
        changed
    }

    // === DESTRUCTION ===

    /// Damage the content of a tile. Returns the destroyed region, if the
    /// content was destroyed.
    pub fn damage_tile(&mut self, pos: GridPos, amount: i32) -> Option<TileRect> {
        let tile = self.tile_mut(pos)?;
        let content = tile.content.as_mut()?;
        content.hp -= amount;
        if content.hp > 0 {
            return None;
        }
        tile.content = None;
        self.bump_generation();
        Some(TileRect::new(pos, pos))
    }

    // === STORAGE ===

    pub fn storage(&self, pos: GridPos) -> Option<&Storage> {
        self.storage.get(&pos)
    }

    pub fn storage_entries(&self) -> impl Iterator<Item = (&GridPos, &Storage)> {
        self.storage.iter()
    }

    pub fn add_item(&mut self, pos: GridPos, item: Item) {
        if !self.in_bounds(pos) {
            return;
        }
        self.storage.entry(pos).or_default().items.push(item);
        self.bump_generation();
    }

    /// Remove and return the storage of a tile
    pub fn take_storage(&mut self, pos: GridPos) -> Option<Storage> {
        let storage = self.storage.remove(&pos)?;
        self.bump_generation();
        Some(storage)
    }

    /// Put storage back on a tile; empty storage removes the entry
    pub fn put_storage(&mut self, pos: GridPos, storage: Storage) {
        if storage.is_empty() {
            self.storage.remove(&pos);
        } else if self.in_bounds(pos) {
            self.storage.insert(pos, storage);
        }
        self.bump_generation();
    }

    /// Restore tiles and storage wholesale (save loading)
    pub(crate) fn restore(
        &mut self,
        tiles: Vec<Tile>,
        storage: AHashMap<GridPos, Storage>,
        day_time: bool,
    ) {
        debug_assert_eq!(tiles.len(), self.tiles.len());
        self.tiles = tiles;
        self.storage = storage;
        self.day_time = day_time;
        self.bump_generation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_map_is_connected() {
        let map = BattleMap::new(8);
        assert_eq!(map.path_mask(GridPos::new(3, 3)), DirMask::empty());
        assert!(map.can_see(GridPos::new(3, 3), GridPos::new(4, 4)));
    }

    #[test]
    fn test_off_map_fully_blocked() {
        let map = BattleMap::new(8);
        assert_eq!(map.path_mask(GridPos::new(-1, 0)), DirMask::all());
        assert!(!map.can_see(GridPos::new(0, 0), GridPos::new(-1, 0)));
    }

    #[test]
    fn test_one_sided_wall_blocks_sight() {
        let mut map = BattleMap::new(8);
        map.set_walls(GridPos::new(3, 3), DirMask::EAST);
        assert!(!map.can_see(GridPos::new(3, 3), GridPos::new(4, 3)));
        assert!(!map.can_see(GridPos::new(4, 3), GridPos::new(3, 3)));
    }

    #[test]
    fn test_diagonal_sight_needs_one_elbow() {
        let mut map = BattleMap::new(8);
        let p = GridPos::new(3, 3);
        let q = GridPos::new(4, 4);
        map.add_wall_between(p, Direction::East);
        assert!(map.can_see(p, q));
        map.add_wall_between(p, Direction::North);
        assert!(!map.can_see(p, q));
    }

    #[test]
    fn test_door_blocks_only_when_closed() {
        let mut map = BattleMap::new(8);
        let pos = GridPos::new(2, 2);
        map.set_door(pos, DirMask::NORTH | DirMask::SOUTH);
        assert!(map.path_mask(pos).blocks(Direction::North));

        let gen = map.generation();
        assert!(map.set_door_open(pos, true));
        assert!(map.generation() > gen);
        assert!(!map.path_mask(pos).blocks(Direction::North));
        assert!(!map.set_door_open(pos, true));
    }

    #[test]
    fn test_destroying_content_clears_block() {
        let mut map = BattleMap::new(8);
        let pos = GridPos::new(5, 5);
        map.set_content(pos, Some(TileContent::solid(10)));
        assert!(map.damage_tile(pos, 4).is_none());
        assert_eq!(map.damage_tile(pos, 6), Some(TileRect::new(pos, pos)));
        assert_eq!(map.path_mask(pos), DirMask::empty());
    }

    #[test]
    fn test_smoke_decays() {
        let mut map = BattleMap::new(8);
        let pos = GridPos::new(1, 1);
        map.add_smoke(pos, 2);
        assert!(map.is_obscured(pos));
        assert!(map.do_sub_turn().is_none());
        assert_eq!(map.do_sub_turn(), Some(TileRect::new(pos, pos)));
        assert!(!map.is_obscured(pos));
    }

    #[test]
    fn test_night_uses_lightmap() {
        let mut map = BattleMap::new(4);
        map.fill_light(300);
        assert_eq!(map.luminance(GridPos::new(0, 0)), FULL_LIGHT);
        map.set_day_time(false);
        assert_eq!(map.luminance(GridPos::new(0, 0)), 300);
    }
}
