//! Units and the fixed-capacity unit pool
//!
//! Units are never removed from the pool: a slot is Unused until spawned,
//! Alive while in play and Dead afterwards. Each team owns a contiguous
//! range of slots.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::battle::constants::{team_range, MAX_UNITS};
use crate::battle::weapons::{FireMode, Item, WeaponId, WeaponOracle};
use crate::core::types::{GridPos, Team, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitStatus {
    #[default]
    Unused,
    Alive,
    Dead,
}

/// Combat statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Aim error multiplier; 1.0 is average, lower is better
    pub accuracy: f32,
    /// Chance in [0, 1] to react to a newly seen enemy
    pub reaction: f32,
    pub hp: i32,
    pub total_hp: i32,
    pub total_tu: f32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            accuracy: 1.0,
            reaction: 0.6,
            hp: 50,
            total_hp: 50,
            total_tu: 40.0,
        }
    }
}

/// What a unit carries. The primary weapon is in hand; rounds loaded into
/// it are tracked separately from spare clips in the pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub weapon: Option<WeaponId>,
    pub loaded_rounds: u32,
    pub secondary: Option<WeaponId>,
    pub secondary_rounds: u32,
    pub items: Vec<Item>,
    pub capacity: usize,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            weapon: None,
            loaded_rounds: 0,
            secondary: None,
            secondary_rounds: 0,
            items: Vec::new(),
            capacity: 8,
        }
    }
}

impl Inventory {
    pub fn armed(weapon: WeaponId, rounds: u32) -> Self {
        Self {
            weapon: Some(weapon),
            loaded_rounds: rounds,
            ..Self::default()
        }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Rounds available to the weapon in hand, loaded and in spare clips
    pub fn rounds_available(&self) -> u32 {
        let Some(weapon) = self.weapon else {
            return 0;
        };
        let spare: u32 = self
            .items
            .iter()
            .map(|item| match item {
                Item::Clip { weapon: w, rounds } if *w == weapon => *rounds,
                _ => 0,
            })
            .sum();
        self.loaded_rounds + spare
    }

    /// Spend one round, reloading from a spare clip when empty
    pub fn use_round(&mut self) -> bool {
        let Some(weapon) = self.weapon else {
            return false;
        };
        if self.loaded_rounds == 0 {
            let clip = self
                .items
                .iter()
                .position(|item| matches!(item, Item::Clip { weapon: w, .. } if *w == weapon));
            match clip.map(|i| self.items.remove(i)) {
                Some(Item::Clip { rounds, .. }) => self.loaded_rounds = rounds,
                _ => return false,
            }
        }
        if self.loaded_rounds == 0 {
            return false;
        }
        self.loaded_rounds -= 1;
        true
    }

    /// Exchange primary and secondary weapons. Returns false if there is
    /// nothing to swap in.
    pub fn swap_weapon(&mut self) -> bool {
        if self.secondary.is_none() {
            return false;
        }
        std::mem::swap(&mut self.weapon, &mut self.secondary);
        std::mem::swap(&mut self.loaded_rounds, &mut self.secondary_rounds);
        true
    }

    /// Take an item. A weapon goes to an empty hand first, then to the
    /// secondary slot, then to the pack. Returns the item back if there is
    /// no room.
    pub fn add_item(&mut self, item: Item) -> Result<(), Item> {
        if let Item::Weapon(id) = item {
            if self.weapon.is_none() {
                self.weapon = Some(id);
                self.loaded_rounds = 0;
                return Ok(());
            }
            if self.secondary.is_none() {
                self.secondary = Some(id);
                self.secondary_rounds = 0;
                return Ok(());
            }
        }
        if self.is_full() {
            return Err(item);
        }
        self.items.push(item);
        Ok(())
    }
}

/// A combatant on the battle map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub team: Team,
    pub status: UnitStatus,
    pub pos: GridPos,
    /// Interpolated position while moving between tiles
    pub world_pos: Vec2,
    /// Heading in degrees; 0 faces +y, 90 faces +x
    pub facing: f32,
    pub tu: f32,
    pub stats: Stats,
    pub inventory: Inventory,
    pub kills: u32,
    /// The controller has finished with this unit for the turn
    pub user_done: bool,
}

impl Unit {
    fn unused(id: UnitId, team: Team) -> Self {
        Self {
            id,
            team,
            status: UnitStatus::Unused,
            pos: GridPos::default(),
            world_pos: Vec2::ZERO,
            facing: 0.0,
            tu: 0.0,
            stats: Stats::default(),
            inventory: Inventory::default(),
            kills: 0,
            user_done: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == UnitStatus::Alive
    }

    pub fn weapon(&self) -> Option<WeaponId> {
        self.inventory.weapon
    }

    /// Place on a tile, snapping the interpolated position to its center
    pub fn set_pos(&mut self, pos: GridPos) {
        self.pos = pos;
        self.world_pos = pos.center();
    }

    /// Restore full time units at the start of the unit's turn
    pub fn new_turn(&mut self) {
        if self.is_alive() {
            self.tu = self.stats.total_tu;
            self.user_done = false;
        }
    }

    pub fn use_tu(&mut self, amount: f32) {
        debug_assert!(amount <= self.tu + 1e-3, "spent {} of {} TU", amount, self.tu);
        self.tu = (self.tu - amount).max(0.0);
    }

    /// Apply damage. Returns true if this killed the unit.
    pub fn apply_damage(&mut self, amount: i32) -> bool {
        if !self.is_alive() || amount <= 0 {
            return false;
        }
        self.stats.hp -= amount;
        if self.stats.hp <= 0 {
            self.stats.hp = 0;
            self.status = UnitStatus::Dead;
            self.tu = 0.0;
            return true;
        }
        false
    }

    /// Can this unit pull the trigger in `mode` right now?
    pub fn can_fire(&self, weapons: &dyn WeaponOracle, mode: FireMode) -> bool {
        let Some(weapon) = self.weapon() else {
            return false;
        };
        let tu = weapons.time_units(weapon, mode);
        self.is_alive()
            && tu > 0.0
            && tu <= self.tu
            && self.inventory.rounds_available() >= mode.rounds()
    }
}

/// Fixed-capacity pool indexed by `UnitId`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPool {
    units: Vec<Unit>,
}

impl Default for UnitPool {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitPool {
    pub fn new() -> Self {
        let units = Team::ALL
            .into_iter()
            .flat_map(|team| team_range(team).map(move |i| Unit::unused(UnitId::new(i), team)))
            .collect::<Vec<_>>();
        debug_assert_eq!(units.len(), MAX_UNITS);
        Self { units }
    }

    /// Bring a unit into play in the first free slot of its team
    pub fn spawn(
        &mut self,
        team: Team,
        pos: GridPos,
        stats: Stats,
        inventory: Inventory,
    ) -> Option<UnitId> {
        let slot = team_range(team).find(|i| self.units[*i].status == UnitStatus::Unused)?;
        let unit = &mut self.units[slot];
        unit.status = UnitStatus::Alive;
        unit.set_pos(pos);
        unit.facing = 0.0;
        unit.tu = stats.total_tu;
        unit.stats = stats;
        unit.inventory = inventory;
        unit.kills = 0;
        unit.user_done = false;
        Some(unit.id)
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.index())
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(id.index())
    }

    /// The unit if it exists and is alive
    pub fn alive(&self, id: UnitId) -> Option<&Unit> {
        self.get(id).filter(|u| u.is_alive())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.units.iter_mut()
    }

    pub fn iter_alive(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.is_alive())
    }

    pub fn team(&self, team: Team) -> impl Iterator<Item = &Unit> {
        self.units[team_range(team)].iter()
    }

    pub fn team_alive_count(&self, team: Team) -> usize {
        self.team(team).filter(|u| u.is_alive()).count()
    }

    /// Living unit standing on a tile
    pub fn unit_at(&self, pos: GridPos) -> Option<UnitId> {
        self.iter_alive().find(|u| u.pos == pos).map(|u| u.id)
    }

    pub(crate) fn restore(&mut self, units: Vec<Unit>) {
        debug_assert_eq!(units.len(), MAX_UNITS);
        self.units = units;
    }
}
