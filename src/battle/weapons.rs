//! Weapon definitions and the queries the simulation makes against them
//!
//! The simulation only ever asks three questions of a weapon: how much
//! damage a mode does, how many time units it costs, and how likely it is
//! to hit at a distance. `WeaponOracle` is that contract; `WeaponTable` is
//! a data-driven implementation loaded from JSON or built in code.

use serde::{Deserialize, Serialize};

use crate::battle::constants::UNIT_RADIUS;
use crate::core::error::Result;
use crate::core::types::Millis;

/// Fire modes, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireMode {
    Snap,
    Aimed,
    Auto,
}

impl FireMode {
    pub const ALL: [FireMode; 3] = [FireMode::Snap, FireMode::Aimed, FireMode::Auto];

    /// Rounds fired per trigger pull
    pub fn rounds(self) -> u32 {
        match self {
            FireMode::Auto => 3,
            FireMode::Snap | FireMode::Aimed => 1,
        }
    }
}

/// Damage split by kind
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DamageDesc {
    pub kinetic: f32,
    pub energy: f32,
    pub incendiary: f32,
}

impl DamageDesc {
    pub fn new(kinetic: f32, energy: f32, incendiary: f32) -> Self {
        Self {
            kinetic,
            energy,
            incendiary,
        }
    }

    pub fn total(&self) -> f32 {
        self.kinetic + self.energy + self.incendiary
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.kinetic * factor,
            self.energy * factor,
            self.incendiary * factor,
        )
    }
}

/// Expected outcome of one trigger pull
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FireStats {
    /// Chance a single round lands on a unit-sized target
    pub hit_chance: f32,
    /// Expected damage per time unit spent
    pub damage_per_tu: f32,
}

/// Index into a `WeaponTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeaponId(pub u16);

/// Anything a unit can carry or a tile can store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    Weapon(WeaponId),
    Clip { weapon: WeaponId, rounds: u32 },
}

/// Weapon queries used by the simulation
pub trait WeaponOracle {
    fn damage_base(&self, weapon: WeaponId, mode: FireMode) -> DamageDesc;

    /// Time units for one trigger pull; 0 if the mode is unavailable
    fn time_units(&self, weapon: WeaponId, mode: FireMode) -> f32;

    /// Aim spread of a mode, multiplied with the shooter's accuracy
    fn accuracy(&self, weapon: WeaponId, mode: FireMode) -> f32;

    fn fire_statistics(
        &self,
        weapon: WeaponId,
        mode: FireMode,
        shooter_accuracy: f32,
        distance: f32,
    ) -> FireStats;

    fn is_explosive(&self, weapon: WeaponId) -> bool;

    /// Visual effect time between the shot and its impact
    fn effect_delay(&self, weapon: WeaponId) -> Millis;

    fn clip_size(&self, weapon: WeaponId) -> u32;
}

/// Per-mode parameters of a weapon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeDef {
    pub mode: FireMode,
    pub time_units: f32,
    /// Aim spread in fraction of distance per unit of shooter accuracy
    pub spread: f32,
    /// Damage multiplier applied to each round
    #[serde(default = "default_damage_scale")]
    pub damage_scale: f32,
}

fn default_damage_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponDef {
    pub name: String,
    pub damage: DamageDesc,
    #[serde(default)]
    pub explosive: bool,
    pub clip_size: u32,
    #[serde(default)]
    pub effect_delay: Millis,
    pub modes: Vec<ModeDef>,
}

impl WeaponDef {
    pub fn mode(&self, mode: FireMode) -> Option<&ModeDef> {
        self.modes.iter().find(|m| m.mode == mode)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeaponTable {
    pub weapons: Vec<WeaponDef>,
}

impl WeaponTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load weapon definitions from a JSON array
    pub fn from_json_str(content: &str) -> Result<Self> {
        let weapons: Vec<WeaponDef> = serde_json::from_str(content)?;
        Ok(Self { weapons })
    }

    pub fn add(&mut self, def: WeaponDef) -> WeaponId {
        self.weapons.push(def);
        WeaponId((self.weapons.len() - 1) as u16)
    }

    pub fn get(&self, id: WeaponId) -> Option<&WeaponDef> {
        self.weapons.get(id.0 as usize)
    }

    pub fn find(&self, name: &str) -> Option<WeaponId> {
        self.weapons
            .iter()
            .position(|w| w.name == name)
            .map(|i| WeaponId(i as u16))
    }

    fn mode(&self, weapon: WeaponId, mode: FireMode) -> Option<&ModeDef> {
        self.get(weapon).and_then(|w| w.mode(mode))
    }

    /// Stock weapons: pistol, rifle, plasma rifle, rocket launcher
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.add(WeaponDef {
            name: "pistol".into(),
            damage: DamageDesc::new(22.0, 0.0, 0.0),
            explosive: false,
            clip_size: 12,
            effect_delay: 0,
            modes: vec![
                mode_def(FireMode::Snap, 6.0, 0.10),
                mode_def(FireMode::Aimed, 10.0, 0.05),
            ],
        });
        table.add(WeaponDef {
            name: "rifle".into(),
            damage: DamageDesc::new(30.0, 0.0, 0.0),
            explosive: false,
            clip_size: 20,
            effect_delay: 0,
            modes: vec![
                mode_def(FireMode::Snap, 8.0, 0.08),
                mode_def(FireMode::Aimed, 14.0, 0.03),
                mode_def(FireMode::Auto, 12.0, 0.12),
            ],
        });
        table.add(WeaponDef {
            name: "plasma".into(),
            damage: DamageDesc::new(0.0, 45.0, 5.0),
            explosive: false,
            clip_size: 24,
            effect_delay: 0,
            modes: vec![
                mode_def(FireMode::Snap, 9.0, 0.07),
                mode_def(FireMode::Aimed, 15.0, 0.03),
                mode_def(FireMode::Auto, 14.0, 0.10),
            ],
        });
        table.add(WeaponDef {
            name: "rocket".into(),
            damage: DamageDesc::new(60.0, 0.0, 20.0),
            explosive: true,
            clip_size: 1,
            effect_delay: 400,
            modes: vec![
                mode_def(FireMode::Snap, 15.0, 0.12),
                mode_def(FireMode::Aimed, 22.0, 0.06),
            ],
        });
        table
    }
}

fn mode_def(mode: FireMode, time_units: f32, spread: f32) -> ModeDef {
    ModeDef {
        mode,
        time_units,
        spread,
        damage_scale: 1.0,
    }
}

impl WeaponOracle for WeaponTable {
    fn damage_base(&self, weapon: WeaponId, mode: FireMode) -> DamageDesc {
        match (self.get(weapon), self.mode(weapon, mode)) {
            (Some(def), Some(m)) => def.damage.scaled(m.damage_scale),
            _ => DamageDesc::default(),
        }
    }

    fn time_units(&self, weapon: WeaponId, mode: FireMode) -> f32 {
        self.mode(weapon, mode).map(|m| m.time_units).unwrap_or(0.0)
    }

    fn accuracy(&self, weapon: WeaponId, mode: FireMode) -> f32 {
        self.mode(weapon, mode).map(|m| m.spread).unwrap_or(1.0)
    }

    fn fire_statistics(
        &self,
        weapon: WeaponId,
        mode: FireMode,
        shooter_accuracy: f32,
        distance: f32,
    ) -> FireStats {
        let tu = self.time_units(weapon, mode);
        if tu <= 0.0 {
            return FireStats::default();
        }
        // Jitter is uniform over a disc of radius spread * distance.
        let radius = self.accuracy(weapon, mode) * shooter_accuracy * distance;
        let hit_chance = if radius <= UNIT_RADIUS {
            1.0
        } else {
            (UNIT_RADIUS / radius).powi(2)
        };
        let damage = self.damage_base(weapon, mode).total();
        FireStats {
            hit_chance,
            damage_per_tu: hit_chance * damage * mode.rounds() as f32 / tu,
        }
    }

    fn is_explosive(&self, weapon: WeaponId) -> bool {
        self.get(weapon).is_some_and(|w| w.explosive)
    }

    fn effect_delay(&self, weapon: WeaponId) -> Millis {
        self.get(weapon).map(|w| w.effect_delay).unwrap_or(0)
    }

    fn clip_size(&self, weapon: WeaponId) -> u32 {
        self.get(weapon).map(|w| w.clip_size).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_lookup() {
        let table = WeaponTable::standard();
        let rifle = table.find("rifle").unwrap();
        assert!(table.time_units(rifle, FireMode::Auto) > 0.0);
        assert!(!table.is_explosive(rifle));
        assert!(table.is_explosive(table.find("rocket").unwrap()));
    }

    #[test]
    fn test_missing_mode_costs_nothing() {
        let table = WeaponTable::standard();
        let pistol = table.find("pistol").unwrap();
        assert_eq!(table.time_units(pistol, FireMode::Auto), 0.0);
        assert_eq!(
            table.fire_statistics(pistol, FireMode::Auto, 1.0, 5.0),
            FireStats::default()
        );
    }

    #[test]
    fn test_hit_chance_falls_with_distance() {
        let table = WeaponTable::standard();
        let rifle = table.find("rifle").unwrap();
        let near = table.fire_statistics(rifle, FireMode::Aimed, 1.0, 4.0);
        let far = table.fire_statistics(rifle, FireMode::Aimed, 1.0, 40.0);
        assert!(near.hit_chance > far.hit_chance);
        assert!(near.damage_per_tu > 0.0);
    }

    #[test]
    fn test_from_json() {
        let json = r#"[{"name":"sling","damage":{"kinetic":5.0,"energy":0.0,"incendiary":0.0},
            "clip_size":1,"modes":[{"mode":"Snap","time_units":8.0,"spread":0.2}]}]"#;
        let table = WeaponTable::from_json_str(json).unwrap();
        let sling = table.find("sling").unwrap();
        assert_eq!(table.damage_base(sling, FireMode::Snap).total(), 5.0);
        assert_eq!(table.effect_delay(sling), 0);
    }
}
