//! Versioned save/load of a battle in progress
//!
//! Layout: one version byte, then a bincode core block (map tiles, unit
//! roster, whose turn it is). Version 2 appends an extras block with the
//! day-time flag, tile storage and smoke. Older saves load the extras with
//! defaults.

use std::io::{Read, Write};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::battle::battle_map::{BattleMap, Storage, Tile};
use crate::battle::constants::{team_of_slot, MAP_SIZE, MAX_UNITS};
use crate::battle::execution::{BattlePhase, BattleState};
use crate::battle::units::{Unit, UnitStatus};
use crate::battle::weapons::WeaponOracle;
use crate::core::config::BattleConfig;
use crate::core::error::{BattleError, Result};
use crate::core::types::{GridPos, Team};

/// Newest save version this build writes
pub const SAVE_VERSION: u8 = 2;

#[derive(Serialize, Deserialize)]
struct CoreBlock {
    map_size: i32,
    /// Tiles with smoke cleared; smoke lives in the extras
    tiles: Vec<Tile>,
    units: Vec<Unit>,
    current_team: Team,
    turn: u32,
}

#[derive(Serialize, Deserialize, Default)]
struct ExtrasBlock {
    day_time: bool,
    storage: Vec<(GridPos, Storage)>,
    smoke: Vec<u8>,
}

/// Write `state` to `writer` in the current format
pub fn save<W: Write>(state: &BattleState, mut writer: W) -> Result<()> {
    let map = state.map();
    let core = CoreBlock {
        map_size: map.size(),
        tiles: map
            .tiles()
            .iter()
            .map(|tile| Tile {
                smoke: 0,
                ..*tile
            })
            .collect(),
        units: state.units().iter().cloned().collect(),
        current_team: state.current_team(),
        turn: state.turn(),
    };

    let mut storage: Vec<(GridPos, Storage)> = map
        .storage_entries()
        .map(|(pos, storage)| (*pos, storage.clone()))
        .collect();
    storage.sort_by_key(|(pos, _)| (pos.y, pos.x));
    let extras = ExtrasBlock {
        day_time: map.day_time(),
        storage,
        smoke: map.tiles().iter().map(|tile| tile.smoke).collect(),
    };

    writer.write_all(&[SAVE_VERSION])?;
    bincode::serialize_into(&mut writer, &core)?;
    bincode::serialize_into(&mut writer, &extras)?;
    writer.flush()?;

    tracing::debug!(
        "Saved battle: turn {}, {} living units",
        core.turn,
        state.units().iter_alive().count()
    );
    Ok(())
}

/// Read a battle saved by [`save`]. The battle resumes in the active phase
/// with visibility and targets rebuilt; AI controllers must be reattached.
pub fn load<R: Read>(
    mut reader: R,
    config: BattleConfig,
    weapons: Box<dyn WeaponOracle>,
) -> Result<BattleState> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    let version = version[0];
    if version == 0 || version > SAVE_VERSION {
        return Err(BattleError::UnsupportedVersion {
            found: version,
            supported: SAVE_VERSION,
        });
    }

    let core: CoreBlock = bincode::deserialize_from(&mut reader)?;
    let extras: ExtrasBlock = if version >= 2 {
        bincode::deserialize_from(&mut reader)?
    } else {
        ExtrasBlock {
            day_time: true,
            ..ExtrasBlock::default()
        }
    };
    validate(&core, &extras)?;

    let mut tiles = core.tiles;
    for (tile, smoke) in tiles.iter_mut().zip(extras.smoke.iter()) {
        tile.smoke = *smoke;
    }
    let storage: AHashMap<GridPos, Storage> = extras.storage.into_iter().collect();

    let mut map = BattleMap::new(core.map_size);
    map.restore(tiles, storage, extras.day_time);

    let mut state = BattleState::new(map, config, weapons);
    state.units.restore(core.units);
    state.current_team = core.current_team;
    state.turn = core.turn;
    state.phase = BattlePhase::Active;
    state.visibility.invalidate_all();
    state.calc_team_targets();
    state.targets.clear_events();

    tracing::debug!("Loaded battle (version {}): turn {}", version, state.turn);
    Ok(state)
}

fn validate(core: &CoreBlock, extras: &ExtrasBlock) -> Result<()> {
    if !(1..=MAP_SIZE).contains(&core.map_size) {
        return Err(BattleError::CorruptSave(format!(
            "map size {} outside 1..={}",
            core.map_size, MAP_SIZE
        )));
    }
    let area = core.map_size as usize * core.map_size as usize;
    if core.tiles.len() != area {
        return Err(BattleError::CorruptSave(format!(
            "{} tiles for a {}x{} map",
            core.tiles.len(),
            core.map_size,
            core.map_size
        )));
    }
    if !extras.smoke.is_empty() && extras.smoke.len() != area {
        return Err(BattleError::CorruptSave(format!(
            "{} smoke entries for {} tiles",
            extras.smoke.len(),
            area
        )));
    }
    if core.units.len() != MAX_UNITS {
        return Err(BattleError::CorruptSave(format!(
            "{} unit slots, expected {}",
            core.units.len(),
            MAX_UNITS
        )));
    }
    for (slot, unit) in core.units.iter().enumerate() {
        if unit.id.index() != slot || team_of_slot(slot) != Some(unit.team) {
            return Err(BattleError::CorruptSave(format!(
                "unit slot {} holds unit {} of team {:?}",
                slot, unit.id.0, unit.team
            )));
        }
        let on_map =
            (0..core.map_size).contains(&unit.pos.x) && (0..core.map_size).contains(&unit.pos.y);
        if unit.status != UnitStatus::Unused && !on_map {
            return Err(BattleError::CorruptSave(format!(
                "unit {} at ({}, {}) is off the map",
                slot, unit.pos.x, unit.pos.y
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::units::{Inventory, Stats};
    use crate::battle::weapons::{Item, WeaponTable};

    fn sample() -> BattleState {
        let weapons = WeaponTable::standard();
        let rifle = weapons.find("rifle").unwrap();
        let mut state = BattleState::new(
            BattleMap::new(12),
            BattleConfig::default(),
            Box::new(weapons),
        );
        state.spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::armed(rifle, 10));
        state.spawn_unit(Team::Hostile, GridPos::new(10, 10), Stats::default(), Inventory::default());
        state.map_mut().add_item(GridPos::new(4, 4), Item::Weapon(rifle));
        state.map_mut().add_smoke(GridPos::new(5, 5), 3);
        state.map_mut().set_day_time(false);
        state.start_battle();
        state
    }

    #[test]
    fn test_save_writes_version_byte() {
        let mut bytes = Vec::new();
        save(&sample(), &mut bytes).unwrap();
        assert_eq!(bytes[0], SAVE_VERSION);
    }

    #[test]
    fn test_round_trip_keeps_extras() {
        let state = sample();
        let mut bytes = Vec::new();
        save(&state, &mut bytes).unwrap();

        let loaded = load(
            bytes.as_slice(),
            BattleConfig::default(),
            Box::new(WeaponTable::standard()),
        )
        .unwrap();
        assert!(!loaded.map().day_time());
        assert_eq!(loaded.map().tile(GridPos::new(5, 5)).unwrap().smoke, 3);
        assert_eq!(loaded.map().storage(GridPos::new(4, 4)).unwrap().items.len(), 1);
        assert_eq!(loaded.phase(), BattlePhase::Active);
    }

    #[test]
    fn test_version_one_uses_defaults() {
        let state = sample();
        let mut bytes = vec![1u8];
        let core = CoreBlock {
            map_size: state.map().size(),
            tiles: state.map().tiles().to_vec(),
            units: state.units().iter().cloned().collect(),
            current_team: Team::Hostile,
            turn: 7,
        };
        bincode::serialize_into(&mut bytes, &core).unwrap();

        let loaded = load(
            bytes.as_slice(),
            BattleConfig::default(),
            Box::new(WeaponTable::standard()),
        )
        .unwrap();
        assert!(loaded.map().day_time());
        assert!(loaded.map().storage(GridPos::new(4, 4)).is_none());
        assert_eq!(loaded.current_team(), Team::Hostile);
        assert_eq!(loaded.turn(), 7);
    }

    #[test]
    fn test_newer_version_rejected() {
        let bytes = [SAVE_VERSION + 1, 0, 0, 0];
        let result = load(
            &bytes[..],
            BattleConfig::default(),
            Box::new(WeaponTable::standard()),
        );
        assert!(matches!(
            result,
            Err(BattleError::UnsupportedVersion { found: 3, .. })
        ));
    }

    /// Re-encode a saved battle after tampering with its core block
    fn tampered(edit: impl FnOnce(&mut CoreBlock)) -> Vec<u8> {
        let state = sample();
        let mut core = CoreBlock {
            map_size: state.map().size(),
            tiles: state.map().tiles().to_vec(),
            units: state.units().iter().cloned().collect(),
            current_team: Team::Player,
            turn: 1,
        };
        edit(&mut core);
        let mut bytes = vec![1u8];
        bincode::serialize_into(&mut bytes, &core).unwrap();
        bytes
    }

    fn load_bytes(bytes: &[u8]) -> Result<BattleState> {
        load(bytes, BattleConfig::default(), Box::new(WeaponTable::standard()))
    }

    #[test]
    fn test_oversized_map_is_corrupt() {
        let bytes = tampered(|core| {
            core.map_size = 65536;
            core.tiles.clear();
        });
        assert!(matches!(load_bytes(&bytes), Err(BattleError::CorruptSave(_))));

        let bytes = tampered(|core| core.map_size = MAP_SIZE + 1);
        assert!(matches!(load_bytes(&bytes), Err(BattleError::CorruptSave(_))));
    }

    #[test]
    fn test_bad_unit_slots_are_corrupt() {
        let bytes = tampered(|core| core.units.swap(0, 1));
        assert!(matches!(load_bytes(&bytes), Err(BattleError::CorruptSave(_))));

        let bytes = tampered(|core| core.units[0].team = Team::Hostile);
        assert!(matches!(load_bytes(&bytes), Err(BattleError::CorruptSave(_))));

        let bytes = tampered(|core| core.units[0].pos = GridPos::new(40, 3));
        assert!(matches!(load_bytes(&bytes), Err(BattleError::CorruptSave(_))));

        // Unused slots may hold any position.
        let bytes = tampered(|core| core.units[5].pos = GridPos::new(-1, 99));
        assert!(load_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_truncated_save_is_an_error() {
        let mut bytes = Vec::new();
        save(&sample(), &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        let result = load(
            bytes.as_slice(),
            BattleConfig::default(),
            Box::new(WeaponTable::standard()),
        );
        assert!(result.is_err());
    }
}
