//! Save/load integration tests

use squad_tactics::battle::*;
use squad_tactics::core::types::Direction;
use squad_tactics::core::{BattleConfig, BattleError, GridPos, Team};

fn skirmish() -> (BattleState, Vec<squad_tactics::core::UnitId>) {
    let weapons = WeaponTable::standard();
    let rifle = weapons.find("rifle").unwrap();
    let mut state = BattleState::new(BattleMap::new(20), BattleConfig::default(), Box::new(weapons));
    state
        .map_mut()
        .add_wall_between(GridPos::new(5, 5), Direction::East);
    state
        .map_mut()
        .set_door(GridPos::new(9, 9), DirMask::NORTH | DirMask::SOUTH);
    state
        .map_mut()
        .set_content(GridPos::new(12, 3), Some(TileContent::solid(25)));

    let ids = vec![
        state
            .spawn_unit(Team::Player, GridPos::new(1, 1), Stats::default(), Inventory::armed(rifle, 20))
            .unwrap(),
        state
            .spawn_unit(Team::Player, GridPos::new(3, 1), Stats::default(), Inventory::default())
            .unwrap(),
        state
            .spawn_unit(Team::Hostile, GridPos::new(18, 18), Stats::default(), Inventory::armed(rifle, 7))
            .unwrap(),
    ];
    state.start_battle();
    (state, ids)
}

fn round_trip(state: &BattleState) -> BattleState {
    let mut bytes = Vec::new();
    save(state, &mut bytes).unwrap();
    load(
        bytes.as_slice(),
        BattleConfig::default(),
        Box::new(WeaponTable::standard()),
    )
    .unwrap()
}

#[test]
fn test_round_trip_resumes_mid_battle() {
    let (mut state, ids) = skirmish();
    assert!(matches!(
        state.request_move(ids[0], GridPos::new(1, 4)),
        MoveRequest::Accepted { .. }
    ));
    let mut time = 0;
    while !state.actions().is_empty() {
        time += 50;
        state.tick(time, 50);
    }
    state.end_turn();

    let loaded = round_trip(&state);
    assert_eq!(loaded.current_team(), Team::Hostile);
    assert_eq!(loaded.turn(), state.turn());
    for id in &ids {
        let before = state.unit(*id).unwrap();
        let after = loaded.unit(*id).unwrap();
        assert_eq!(after.pos, before.pos);
        assert_eq!(after.tu, before.tu);
        assert_eq!(after.inventory, before.inventory);
    }
    assert_eq!(loaded.unit(ids[0]).unwrap().pos, GridPos::new(1, 4));
    assert_eq!(loaded.map().tiles(), state.map().tiles());
}

#[test]
fn test_loaded_battle_rebuilds_targets() {
    let (mut state, ids) = skirmish();
    state.place_unit(ids[2], GridPos::new(1, 5));
    state.calc_team_targets();
    assert!(state.targets().can_see(ids[0], ids[2]));

    let mut loaded = round_trip(&state);
    assert!(loaded.targets().can_see(ids[0], ids[2]));
    assert!(loaded.targets().team_can_see(Team::Hostile, ids[0]));
    assert!(loaded.target_events().is_empty());
    assert!(loaded.can_see(ids[0], GridPos::new(1, 5)));
}

#[test]
fn test_loaded_battle_keeps_playing() {
    let (state, ids) = skirmish();
    let mut loaded = round_trip(&state);
    assert_eq!(loaded.phase(), BattlePhase::Active);
    assert!(matches!(
        loaded.request_move(ids[1], GridPos::new(3, 3)),
        MoveRequest::Accepted { .. }
    ));
    assert!(!loaded.end_turn());
}

#[test]
fn test_garbage_is_rejected() {
    let result = load(
        &[0u8, 1, 2, 3][..],
        BattleConfig::default(),
        Box::new(WeaponTable::standard()),
    );
    assert!(matches!(
        result,
        Err(BattleError::UnsupportedVersion { found: 0, .. })
    ));

    let empty: &[u8] = &[];
    let result = load(empty, BattleConfig::default(), Box::new(WeaponTable::standard()));
    assert!(matches!(result, Err(BattleError::IoError(_))));
}
