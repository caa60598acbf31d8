//! Visibility and pathing benchmarks on a cluttered full-size map.
//!
//! ```bash
//! cargo bench --bench visibility
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use squad_tactics::battle::{
    BattleMap, Inventory, MapPather, Stats, TileContent, UnitPool, VisibilityEngine, MAP_SIZE,
};
use squad_tactics::core::{BattleConfig, GridPos, Team};

/// Full-size map with scattered crates and a squad on each side
fn setup() -> (BattleMap, UnitPool) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut map = BattleMap::new(MAP_SIZE);
    for _ in 0..(MAP_SIZE * MAP_SIZE / 10) {
        let pos = GridPos::new(rng.gen_range(0..MAP_SIZE), rng.gen_range(2..MAP_SIZE - 2));
        map.set_content(pos, Some(TileContent::solid(20)));
    }

    let mut units = UnitPool::new();
    for i in 0..8 {
        units.spawn(Team::Player, GridPos::new(4 + i * 3, 0), Stats::default(), Inventory::default());
        units.spawn(
            Team::Hostile,
            GridPos::new(4 + i * 3, MAP_SIZE - 1),
            Stats::default(),
            Inventory::default(),
        );
    }
    (map, units)
}

fn bench_visibility(c: &mut Criterion) {
    let (map, units) = setup();
    let config = BattleConfig::default();

    c.bench_function("fog_rebuild_all_units", |b| {
        let mut vis = VisibilityEngine::new(MAP_SIZE, &config);
        b.iter(|| {
            vis.invalidate_all();
            black_box(vis.update_fog(&map, &units))
        })
    });

    c.bench_function("team_can_see_cached", |b| {
        let mut vis = VisibilityEngine::new(MAP_SIZE, &config);
        let probe = GridPos::new(MAP_SIZE / 2, 6);
        b.iter(|| black_box(vis.team_can_see(&map, &units, Team::Player, black_box(probe))))
    });
}

fn bench_pathing(c: &mut Criterion) {
    let (map, units) = setup();
    let config = BattleConfig::default();

    c.bench_function("solve_path_across_map", |b| {
        let mut pather = MapPather::new(MAP_SIZE, &config);
        b.iter(|| {
            black_box(pather.solve_path(
                &map,
                &units,
                None,
                GridPos::new(1, 0),
                GridPos::new(MAP_SIZE - 2, MAP_SIZE - 1),
            ))
        })
    });

    c.bench_function("near_path_full_tu", |b| {
        let mut pather = MapPather::new(MAP_SIZE, &config);
        b.iter(|| black_box(pather.near_path(&map, &units, None, GridPos::new(20, 1), 40.0)))
    });
}

criterion_group!(benches, bench_visibility, bench_pathing);
criterion_main!(benches);
