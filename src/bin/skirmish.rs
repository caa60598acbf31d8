//! Headless Skirmish Runner
//!
//! Runs an AI vs AI squad battle on a generated map and prints a JSON
//! summary.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use squad_tactics::battle::{
    persistence, AiProfile, BattleEventType, BattleMap, BattleState, Inventory, Item, Skirmisher,
    Stats, TileContent, WeaponId, WeaponOracle, WeaponTable, MAP_SIZE,
};
use squad_tactics::core::types::Direction;
use squad_tactics::core::{BattleConfig, GridPos, Team};

/// Headless Skirmish Runner - AI vs AI squad battles
#[derive(Parser, Debug)]
#[command(name = "skirmish")]
#[command(about = "Run an AI vs AI squad battle and print a JSON summary")]
struct Args {
    /// Map edge length in tiles
    #[arg(long, default_value_t = 32)]
    map_size: i32,

    /// Units per side
    #[arg(long, default_value_t = 4)]
    squad_size: usize,

    /// Give up after this many team turns (draw)
    #[arg(long, default_value_t = 60)]
    max_turns: u32,

    /// Milliseconds per simulation tick
    #[arg(long, default_value_t = 50)]
    tick_ms: u32,

    /// Random seed for map generation and AIs
    #[arg(long)]
    seed: Option<u64>,

    /// Fight at night using a generated lightmap
    #[arg(long)]
    night: bool,

    /// Battle config (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// AI profile for both sides (TOML)
    #[arg(long)]
    ai_profile: Option<PathBuf>,

    /// Write a save of the final state here
    #[arg(long)]
    save: Option<PathBuf>,
}

/// JSON output structure
#[derive(Serialize)]
struct SkirmishResult {
    outcome: String,
    turns: u32,
    ticks: u64,
    player_alive: usize,
    hostile_alive: usize,
    kills: u32,
    reaction_shots: usize,
    interrupted_moves: usize,
    seed: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("squad_tactics=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> squad_tactics::core::Result<()> {
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut config = match &args.config {
        Some(path) => BattleConfig::load(path)?,
        None => BattleConfig::default(),
    };
    config.rng_seed = seed;
    config.validate()?;

    let profile = match &args.ai_profile {
        Some(path) => AiProfile::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => AiProfile::default(),
    };

    let map_size = args.map_size.clamp(8, MAP_SIZE);
    let map = generate_map(map_size, args.night, &mut rng);
    let weapons = WeaponTable::standard();
    let rifle = weapons.find("rifle");
    let pistol = weapons.find("pistol");

    let mut state = BattleState::new(map, config, Box::new(weapons));
    deploy_squad(&mut state, Team::Player, 1, args.squad_size, rifle, pistol);
    deploy_squad(&mut state, Team::Hostile, map_size - 2, args.squad_size, rifle, pistol);

    state.set_ai(Team::Player, Box::new(Skirmisher::with_seed(profile.clone(), seed)));
    state.set_ai(
        Team::Hostile,
        Box::new(Skirmisher::with_seed(profile, seed.wrapping_add(1))),
    );
    state.start_battle();

    let mut time = 0;
    let mut ticks = 0u64;
    while !state.is_finished() && state.turn() <= args.max_turns {
        time += args.tick_ms;
        ticks += 1;
        state.tick(time, args.tick_ms);
    }

    if let Some(path) = &args.save {
        persistence::save(&state, BufWriter::new(File::create(path)?))?;
    }

    let result = SkirmishResult {
        outcome: format!("{:?}", state.outcome()),
        turns: state.turn(),
        ticks,
        player_alive: state.units().team_alive_count(Team::Player),
        hostile_alive: state.units().team_alive_count(Team::Hostile),
        kills: state.units().iter().map(|u| u.kills).sum(),
        reaction_shots: state.log().count(BattleEventType::ReactionFire),
        interrupted_moves: state.log().count(BattleEventType::MoveInterrupted),
        seed,
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Open ground with scattered crates and a few wall segments
fn generate_map(size: i32, night: bool, rng: &mut ChaCha8Rng) -> BattleMap {
    let mut map = BattleMap::new(size);
    let clear_rows = |y: i32| y <= 2 || y >= size - 3;

    for _ in 0..(size * size / 24) {
        let pos = GridPos::new(rng.gen_range(0..size), rng.gen_range(0..size));
        if !clear_rows(pos.y) {
            map.set_content(pos, Some(TileContent::solid(rng.gen_range(10..40))));
        }
    }
    for _ in 0..(size / 4) {
        let start = GridPos::new(rng.gen_range(0..size), rng.gen_range(3..size - 3));
        let length = rng.gen_range(2..6);
        let dir = if rng.gen_bool(0.5) {
            Direction::East
        } else {
            Direction::North
        };
        let mut pos = start;
        for _ in 0..length {
            if map.in_bounds(pos) && !clear_rows(pos.y) {
                map.add_wall_between(pos, dir.clockwise());
            }
            pos = pos.step(dir);
        }
    }

    if night {
        map.set_day_time(false);
        for y in 0..size {
            for x in 0..size {
                map.set_light(GridPos::new(x, y), rng.gen_range(200..700));
            }
        }
    }
    map
}

/// Line a squad up along row `y`, centered, with a loaded rifle, a spare
/// clip and a pistol
fn deploy_squad(
    state: &mut BattleState,
    team: Team,
    y: i32,
    count: usize,
    rifle: Option<WeaponId>,
    pistol: Option<WeaponId>,
) {
    let size = state.map().size();
    let start = (size - 2 * count as i32) / 2;
    let clip_of = |weapon: Option<WeaponId>| {
        weapon.map_or(0, |w| WeaponOracle::clip_size(state.weapons(), w))
    };
    let (rifle_clip, pistol_clip) = (clip_of(rifle), clip_of(pistol));

    for i in 0..count as i32 {
        let mut inventory = match rifle {
            Some(rifle) => Inventory::armed(rifle, rifle_clip),
            None => Inventory::default(),
        };
        if let Some(rifle) = rifle {
            let _ = inventory.add_item(Item::Clip {
                weapon: rifle,
                rounds: rifle_clip,
            });
        }
        inventory.secondary = pistol;
        inventory.secondary_rounds = pistol_clip;

        let pos = GridPos::new((start + 2 * i).clamp(0, size - 1), y);
        let spawned = state.spawn_unit(team, pos, Stats::default(), inventory);
        if spawned.is_none() {
            tracing::warn!("No free slot for {:?} unit {}", team, i);
        }
    }
}
