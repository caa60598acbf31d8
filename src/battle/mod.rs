//! Battle system - turn-based squad tactics on a tile grid
//!
//! Two sides alternate turns, spending time units (TU) on movement and
//! fire. Each tick advances the action stack; whenever a step completes,
//! visibility, targets and reaction fire are re-evaluated in that order.
//!
//! Key pieces:
//! - Fog of war from per-unit ray-walked sight with light attenuation
//! - Reaction fire from the side that is not moving
//! - Interruptible moves: a new sighting stops the walk

pub mod actions;
pub mod ai;
pub mod battle_map;
pub mod constants;
pub mod execution;
pub mod grid;
pub mod pather;
pub mod pathfinding;
pub mod persistence;
pub mod targets;
pub mod units;
pub mod visibility;
pub mod weapons;

// Re-exports for convenient access
pub use actions::{Action, ActionQueue, Struck};
pub use ai::{AiAction, AiContext, AiController, AiDecision, AiProfile, Skirmisher};
pub use battle_map::{BattleMap, DirMask, Door, Storage, Tile, TileContent, FULL_LIGHT};
pub use constants::*;
pub use execution::{
    check_battle_end, BattleEvent, BattleEventLog, BattleEventType, BattleOutcome, BattlePhase,
    BattleState, MoveRequest, Selection, TickResult,
};
pub use grid::{BitGrid, LineWalk, TileRect};
pub use pather::{Graph, Pather, SolveResult, StateCost};
pub use pathfinding::{path_tu_cost, MapPather, PathResult};
pub use persistence::{load, save, SAVE_VERSION};
pub use targets::{TargetEvent, TargetTracker, Targets, Viewer};
pub use units::{Inventory, Stats, Unit, UnitPool, UnitStatus};
pub use visibility::VisibilityEngine;
pub use weapons::{
    DamageDesc, FireMode, FireStats, Item, ModeDef, WeaponDef, WeaponId, WeaponOracle, WeaponTable,
};
