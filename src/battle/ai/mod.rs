//! AI hooks for computer-controlled teams
//!
//! Architecture: Trait + Data hybrid
//! - `AiController` defines the interface for swappable implementations
//! - `AiContext` exposes the simulation's query surfaces (map, units,
//!   targets, visibility, pathing, weapons) for the duration of one call
//! - A controller answers with one `AiAction` per call; the battle state
//!   translates it into action stack pushes

mod skirmisher;

pub use skirmisher::{AiProfile, Skirmisher};

use glam::Vec3;

use crate::battle::battle_map::BattleMap;
use crate::battle::pathfinding::MapPather;
use crate::battle::targets::Targets;
use crate::battle::units::UnitPool;
use crate::battle::visibility::VisibilityEngine;
use crate::battle::weapons::{FireMode, WeaponOracle};
use crate::core::types::{GridPos, UnitId};

/// Read access to the battle for one decision
pub struct AiContext<'a> {
    pub map: &'a BattleMap,
    pub units: &'a UnitPool,
    pub targets: &'a Targets,
    pub visibility: &'a mut VisibilityEngine,
    pub pather: &'a mut MapPather,
    pub weapons: &'a dyn WeaponOracle,
}

/// The single intended action of a unit
#[derive(Debug, Clone, PartialEq)]
pub enum AiAction {
    None,
    /// Walk a path starting at the unit's tile
    Move { path: Vec<GridPos> },
    Shoot { target: Vec3, mode: FireMode },
    /// Indices into the storage on the unit's tile
    PickUp { items: Vec<usize> },
    SwapWeapon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiDecision {
    pub action: AiAction,
    /// The unit has nothing more to do this turn
    pub done: bool,
}

impl AiDecision {
    pub fn act(action: AiAction) -> Self {
        Self {
            action,
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            action: AiAction::None,
            done: true,
        }
    }
}

/// Trait for team AI implementations
pub trait AiController {
    /// Called at the start of each of the team's turns
    fn start_turn(&mut self, _ctx: &mut AiContext) {}

    /// Decide the next action for `unit`
    fn think(&mut self, unit: UnitId, ctx: &mut AiContext) -> AiDecision;
}
