//! Actions and the action stack
//!
//! World space: x and y follow the grid (one tile per unit), z is height.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::battle::weapons::{DamageDesc, FireMode};
use crate::core::types::{GridPos, Millis, UnitId};

/// What a shot struck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Struck {
    Unit(UnitId),
    /// Map geometry on a tile
    World(GridPos),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Walk along `path`. `step` is the index of the waypoint last reached,
    /// `fraction` the distance travelled toward the next one.
    Move {
        unit: UnitId,
        path: Vec<GridPos>,
        step: usize,
        fraction: f32,
    },
    /// Turn to face `target` degrees
    Rotate { unit: UnitId, target: f32 },
    /// Fire one round at a world point
    Shoot {
        unit: UnitId,
        target: Vec3,
        mode: FireMode,
    },
    /// Resolve the damage of a shot that landed
    ApplyHit {
        shooter: UnitId,
        damage: DamageDesc,
        explosive: bool,
        point: Vec3,
        normal: Vec3,
        struck: Option<Struck>,
    },
    Delay { remaining: Millis },
    /// Scroll the camera focus toward `target`
    CameraPan { target: Vec2, speed: f32 },
}

impl Action {
    /// The unit performing this action, if any
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Action::Move { unit, .. } | Action::Rotate { unit, .. } | Action::Shoot { unit, .. } => {
                Some(*unit)
            }
            Action::ApplyHit { shooter, .. } => Some(*shooter),
            Action::Delay { .. } | Action::CameraPan { .. } => None,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Action::Move { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Rotate { .. } => "rotate",
            Action::Shoot { .. } => "shoot",
            Action::ApplyHit { .. } => "apply_hit",
            Action::Delay { .. } => "delay",
            Action::CameraPan { .. } => "camera_pan",
        }
    }
}

/// LIFO stack of actions; only the top is in progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionQueue {
    stack: Vec<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.stack.push(action);
    }

    pub fn pop(&mut self) -> Option<Action> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<&Action> {
        self.stack.last()
    }

    /// Drop every pending action
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.stack.iter()
    }
}
