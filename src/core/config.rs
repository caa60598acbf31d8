//! Battle configuration with documented constants
//!
//! All magic numbers of the simulation are collected here with explanations
//! of their purpose and how they interact with each other. The config is
//! handed to `BattleState` at construction; nothing reads it globally.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{BattleError, Result};

/// Configuration for the battle simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    // === MOVEMENT ===
    /// Walking speed in tiles per second
    pub move_speed: f32,

    /// Turning speed in degrees per second
    pub rotation_speed: f32,

    /// Time units spent for an orthogonal step
    pub orthogonal_step_tu: f32,

    /// Time units spent for a diagonal step
    ///
    /// Historically 1.41 rather than an exact square root of two. The
    /// travelled distance of a diagonal step in the motion path uses the
    /// same value so interpolation and TU accounting agree.
    pub diagonal_step_tu: f32,

    /// Cost of a diagonal edge in the path graph
    pub diagonal_path_cost: f32,

    /// Maximum nodes the path search may hold before reporting exhaustion
    pub pather_node_capacity: usize,

    // === VISIBILITY ===
    /// Furthest a unit can see, in tiles (Euclidean)
    pub eyesight_range: i32,

    /// Light budget spent per tile under full light
    pub light_cost: f32,

    /// Light budget spent per tile in full dark, for player and civilian eyes
    pub dark_cost_friendly: f32,

    /// Light budget spent per tile in full dark, for hostile eyes
    ///
    /// Higher than the friendly value: hostile units see less far at night.
    pub dark_cost_hostile: f32,

    /// Light budget spent per tile when the tile is obscured by smoke
    pub obscured_cost: f32,

    /// Multiplier on the light cost of a diagonal segment
    pub diagonal_light_factor: f32,

    // === REACTION FIRE ===
    /// Facing alignment is `offset + scale * dot(facing, to_target)`
    pub reaction_facing_offset: f32,

    /// See `reaction_facing_offset`
    pub reaction_facing_scale: f32,

    /// Aim error of a reaction shot is `reaction_error_base - alignment`
    ///
    /// A viewer facing the target shoots with error 1.0; facing away doubles it.
    pub reaction_error_base: f32,

    /// Explosive weapons do not react against targets closer than this (tiles)
    pub explosive_reaction_min_range: i32,

    // === DAMAGE ===
    /// Blast radius of explosive hits, in tiles
    pub explosion_radius: i32,

    /// Minimum smoke duration (turns) left by an explosion
    pub smoke_min_turns: u8,

    /// Random extra smoke duration, exclusive upper bound
    pub smoke_extra_turns: u8,

    // === PRESENTATION PACING ===
    /// Camera pan speed in tiles per second
    pub camera_pan_speed: f32,

    /// Impacts further than this from the camera focus trigger a pan
    pub camera_view_radius: f32,

    // === DETERMINISM ===
    /// Seed for the battle's random number generator
    pub rng_seed: u64,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            move_speed: 4.5,
            rotation_speed: 400.0,
            orthogonal_step_tu: 1.0,
            diagonal_step_tu: 1.41,
            diagonal_path_cost: std::f32::consts::SQRT_2,
            pather_node_capacity: 4096,

            eyesight_range: 13,
            light_cost: 0.12,
            dark_cost_friendly: 0.32,
            dark_cost_hostile: 0.40,
            obscured_cost: 0.50,
            diagonal_light_factor: 1.4,

            reaction_facing_offset: 0.5,
            reaction_facing_scale: 0.5,
            reaction_error_base: 2.0,
            explosive_reaction_min_range: 3,

            explosion_radius: 2,
            smoke_min_turns: 4,
            smoke_extra_turns: 4,

            camera_pan_speed: 64.0 / 3.0,
            camera_view_radius: 8.0,

            rng_seed: 1_098_305,
        }
    }
}

impl BattleConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BattleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file on disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.move_speed <= 0.0 || self.rotation_speed <= 0.0 {
            return Err(BattleError::InvalidConfig(
                "move_speed and rotation_speed must be positive".into(),
            ));
        }

        if self.orthogonal_step_tu <= 0.0 || self.diagonal_step_tu < self.orthogonal_step_tu {
            return Err(BattleError::InvalidConfig(format!(
                "diagonal_step_tu ({}) must be >= orthogonal_step_tu ({}) > 0",
                self.diagonal_step_tu, self.orthogonal_step_tu
            )));
        }

        if self.eyesight_range < 1 {
            return Err(BattleError::InvalidConfig(
                "eyesight_range must be at least 1".into(),
            ));
        }

        // Dark must cost at least as much as light, else night improves sight.
        if self.dark_cost_friendly < self.light_cost || self.dark_cost_hostile < self.light_cost {
            return Err(BattleError::InvalidConfig(format!(
                "dark costs ({}, {}) must be >= light_cost ({})",
                self.dark_cost_friendly, self.dark_cost_hostile, self.light_cost
            )));
        }

        if self.explosion_radius < 0 {
            return Err(BattleError::InvalidConfig(
                "explosion_radius must not be negative".into(),
            ));
        }

        if self.pather_node_capacity < 2 {
            return Err(BattleError::InvalidConfig(
                "pather_node_capacity must hold at least start and goal".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BattleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BattleConfig::from_toml_str("eyesight_range = 9\nrng_seed = 7\n").unwrap();
        assert_eq!(config.eyesight_range, 9);
        assert_eq!(config.rng_seed, 7);
        assert_eq!(config.diagonal_step_tu, 1.41);
    }

    #[test]
    fn test_inverted_light_costs_rejected() {
        let result = BattleConfig::from_toml_str("light_cost = 0.9\n");
        assert!(matches!(result, Err(BattleError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_toml_reports_parse_error() {
        let result = BattleConfig::from_toml_str("eyesight_range = \"far\"");
        assert!(matches!(result, Err(BattleError::ConfigParse(_))));
    }
}
