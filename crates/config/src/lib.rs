//! Shared configuration for the grooming core
//!
//! This crate is the single source of truth for the tunable constants used by
//! the constraint solver, guide re-interpolation, temporal ripple, brushes and
//! the undo arena. Every struct has a `Default` matching the values the
//! grooming tools ship with, and the whole tree can be loaded from JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default solver iteration cap when no collision constraints are present
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default safety cap when collision constraints are present
pub const DEFAULT_MAX_COLLISION_ITERATIONS: u32 = 500;

/// Default convergence threshold on `max(|C|)`
pub const DEFAULT_SOLVER_TOLERANCE: f64 = 1e-8;

/// Default threshold for "error stopped changing" between iterations
pub const DEFAULT_STABILIZATION_TOLERANCE: f64 = 1e-5;

/// Default number of old guides blended into a re-interpolated guide
pub const DEFAULT_NEIGHBOR_COUNT: usize = 4;

/// Default per-frame decay of the temporal ripple
pub const DEFAULT_RIPPLE_DECAY: f64 = 0.2;

/// Default undo depth
pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// Default total length of a freshly generated guide
pub const DEFAULT_NOMINAL_GUIDE_LENGTH: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

/// Constraint solver iteration and convergence parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Iteration cap for length-only solves.
    pub max_iterations: u32,
    /// Iteration cap once collision constraints are involved.
    pub max_collision_iterations: u32,
    /// Converged once every constraint residual is below this.
    pub tolerance: f64,
    /// Stop when the residual changes less than this between iterations.
    pub stabilization_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_collision_iterations: DEFAULT_MAX_COLLISION_ITERATIONS,
            tolerance: DEFAULT_SOLVER_TOLERANCE,
            stabilization_tolerance: DEFAULT_STABILIZATION_TOLERANCE,
        }
    }
}

impl SolverConfig {
    /// Tighter settings for offline re-solves (more iterations, no early stop).
    pub fn precise() -> Self {
        Self {
            max_iterations: 400,
            max_collision_iterations: 2000,
            tolerance: 1e-12,
            stabilization_tolerance: 0.0,
        }
    }
}

/// Parameters for re-seeding guides from their nearest old neighbours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Maximum number of old guides blended into one new guide.
    pub neighbor_count: usize,
    /// Below this distance a new root counts as sitting on an old root.
    pub coincident_epsilon: f64,
    /// Total length of a guide initialised along its rest axis.
    pub nominal_guide_length: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            neighbor_count: DEFAULT_NEIGHBOR_COUNT,
            coincident_epsilon: 1e-6,
            nominal_guide_length: DEFAULT_NOMINAL_GUIDE_LENGTH,
        }
    }
}

/// Temporal ripple settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemporalConfig {
    /// Influence lost per unit of time: `f(dt) = 1 - ripple_decay * |dt|`.
    pub ripple_decay: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            ripple_decay: DEFAULT_RIPPLE_DECAY,
        }
    }
}

/// Brush response tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrushConfig {
    /// Step per second applied by time-based brushes while held still.
    pub hold_rate: f64,
    /// Extra pull applied at the root by the puff-root brush.
    pub puff_root_boost: f64,
    /// Radians of rotation per unit of drag.
    pub rotate_sensitivity: f64,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            hold_rate: 0.5,
            puff_root_boost: 2.0,
            rotate_sensitivity: 1.0,
        }
    }
}

/// Undo history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UndoConfig {
    /// Maximum number of retained edits.
    pub depth: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_UNDO_DEPTH,
        }
    }
}

/// Complete configuration for a groomed object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroomConfig {
    pub solver: SolverConfig,
    pub interpolation: InterpolationConfig,
    pub temporal: TemporalConfig,
    pub brush: BrushConfig,
    pub undo: UndoConfig,
}

impl GroomConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpolation.neighbor_count == 0 {
            return Err(ConfigError::Invalid(
                "interpolation.neighbor_count must be at least 1".to_string(),
            ));
        }
        if !(self.interpolation.nominal_guide_length > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "interpolation.nominal_guide_length must be positive, got {}",
                self.interpolation.nominal_guide_length
            )));
        }
        if self.temporal.ripple_decay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "temporal.ripple_decay must not be negative, got {}",
                self.temporal.ripple_decay
            )));
        }
        if self.undo.depth == 0 {
            return Err(ConfigError::Invalid("undo.depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GroomConfig::default();
        assert_eq!(config.solver.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.interpolation.neighbor_count, DEFAULT_NEIGHBOR_COUNT);
        assert_eq!(config.temporal.ripple_decay, DEFAULT_RIPPLE_DECAY);
        assert_eq!(config.undo.depth, DEFAULT_UNDO_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            GroomConfig::from_json_str(r#"{ "temporal": { "ripple_decay": 0.5 } }"#).unwrap();
        assert_eq!(config.temporal.ripple_decay, 0.5);
        assert_eq!(config.solver, SolverConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = GroomConfig::from_json_str(r#"{ "undo": { "depth": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = GroomConfig::from_json_str("not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
