//! Brush input and the command boundary.
//!
//! A [`BrushCommand`] is what the interactive layer submits; it is resolved
//! into a [`BrushMode`] plus a [`BrushInput`] the deformation functions read.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::GroomResult;
use crate::selection::SegmentAdditionalInfo;
use crate::types::{BrushMode, GuideId};

/// Falloff curve for brush influence.
///
/// Determines how brush strength decreases from center to edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FalloffCurve {
    /// strength = 1 - distance/radius
    #[default]
    Linear = 0,
    /// Hermite smoothstep
    Smooth = 1,
    /// Quadratic decay
    Sharp = 2,
    /// Full strength within radius
    Constant = 3,
}

impl FalloffCurve {
    /// Strength at a normalized distance (0.0 = center, 1.0 = edge).
    pub fn evaluate(&self, normalized_distance: f64) -> f64 {
        let d = normalized_distance.clamp(0.0, 1.0);
        match self {
            FalloffCurve::Linear => 1.0 - d,
            FalloffCurve::Smooth => {
                let t = 1.0 - d;
                t * t * (3.0 - 2.0 * t)
            }
            FalloffCurve::Sharp => {
                let t = 1.0 - d;
                t * t
            }
            FalloffCurve::Constant => 1.0,
        }
    }
}

/// Per-task brush parameters, resolved from a [`BrushCommand`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushInput {
    /// World-space drag since the previous task
    pub drag: DVec3,
    /// Seconds the brush has been held since the previous task
    pub elapsed_time: f64,
    /// Scale each vertex's effect by its `fall_off`
    pub fall_off_enabled: bool,
}

impl BrushInput {
    pub fn new(drag: DVec3, elapsed_time: f64, fall_off_enabled: bool) -> Self {
        Self {
            drag,
            elapsed_time,
            fall_off_enabled,
        }
    }

    /// Brush influence on one vertex.
    pub fn weight(&self, info: &SegmentAdditionalInfo) -> f64 {
        if self.fall_off_enabled {
            info.fall_off
        } else {
            1.0
        }
    }

    /// Sign of the dominant drag component. A still brush counts as forward.
    pub fn drag_sign(&self) -> f64 {
        let d = self.drag;
        let dominant = if d.x.abs() >= d.y.abs() && d.x.abs() >= d.z.abs() {
            d.x
        } else if d.y.abs() >= d.z.abs() {
            d.y
        } else {
            d.z
        };
        if dominant < 0.0 { -1.0 } else { 1.0 }
    }

    /// Step size for brushes that keep acting while held still.
    pub fn amount(&self, hold_rate: f64) -> f64 {
        self.drag.length().max(self.elapsed_time * hold_rate)
    }
}

/// World-space brush footprint used to pick and weight vertices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrushFootprint {
    pub center: [f32; 3],
    pub radius: f32,
    pub falloff: FalloffCurve,
}

/// An edit request as submitted by the interactive layer.
///
/// Completion is observed by polling the dirty flags of the returned
/// selection, not through a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushCommand {
    pub brush_id: u8,
    pub guide_ids: Vec<GuideId>,
    pub displacement: [f32; 3],
    pub elapsed_time: f32,
    pub fall_off_enabled: bool,
    pub collision_enabled: bool,
    /// Without a footprint every free vertex of the selected guides is
    /// affected at full strength.
    #[serde(default)]
    pub footprint: Option<BrushFootprint>,
}

impl BrushCommand {
    pub fn new(mode: BrushMode, guide_ids: Vec<GuideId>, displacement: [f32; 3]) -> Self {
        Self {
            brush_id: mode.id(),
            guide_ids,
            displacement,
            elapsed_time: 0.0,
            fall_off_enabled: false,
            collision_enabled: false,
            footprint: None,
        }
    }

    pub fn mode(&self) -> GroomResult<BrushMode> {
        BrushMode::try_from(self.brush_id)
    }

    pub fn input(&self) -> BrushInput {
        let [x, y, z] = self.displacement;
        BrushInput::new(
            DVec3::new(x as f64, y as f64, z as f64),
            self.elapsed_time as f64,
            self.fall_off_enabled,
        )
    }
}
