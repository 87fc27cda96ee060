//! Core grooming types.

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{GroomError, GroomResult};

/// Rest direction of every guide in its local frame. Roots sit at the origin.
pub const REST_AXIS: DVec3 = DVec3::Z;

/// Index of a guide within its owning object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuideId(pub u32);

impl GuideId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

/// Type of brush operation carried by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BrushMode {
    /// Move in-brush vertices along the drag
    #[default]
    Translate = 0,
    /// Rotate in-brush vertices about the brush hit point
    Rotate = 1,
    /// Pull guides toward their shared mean axis
    Clump = 2,
    /// Raise guides toward the rest axis, strongest at the root
    PuffRoot = 3,
    /// Raise guides toward the rest axis uniformly
    PuffEnd = 4,
    /// Grow or shrink the whole guide
    Scale = 5,
    /// Trim the guide at the first in-brush vertex
    Cut = 6,
}

impl BrushMode {
    pub const ALL: [BrushMode; 7] = [
        BrushMode::Translate,
        BrushMode::Rotate,
        BrushMode::Clump,
        BrushMode::PuffRoot,
        BrushMode::PuffEnd,
        BrushMode::Scale,
        BrushMode::Cut,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for BrushMode {
    type Error = GroomError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        BrushMode::ALL
            .get(id as usize)
            .copied()
            .ok_or(GroomError::UnknownBrush(id))
    }
}

/// Immutable root position of a guide at rest pose.
///
/// Stored at reduced precision: only the spatial index reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestPosition {
    pub position: Vec3,
    pub u: f32,
    pub v: f32,
}

impl RestPosition {
    pub fn new(position: Vec3, u: f32, v: f32) -> Self {
        Self { position, u, v }
    }
}

/// Partition of guides into interpolation groups.
///
/// Each group has its own segment count and its own spatial index; guides in
/// different groups never interpolate from one another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationGroups {
    /// Group id per guide, indexed by `GuideId`.
    pub group_of_guide: Vec<usize>,
    /// Vertex count per group (root included).
    pub segment_counts: Vec<usize>,
}

impl InterpolationGroups {
    /// Every guide in a single group.
    pub fn single(guide_count: usize, segment_count: usize) -> Self {
        Self {
            group_of_guide: vec![0; guide_count],
            segment_counts: vec![segment_count],
        }
    }

    /// Assign groups by looking up each rest position's surface coordinates.
    pub fn from_uv(
        rest_positions: &[RestPosition],
        lookup: impl Fn(f32, f32) -> usize,
        segment_counts: Vec<usize>,
    ) -> GroomResult<Self> {
        let groups = Self {
            group_of_guide: rest_positions.iter().map(|rest| lookup(rest.u, rest.v)).collect(),
            segment_counts,
        };
        groups.validate(rest_positions.len())?;
        Ok(groups)
    }

    pub fn group_count(&self) -> usize {
        self.segment_counts.len()
    }

    pub fn group_of(&self, guide: GuideId) -> usize {
        self.group_of_guide[guide.index()]
    }

    /// Vertex count every guide of `guide`'s group must have.
    pub fn segment_count_of(&self, guide: GuideId) -> usize {
        self.segment_counts[self.group_of(guide)]
    }

    /// Check shape and counts against a guide population.
    pub fn validate(&self, guide_count: usize) -> GroomResult<()> {
        if self.group_of_guide.len() != guide_count {
            return Err(GroomError::invalid(format!(
                "{} group assignments for {} guides",
                self.group_of_guide.len(),
                guide_count
            )));
        }
        if let Some(&group) = self
            .group_of_guide
            .iter()
            .find(|&&group| group >= self.segment_counts.len())
        {
            return Err(GroomError::invalid(format!(
                "guide assigned to group {group} but only {} groups exist",
                self.segment_counts.len()
            )));
        }
        if let Some(&count) = self.segment_counts.iter().find(|&&count| count < 2) {
            return Err(GroomError::invalid(format!(
                "segment count {count} is below the minimum of 2"
            )));
        }
        Ok(())
    }

    /// Keep only the listed guides, in the given order.
    pub fn filtered(&self, surviving: &[GuideId]) -> Self {
        Self {
            group_of_guide: surviving.iter().map(|&id| self.group_of(id)).collect(),
            segment_counts: self.segment_counts.clone(),
        }
    }
}
