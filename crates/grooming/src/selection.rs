//! The working set a task edits.
//!
//! A [`SelectedGuide`] is a detached copy of one guide's segments plus the
//! per-vertex bookkeeping brushes, collision detection and the solver share.
//! It refers back to the store by [`GuideId`] only; the store remains the
//! owner of the persistent data.

use std::sync::{Arc, Mutex};

use glam::{DMat4, DVec3};

use crate::brush::FalloffCurve;
use crate::segments::SegmentSet;
use crate::types::{GuideId, REST_AXIS};

/// Per-vertex brush and collision state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentAdditionalInfo {
    /// Inside the brush footprint for the current edit
    pub inside_brush: bool,
    /// Crossed the host surface during the current edit
    pub is_colliding: bool,
    pub selected: bool,
    /// Guide-local closest point on the host surface, valid while colliding
    pub closest_point_on_mesh: DVec3,
    /// Guide-local position before the current edit
    pub original_position: DVec3,
    /// Brush influence in `[0, 1]`
    pub fall_off: f64,
}

impl SegmentAdditionalInfo {
    fn at(position: DVec3) -> Self {
        Self {
            inside_brush: false,
            is_colliding: false,
            selected: false,
            closest_point_on_mesh: DVec3::ZERO,
            original_position: position,
            fall_off: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedGuide {
    pub id: GuideId,
    /// Guide-local to world transform at the current time.
    pub local_to_world: DMat4,
    pub segments: SegmentSet,
    /// One entry per vertex of `segments`.
    pub info: Vec<SegmentAdditionalInfo>,
    /// Guide-local pivot used by the rotate brush.
    pub brush_hit_point: DVec3,
    pub collision_count: usize,
    /// Needs writing back to the store.
    pub dirty: bool,
    /// Needs redrawing.
    pub dirty_redraw: bool,
}

/// Selection shared between the interactive thread and the worker.
///
/// The worker holds the lock for the whole task; the interactive thread
/// polls dirty flags between tasks.
pub type SharedSelection = Arc<Mutex<Vec<SelectedGuide>>>;

impl SelectedGuide {
    pub fn new(id: GuideId, segments: SegmentSet, local_to_world: DMat4) -> Self {
        let info = segments
            .vertices
            .iter()
            .map(|&position| SegmentAdditionalInfo::at(position))
            .collect();
        Self {
            id,
            local_to_world,
            segments,
            info,
            brush_hit_point: DVec3::ZERO,
            collision_count: 0,
            dirty: false,
            dirty_redraw: false,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.segments.vertex_count()
    }

    /// World position of the root.
    pub fn root_world(&self) -> DVec3 {
        self.local_to_world.transform_point3(self.segments.root())
    }

    pub fn to_world_point(&self, local: DVec3) -> DVec3 {
        self.local_to_world.transform_point3(local)
    }

    pub fn to_local_point(&self, world: DVec3) -> DVec3 {
        self.local_to_world.inverse().transform_point3(world)
    }

    pub fn to_local_vector(&self, world: DVec3) -> DVec3 {
        self.local_to_world.inverse().transform_vector3(world)
    }

    /// Rest direction in world space, normalised.
    pub fn world_rest_normal(&self) -> DVec3 {
        self.local_to_world
            .transform_vector3(REST_AXIS)
            .normalize_or_zero()
    }

    /// True for free vertices the current brush acts on.
    pub fn is_affected(&self, vertex: usize) -> bool {
        vertex > 0 && self.info[vertex].inside_brush
    }

    /// Record the pre-edit positions and clear collision state.
    pub fn snapshot_originals(&mut self) {
        for (info, &position) in self.info.iter_mut().zip(&self.segments.vertices) {
            info.original_position = position;
            info.is_colliding = false;
        }
        self.collision_count = 0;
    }

    /// Put every free vertex inside the brush at full strength.
    pub fn select_all_free(&mut self) {
        for (k, info) in self.info.iter_mut().enumerate() {
            info.selected = true;
            info.inside_brush = k > 0;
            info.fall_off = 1.0;
        }
    }

    /// Mark free vertices within `radius` of a world-space brush centre and
    /// weight them with `curve`. The brush centre becomes the rotate pivot.
    pub fn apply_footprint(&mut self, center: DVec3, radius: f64, curve: FalloffCurve) {
        self.brush_hit_point = self.to_local_point(center);
        for k in 0..self.info.len() {
            let distance = self.to_world_point(self.segments.vertices[k]).distance(center);
            let inside = k > 0 && distance <= radius;
            let info = &mut self.info[k];
            info.selected = true;
            info.inside_brush = inside;
            info.fall_off = if inside && radius > 0.0 {
                curve.evaluate(distance / radius)
            } else {
                0.0
            };
        }
    }

    pub fn clear_collisions(&mut self) {
        for info in &mut self.info {
            info.is_colliding = false;
        }
        self.collision_count = 0;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.dirty_redraw = true;
    }
}
