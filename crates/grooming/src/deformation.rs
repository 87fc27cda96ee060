//! Per-mode brush algorithms.
//!
//! Each function moves the free, in-brush vertices of a selected guide and
//! marks it dirty. None of them restores segment lengths: the solver run that
//! follows in the pipeline does that.

use glam::{DMat4, DVec3};
use groom_config::BrushConfig;
use tracing::{debug, warn};

use crate::brush::BrushInput;
use crate::segments::{polyline_length, resample_polyline};
use crate::selection::SelectedGuide;
use crate::types::{BrushMode, REST_AXIS};

const ANGLE_EPSILON: f64 = 1e-12;

/// Translate: add the local-frame drag to every in-brush vertex.
pub fn apply_translate(guide: &mut SelectedGuide, input: &BrushInput) {
    let offset = guide.to_local_vector(input.drag);
    for k in 1..guide.vertex_count() {
        if guide.is_affected(k) {
            let weight = input.weight(&guide.info[k]);
            guide.segments.vertices[k] += offset * weight;
        }
    }
    guide.mark_dirty();
}

/// Rotate about the brush hit point.
///
/// The drag is an axis-angle vector. With fall-off the angle is scaled per
/// vertex, so every vertex gets its own rotation.
pub fn apply_rotate(guide: &mut SelectedGuide, input: &BrushInput, config: &BrushConfig) {
    let rotation = guide.to_local_vector(input.drag) * config.rotate_sensitivity;
    let angle = rotation.length();
    if angle > ANGLE_EPSILON {
        let axis = rotation / angle;
        let pivot = guide.brush_hit_point;
        let about_pivot = |angle: f64| {
            DMat4::from_translation(pivot)
                * DMat4::from_axis_angle(axis, angle)
                * DMat4::from_translation(-pivot)
        };
        let uniform = about_pivot(angle);

        for k in 1..guide.vertex_count() {
            if !guide.is_affected(k) {
                continue;
            }
            let p = guide.segments.vertices[k];
            guide.segments.vertices[k] = if input.fall_off_enabled {
                about_pivot(angle * guide.info[k].fall_off).transform_point3(p)
            } else {
                uniform.transform_point3(p)
            };
        }
    }
    guide.mark_dirty();
}

/// Clump: pull every guide toward a shared axis through the mean root.
///
/// A forward drag moves toward the axis, a reverse drag back toward the
/// pre-edit position. Motion per vertex is capped at one segment length.
pub fn apply_clump(guides: &mut [SelectedGuide], input: &BrushInput, config: &BrushConfig) {
    if guides.is_empty() {
        return;
    }
    let count = guides.len() as f64;
    let mean_root = guides.iter().map(|g| g.root_world()).sum::<DVec3>() / count;
    let mean_normal = guides
        .iter()
        .map(|g| g.world_rest_normal())
        .sum::<DVec3>()
        .try_normalize()
        .unwrap_or_else(|| guides[0].world_rest_normal());

    let amount = input.amount(config.hold_rate);
    let towards_axis = input.drag_sign() > 0.0;

    for guide in guides.iter_mut() {
        let length = guide.segments.segment_length;
        for k in 1..guide.vertex_count() {
            if !guide.is_affected(k) {
                continue;
            }
            let target = if towards_axis {
                guide.to_local_point(mean_root + mean_normal * (length * k as f64))
            } else {
                guide.info[k].original_position
            };
            let step = (amount * input.weight(&guide.info[k])).min(length);
            let p = guide.segments.vertices[k];
            let distance = p.distance(target);
            if distance > 0.0 {
                guide.segments.vertices[k] = p + (target - p) * (step.min(distance) / distance);
            }
        }
        guide.mark_dirty();
    }
}

/// Puff: pull vertices toward their rest-axis position.
///
/// The root variant adds a boost that decays quadratically from the root.
pub fn apply_puff(
    guide: &mut SelectedGuide,
    input: &BrushInput,
    config: &BrushConfig,
    root_boost: bool,
) {
    let amount = input.amount(config.hold_rate);
    let length = guide.segments.segment_length;
    let last = (guide.vertex_count() - 1) as f64;

    for k in 1..guide.vertex_count() {
        if !guide.is_affected(k) {
            continue;
        }
        let mut t = amount * input.weight(&guide.info[k]);
        if root_boost {
            let from_root = 1.0 - k as f64 / last;
            t *= 1.0 + config.puff_root_boost * from_root * from_root;
        }
        let target = REST_AXIS * (length * k as f64);
        let p = guide.segments.vertices[k];
        guide.segments.vertices[k] = p.lerp(target, t.clamp(0.0, 1.0));
    }
    guide.mark_dirty();
}

/// Scale: grow or shrink the guide radially from the root.
///
/// A degenerate factor snaps the guide onto the rest axis and keeps the
/// previous segment length, so the guide is straightened rather than erased.
pub fn apply_scale(guide: &mut SelectedGuide, input: &BrushInput) {
    let old_length = guide.segments.segment_length;
    let new_length = old_length * (1.0 + input.drag_sign() * input.drag.length());
    let factor = new_length / old_length;
    let root = guide.segments.root();

    if !factor.is_finite() || factor <= ANGLE_EPSILON {
        debug!("guide {:?}: degenerate scale {factor}, snapping to rest axis", guide.id);
        for (k, vertex) in guide.segments.vertices.iter_mut().enumerate().skip(1) {
            *vertex = root + REST_AXIS * (old_length * k as f64);
        }
    } else {
        for vertex in guide.segments.vertices.iter_mut().skip(1) {
            *vertex = root + (*vertex - root) * factor;
        }
        guide.segments.segment_length = new_length;
    }
    guide.mark_dirty();
}

/// Cut: keep everything below the first in-brush vertex and spread it over
/// the original vertex count.
pub fn apply_cut(guide: &mut SelectedGuide) {
    let count = guide.vertex_count();
    let Some(first) = (1..count).find(|&k| guide.is_affected(k)) else {
        return;
    };
    if first < 2 {
        // Nothing but the root would survive.
        return;
    }

    let kept = &guide.segments.vertices[..first];
    let kept_length = polyline_length(kept);
    let vertices = match resample_polyline(kept, count) {
        Ok(vertices) => vertices,
        Err(err) => {
            warn!("guide {:?}: cut ignored: {err}", guide.id);
            return;
        }
    };

    guide.segments.vertices = vertices;
    guide.segments.segment_length = kept_length / (count - 1) as f64;
    for (info, &position) in guide.info.iter_mut().zip(&guide.segments.vertices) {
        info.original_position = position;
        info.inside_brush = false;
    }
    guide.mark_dirty();
}

/// Dispatch one brush mode over the working set.
pub fn apply_brush(
    mode: BrushMode,
    guides: &mut [SelectedGuide],
    input: &BrushInput,
    config: &BrushConfig,
) {
    match mode {
        BrushMode::Translate => guides.iter_mut().for_each(|g| apply_translate(g, input)),
        BrushMode::Rotate => guides.iter_mut().for_each(|g| apply_rotate(g, input, config)),
        BrushMode::Clump => apply_clump(guides, input, config),
        BrushMode::PuffRoot => guides.iter_mut().for_each(|g| apply_puff(g, input, config, true)),
        BrushMode::PuffEnd => guides.iter_mut().for_each(|g| apply_puff(g, input, config, false)),
        BrushMode::Scale => guides.iter_mut().for_each(|g| apply_scale(g, input)),
        BrushMode::Cut => guides.iter_mut().for_each(apply_cut),
    }
}
