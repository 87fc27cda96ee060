//! One guide's polyline.
//!
//! A [`SegmentSet`] holds the guide-local vertices (root first, at the origin)
//! and the nominal rest distance between consecutive vertices. Uniform
//! repositioning lives here because every resize, blend and ripple path ends
//! with it.

use glam::DVec3;
use groom_config::SolverConfig;
use serde::{Deserialize, Serialize};

use crate::error::{GroomError, GroomResult};
use crate::solver::solve_lengths;
use crate::types::REST_AXIS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSet {
    /// Guide-local vertices. Index 0 is the root and is never moved by styling.
    pub vertices: Vec<DVec3>,
    /// Nominal distance between consecutive vertices.
    pub segment_length: f64,
}

impl SegmentSet {
    /// A straight guide of `count` vertices along the rest axis.
    pub fn straight(count: usize, segment_length: f64) -> GroomResult<Self> {
        check_count(count)?;
        Ok(Self {
            vertices: (0..count)
                .map(|i| REST_AXIS * (segment_length * i as f64))
                .collect(),
            segment_length,
        })
    }

    /// Wrap a polyline, deriving the nominal length from its mean edge.
    pub fn from_vertices(vertices: Vec<DVec3>) -> GroomResult<Self> {
        check_count(vertices.len())?;
        let segment_length = polyline_length(&vertices) / (vertices.len() - 1) as f64;
        Ok(Self {
            vertices,
            segment_length,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn root(&self) -> DVec3 {
        self.vertices[0]
    }

    /// Measured arc length of the polyline.
    pub fn total_length(&self) -> f64 {
        polyline_length(&self.vertices)
    }

    /// Largest `| |edge| - segment_length |` over all edges.
    pub fn max_length_error(&self) -> f64 {
        self.vertices
            .windows(2)
            .map(|edge| (edge[0].distance(edge[1]) - self.segment_length).abs())
            .fold(0.0, f64::max)
    }

    /// Resample to `count` vertices at equal arc length, then restore exact
    /// inextensibility with one solver run.
    ///
    /// Total curve length is preserved and the last vertex is kept before
    /// the solve.
    pub fn uniformly_reposition(&mut self, count: usize, solver: &SolverConfig) -> GroomResult<()> {
        let mut vertices = resample_polyline(&self.vertices, count)?;
        let segment_length = polyline_length(&self.vertices) / (count - 1) as f64;
        solve_lengths(&mut vertices, segment_length, solver)?;
        self.vertices = vertices;
        self.segment_length = segment_length;
        Ok(())
    }

    /// Copy of this set repositioned to `count` vertices.
    pub fn repositioned(&self, count: usize, solver: &SolverConfig) -> GroomResult<Self> {
        let mut set = self.clone();
        set.uniformly_reposition(count, solver)?;
        Ok(set)
    }

    /// `self * (1 - weight) + other * weight`, vertex by vertex.
    ///
    /// `other` is resampled first when the vertex counts differ. The result
    /// is not length-normalised.
    pub fn blended(&self, other: &SegmentSet, weight: f64) -> GroomResult<Self> {
        let other_vertices = if other.vertex_count() == self.vertex_count() {
            other.vertices.clone()
        } else {
            resample_polyline(&other.vertices, self.vertex_count())?
        };
        let vertices = self
            .vertices
            .iter()
            .zip(&other_vertices)
            .map(|(&a, &b)| a * (1.0 - weight) + b * weight)
            .collect();
        Ok(Self {
            vertices,
            segment_length: self.segment_length * (1.0 - weight) + other.segment_length * weight,
        })
    }
}

fn check_count(count: usize) -> GroomResult<()> {
    if count < 2 {
        return Err(GroomError::invalid(format!(
            "a guide needs at least 2 vertices, got {count}"
        )));
    }
    Ok(())
}

/// Sum of edge lengths.
pub fn polyline_length(vertices: &[DVec3]) -> f64 {
    vertices.windows(2).map(|edge| edge[0].distance(edge[1])).sum()
}

/// Walk `vertices` at equal arc-length increments and emit `count` points.
///
/// Positions are linearly interpolated between the bracketing original
/// vertices. The first and last vertex are kept exactly. No solve is run.
pub fn resample_polyline(vertices: &[DVec3], count: usize) -> GroomResult<Vec<DVec3>> {
    check_count(count)?;
    check_count(vertices.len())?;

    let total = polyline_length(vertices);
    if !(total > 0.0) || !total.is_finite() {
        return Err(GroomError::invalid(format!(
            "cannot resample a guide of length {total}"
        )));
    }

    let step = total / (count - 1) as f64;
    let mut resampled = Vec::with_capacity(count);
    resampled.push(vertices[0]);

    let mut edge = 0;
    let mut walked = 0.0;
    for k in 1..count - 1 {
        let target = step * k as f64;
        loop {
            let start = vertices[edge];
            let end = vertices[edge + 1];
            let length = start.distance(end);
            if walked + length >= target || edge + 2 == vertices.len() {
                let t = if length > 0.0 {
                    ((target - walked) / length).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                resampled.push(start.lerp(end, t));
                break;
            }
            walked += length;
            edge += 1;
        }
    }

    resampled.push(vertices[vertices.len() - 1]);
    Ok(resampled)
}
