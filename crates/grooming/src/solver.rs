//! Constraint projection for guides.
//!
//! Every free vertex (root excluded) contributes three unknowns. Constraints:
//!
//! - one inextensibility row per edge: `C_i = |p_{i+1} - p_i|^2 - L^2`
//! - one interpenetration row per colliding vertex: `C_j = |p_j - c_j|`,
//!   where `c_j` is the closest point on the host surface
//!
//! Each iteration builds the sparse-in-spirit gradient `J` (each row touches at
//! most two vertices), the unit-weighted pseudo-delta `D = J^T`, solves
//! `(J D) lambda = C` and applies the minimum-norm correction `dx = -D lambda`.
//!
//! A singular system aborts the guide's solve before the correction is
//! applied, so the vertices stay in their last valid state.

use glam::DVec3;
use groom_config::SolverConfig;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

use crate::error::SolverError;
use crate::selection::SelectedGuide;

/// Summary of a finished projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// Iterations that applied a correction.
    pub iterations: u32,
    /// `max(|C|)` at exit.
    pub residual: f64,
    /// Whether `residual` reached the solver tolerance.
    pub converged: bool,
}

/// Vertex pinned to a point on the collision surface.
#[derive(Debug, Clone, Copy)]
struct CollisionTarget {
    vertex: usize,
    point: DVec3,
}

/// Below this the collision constraint is treated as satisfied and dropped,
/// since its gradient is undefined at zero distance.
const COLLISION_CONTACT_EPSILON: f64 = 1e-12;

/// Length-only projection on a bare vertex array.
///
/// Used by re-interpolation and uniform repositioning.
pub fn solve_lengths(
    vertices: &mut [DVec3],
    segment_length: f64,
    config: &SolverConfig,
) -> Result<SolveReport, SolverError> {
    project(vertices, segment_length, &[], config)
}

/// Full projection of a selected guide, honouring its collision flags.
///
/// Whatever the outcome, the guide's collision bookkeeping is reset so stale
/// flags never leak into the next edit.
pub fn solve_guide(
    guide: &mut SelectedGuide,
    config: &SolverConfig,
) -> Result<SolveReport, SolverError> {
    let collisions: Vec<CollisionTarget> = guide
        .info
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, info)| info.is_colliding)
        .map(|(vertex, info)| CollisionTarget {
            vertex,
            point: info.closest_point_on_mesh,
        })
        .collect();

    let segment_length = guide.segments.segment_length;
    let result = project(
        &mut guide.segments.vertices,
        segment_length,
        &collisions,
        config,
    );

    guide.clear_collisions();
    result
}

fn project(
    vertices: &mut [DVec3],
    segment_length: f64,
    collisions: &[CollisionTarget],
    config: &SolverConfig,
) -> Result<SolveReport, SolverError> {
    if vertices.len() < 2 {
        return Err(SolverError::InvalidConfiguration(format!(
            "guide has {} vertices, need at least 2",
            vertices.len()
        )));
    }
    if !(segment_length > 0.0) || !segment_length.is_finite() {
        return Err(SolverError::InvalidConfiguration(format!(
            "segment length must be positive and finite, got {segment_length}"
        )));
    }

    let has_collisions = !collisions.is_empty();
    let max_iterations = if has_collisions {
        config.max_collision_iterations
    } else {
        config.max_iterations
    };

    let mut previous_residual = f64::INFINITY;
    let mut iterations = 0;

    loop {
        let active: Vec<CollisionTarget> = collisions
            .iter()
            .copied()
            .filter(|target| vertices[target.vertex].distance(target.point) > COLLISION_CONTACT_EPSILON)
            .collect();

        let residuals = constraint_values(vertices, segment_length, &active);
        let residual = residuals.amax();
        trace!("solver iteration {iterations}: residual {residual:.3e}");

        if residual <= config.tolerance {
            return Ok(SolveReport {
                iterations,
                residual,
                converged: true,
            });
        }
        // Length and contact rows can conflict; once the error stops moving
        // the contact solve is as good as it gets.
        if has_collisions && (previous_residual - residual).abs() <= config.stabilization_tolerance {
            return Ok(SolveReport {
                iterations,
                residual,
                converged: false,
            });
        }
        if iterations >= max_iterations {
            return Ok(SolveReport {
                iterations,
                residual,
                converged: false,
            });
        }
        previous_residual = residual;

        let gradient = constraint_gradient(vertices, &active);
        let delta = gradient.transpose();
        let system = &gradient * &delta;

        let lambda = system
            .lu()
            .solve(&residuals)
            .filter(|lambda| lambda.iter().all(|value| value.is_finite()))
            .ok_or(SolverError::Singular {
                iteration: iterations,
            })?;

        let correction = -(&delta * lambda);
        for (k, vertex) in vertices.iter_mut().enumerate().skip(1) {
            let column = 3 * (k - 1);
            *vertex += DVec3::new(
                correction[column],
                correction[column + 1],
                correction[column + 2],
            );
        }
        iterations += 1;
    }
}

fn constraint_values(
    vertices: &[DVec3],
    segment_length: f64,
    collisions: &[CollisionTarget],
) -> DVector<f64> {
    let edges = vertices.len() - 1;
    let target = segment_length * segment_length;
    DVector::from_iterator(
        edges + collisions.len(),
        vertices
            .windows(2)
            .map(|edge| (edge[1] - edge[0]).length_squared() - target)
            .chain(
                collisions
                    .iter()
                    .map(|collision| vertices[collision.vertex].distance(collision.point)),
            ),
    )
}

/// Rows: constraints. Columns: `3 * (vertex - 1) + axis` for free vertices.
fn constraint_gradient(vertices: &[DVec3], collisions: &[CollisionTarget]) -> DMatrix<f64> {
    let edges = vertices.len() - 1;
    let mut gradient = DMatrix::zeros(edges + collisions.len(), 3 * edges);

    for i in 0..edges {
        let d = (vertices[i + 1] - vertices[i]) * 2.0;
        write_block(&mut gradient, i, i + 1, d);
        if i > 0 {
            write_block(&mut gradient, i, i, -d);
        }
    }

    for (row, collision) in collisions.iter().enumerate() {
        let offset = vertices[collision.vertex] - collision.point;
        let direction = offset / offset.length();
        write_block(&mut gradient, edges + row, collision.vertex, direction);
    }

    gradient
}

fn write_block(gradient: &mut DMatrix<f64>, row: usize, vertex: usize, value: DVec3) {
    let column = 3 * (vertex - 1);
    gradient[(row, column)] = value.x;
    gradient[(row, column + 1)] = value.y;
    gradient[(row, column + 2)] = value.z;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::SegmentSet;
    use crate::selection::SelectedGuide;
    use crate::types::GuideId;
    use glam::DMat4;

    fn edge_errors(vertices: &[DVec3], length: f64) -> f64 {
        vertices
            .windows(2)
            .map(|edge| (edge[0].distance(edge[1]) - length).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_restores_segment_lengths() {
        let mut vertices = vec![
            DVec3::ZERO,
            DVec3::new(0.0, 0.0, 1.2),
            DVec3::new(0.4, 0.0, 1.9),
            DVec3::new(0.9, 0.3, 2.4),
            DVec3::new(1.0, 0.3, 3.9),
        ];
        let report = solve_lengths(&mut vertices, 1.0, &SolverConfig::default()).unwrap();
        assert!(report.converged);
        assert!(edge_errors(&vertices, 1.0) <= 1e-5);
        assert_eq!(vertices[0], DVec3::ZERO);
    }

    #[test]
    fn test_already_solved_guide_is_untouched() {
        let mut vertices = SegmentSet::straight(4, 0.5).unwrap().vertices;
        let before = vertices.clone();
        let report = solve_lengths(&mut vertices, 0.5, &SolverConfig::default()).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(vertices, before);
    }

    #[test]
    fn test_invalid_inputs() {
        let mut single = vec![DVec3::ZERO];
        assert!(matches!(
            solve_lengths(&mut single, 1.0, &SolverConfig::default()),
            Err(SolverError::InvalidConfiguration(_))
        ));

        let mut pair = vec![DVec3::ZERO, DVec3::Z];
        assert!(matches!(
            solve_lengths(&mut pair, 0.0, &SolverConfig::default()),
            Err(SolverError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_singular_system_leaves_guide_untouched() {
        // Coincident vertices give an all-zero gradient row.
        let mut vertices = vec![DVec3::ZERO, DVec3::Z, DVec3::Z, DVec3::new(0.0, 0.0, 2.0)];
        let before = vertices.clone();
        let result = solve_lengths(&mut vertices, 1.0, &SolverConfig::default());
        assert_eq!(result, Err(SolverError::Singular { iteration: 0 }));
        assert_eq!(vertices, before);
    }

    #[test]
    fn test_collision_pulls_vertex_to_surface() {
        let mut guide = SelectedGuide::new(
            GuideId(0),
            SegmentSet::straight(3, 1.0).unwrap(),
            DMat4::IDENTITY,
        );
        // Pretend the surface is the plane z = 1.5 seen from above: the tip sits
        // below it and must come out to (x, y, 1.5) while lengths stay 1.
        guide.segments.vertices[2] = DVec3::new(0.0, 1.0, 1.0);
        guide.info[2].is_colliding = true;
        guide.info[2].closest_point_on_mesh = DVec3::new(0.0, 0.9, 1.5);
        guide.collision_count = 1;

        solve_guide(&mut guide, &SolverConfig::default()).unwrap();

        assert_eq!(guide.collision_count, 0);
        assert!(guide.info.iter().all(|info| !info.is_colliding));
        assert_eq!(guide.segments.vertices[0], DVec3::ZERO);
        assert!(edge_errors(&guide.segments.vertices, 1.0) < 1e-4);
        assert!(guide.segments.vertices[2].z > 1.0);
    }
}
