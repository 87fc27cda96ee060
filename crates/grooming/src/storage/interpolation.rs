//! Re-seeding guides after the guide population changes.
//!
//! Every new guide looks up its nearest old roots in its own interpolation
//! group and takes either a copy of a coincident neighbour, an
//! inverse-distance blend of several, or a fresh straight guide when the
//! group had no old guides at all. The same plan is applied to every time
//! sample so animation survives the change.

use std::collections::BTreeMap;

use glam::DVec3;
use groom_config::GroomConfig;
use tracing::{debug, info};

use super::{FrameTime, SegmentsStorage};
use crate::error::{GroomError, GroomResult};
use crate::segments::{SegmentSet, resample_polyline};
use crate::spatial::NearestNeighborForest;
use crate::types::{GuideId, InterpolationGroups, RestPosition};

/// Where a new guide's segments come from.
#[derive(Debug, Clone, PartialEq)]
enum Seed {
    /// No old guide in the group: straight along the rest axis.
    Fresh,
    /// New root sits on an old one.
    Copy(GuideId),
    /// Normalised weights over old guides.
    Blend(Vec<(GuideId, f64)>),
}

/// Inverse-distance weights `((d_max - d_i) / (d_max * d_i))^2`, normalised.
///
/// Falls back to equal weights when every weight vanishes, which happens
/// when all neighbours are equally far away.
fn blend_weights(neighbors: &[(GuideId, f64)]) -> Vec<(GuideId, f64)> {
    let d_max = neighbors.iter().map(|(_, d)| *d).fold(0.0, f64::max);
    let raw: Vec<f64> = neighbors
        .iter()
        .map(|(_, d)| {
            let w = (d_max - d) / (d_max * d);
            w * w
        })
        .collect();
    let sum: f64 = raw.iter().sum();

    if sum > f64::EPSILON && sum.is_finite() {
        neighbors
            .iter()
            .zip(raw)
            .map(|((id, _), w)| (*id, w / sum))
            .collect()
    } else {
        let uniform = 1.0 / neighbors.len() as f64;
        neighbors.iter().map(|(id, _)| (*id, uniform)).collect()
    }
}

fn plan(
    forest: &NearestNeighborForest,
    rest_positions: &[RestPosition],
    groups: &InterpolationGroups,
    config: &GroomConfig,
) -> Vec<Seed> {
    let epsilon = config.interpolation.coincident_epsilon;
    rest_positions
        .iter()
        .enumerate()
        .map(|(index, rest)| {
            let group = groups.group_of(GuideId::from_index(index));
            let neighbors: Vec<(GuideId, f64)> = forest
                .query_k_nearest(rest.position, group, config.interpolation.neighbor_count)
                .into_iter()
                .map(|(id, distance_2)| (id, (distance_2 as f64).sqrt()))
                .collect();

            match neighbors.first() {
                None => Seed::Fresh,
                Some(&(id, distance)) if distance <= epsilon => Seed::Copy(id),
                Some(_) => Seed::Blend(blend_weights(&neighbors)),
            }
        })
        .collect()
}

fn seed_guide(
    seed: &Seed,
    old: &[SegmentSet],
    count: usize,
    config: &GroomConfig,
) -> GroomResult<SegmentSet> {
    let old_guide = |id: GuideId| {
        old.get(id.index())
            .ok_or(GroomError::UnknownGuide(id.index()))
    };

    match seed {
        Seed::Fresh => SegmentSet::straight(
            count,
            config.interpolation.nominal_guide_length / (count - 1) as f64,
        ),
        Seed::Copy(id) => {
            let source = old_guide(*id)?;
            if source.vertex_count() == count {
                Ok(source.clone())
            } else {
                source.repositioned(count, &config.solver)
            }
        }
        Seed::Blend(weights) => {
            let mut vertices = vec![DVec3::ZERO; count];
            for &(id, weight) in weights {
                let resampled = resample_polyline(&old_guide(id)?.vertices, count)?;
                for (sum, vertex) in vertices.iter_mut().zip(resampled) {
                    *sum += vertex * weight;
                }
            }
            let mut blended = SegmentSet::from_vertices(vertices)?;
            blended.uniformly_reposition(count, &config.solver)?;
            Ok(blended)
        }
    }
}

fn seed_frame(
    seeds: &[Seed],
    old: &[SegmentSet],
    groups: &InterpolationGroups,
    config: &GroomConfig,
) -> GroomResult<Vec<SegmentSet>> {
    seeds
        .iter()
        .enumerate()
        .map(|(index, seed)| {
            let count = groups.segment_count_of(GuideId::from_index(index));
            seed_guide(seed, old, count, config)
        })
        .collect()
}

impl SegmentsStorage {
    /// Build a store for a new guide population from an old store and the
    /// forest over the old roots.
    ///
    /// `forest` must be clean. Group ids are shared between the old and new
    /// populations.
    pub fn reinterpolated(
        old: &SegmentsStorage,
        forest: &NearestNeighborForest,
        rest_positions: &[RestPosition],
        groups: &InterpolationGroups,
        config: &GroomConfig,
    ) -> GroomResult<Self> {
        groups.validate(rest_positions.len())?;
        let seeds = plan(forest, rest_positions, groups, config);

        let frames = old
            .frames
            .iter()
            .map(|(&time, segments)| -> GroomResult<(FrameTime, Vec<SegmentSet>)> {
                Ok((time, seed_frame(&seeds, segments, groups, config)?))
            })
            .collect::<GroomResult<BTreeMap<_, _>>>()?;
        let current = seed_frame(&seeds, &old.current, groups, config)?;

        let fresh = seeds.iter().filter(|seed| **seed == Seed::Fresh).count();
        let copied = seeds.iter().filter(|seed| matches!(seed, Seed::Copy(_))).count();
        debug!(
            "re-interpolation plan: {copied} copied, {fresh} fresh, {} blended",
            seeds.len() - copied - fresh
        );
        info!(
            "Re-interpolated {} guides from {} across {} samples",
            rest_positions.len(),
            old.guide_count(),
            frames.len()
        );

        let mut storage = Self::with_current(current, config);
        storage.frames = frames;
        storage.current_time = old.current_time;
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn roots(xs: &[f32]) -> Vec<RestPosition> {
        xs.iter()
            .map(|&x| RestPosition::new(Vec3::new(x, 0.0, 0.0), x, 0.0))
            .collect()
    }

    fn leaning(x: f64) -> SegmentSet {
        SegmentSet::from_vertices(vec![
            DVec3::ZERO,
            DVec3::new(x, 0.0, 1.0),
            DVec3::new(2.0 * x, 0.0, 2.0),
        ])
        .unwrap()
    }

    fn old_store(config: &GroomConfig) -> (SegmentsStorage, NearestNeighborForest) {
        let rest = roots(&[0.0, 1.0]);
        let groups = InterpolationGroups::single(2, 3);
        let mut storage = SegmentsStorage::from_scratch(&rest, &groups, config).unwrap();
        storage.current = vec![leaning(0.5), leaning(-0.5)];
        (storage, NearestNeighborForest::build(&rest, &groups))
    }

    #[test]
    fn test_weights_favour_the_nearest() {
        let weights = blend_weights(&[(GuideId(0), 0.25), (GuideId(1), 0.5), (GuideId(2), 1.0)]);
        assert!((weights.iter().map(|(_, w)| w).sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(weights[0].1 > weights[1].1);
        assert_eq!(weights[2].1, 0.0);

        let equal = blend_weights(&[(GuideId(0), 1.0), (GuideId(1), 1.0)]);
        assert_eq!(equal[0].1, 0.5);
    }

    #[test]
    fn test_coincident_root_copies_neighbor() {
        let config = GroomConfig::default();
        let (old, forest) = old_store(&config);
        let new_rest = roots(&[1.0]);
        let groups = InterpolationGroups::single(1, 3);

        let storage = SegmentsStorage::reinterpolated(&old, &forest, &new_rest, &groups, &config)
            .unwrap();
        assert_eq!(storage.current()[0], leaning(-0.5));
    }

    #[test]
    fn test_midway_root_blends_and_keeps_lengths() {
        let config = GroomConfig::default();
        let (old, forest) = old_store(&config);
        // A quarter of the way from guide 0 to guide 1
        let new_rest = roots(&[0.25]);
        let groups = InterpolationGroups::single(1, 5);

        let storage = SegmentsStorage::reinterpolated(&old, &forest, &new_rest, &groups, &config)
            .unwrap();
        let guide = &storage.current()[0];
        assert_eq!(guide.vertex_count(), 5);
        assert_eq!(guide.root(), DVec3::ZERO);
        assert!(guide.max_length_error() < 1e-5);
        // Weighted toward guide 0, which leans +x
        assert!(guide.vertices[4].x > 0.0);
    }

    #[test]
    fn test_empty_group_starts_fresh() {
        let config = GroomConfig::default();
        let (old, forest) = old_store(&config);
        let new_rest = roots(&[0.0, 5.0]);
        // Group 1 has no old guides
        let groups = InterpolationGroups {
            group_of_guide: vec![0, 1],
            segment_counts: vec![3, 4],
        };

        let storage = SegmentsStorage::reinterpolated(&old, &forest, &new_rest, &groups, &config)
            .unwrap();
        assert_eq!(storage.current()[0], leaning(0.5));
        let fresh = &storage.current()[1];
        assert_eq!(fresh.vertex_count(), 4);
        assert!((fresh.total_length() - config.interpolation.nominal_guide_length).abs() < 1e-12);
    }
}
