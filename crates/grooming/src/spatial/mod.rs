//! Nearest-neighbour forest over guide roots.
//!
//! One R-tree per interpolation group, so queries never cross group
//! boundaries. Roots are stored at f32 precision and distances are returned
//! squared.

use glam::Vec3;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use tracing::info;

use crate::types::{GuideId, InterpolationGroups, RestPosition};

/// A guide root stored in a group's tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedRoot {
    pub position: [f32; 3],
    pub guide: GuideId,
}

impl RTreeObject for IndexedRoot {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedRoot {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        let dz = self.position[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Per-group spatial index. Rebuilds are explicit: mark it dirty when roots
/// or groups change and rebuild before the next query.
#[derive(Debug, Clone, Default)]
pub struct NearestNeighborForest {
    trees: Vec<RTree<IndexedRoot>>,
    dirty: bool,
}

impl NearestNeighborForest {
    pub fn build(rest_positions: &[RestPosition], groups: &InterpolationGroups) -> Self {
        let mut forest = Self::default();
        forest.rebuild(rest_positions, groups);
        forest
    }

    /// Partition roots by group and bulk-load one tree per group.
    pub fn rebuild(&mut self, rest_positions: &[RestPosition], groups: &InterpolationGroups) {
        let mut buckets: Vec<Vec<IndexedRoot>> = vec![Vec::new(); groups.group_count()];
        for (index, rest) in rest_positions.iter().enumerate() {
            let Some(&group) = groups.group_of_guide.get(index) else {
                continue;
            };
            if let Some(bucket) = buckets.get_mut(group) {
                bucket.push(IndexedRoot {
                    position: rest.position.to_array(),
                    guide: GuideId::from_index(index),
                });
            }
        }

        self.trees = buckets.into_iter().map(RTree::bulk_load).collect();
        self.dirty = false;
        info!(
            "Rebuilt nearest-neighbour forest: {} roots in {} groups",
            rest_positions.len(),
            self.trees.len()
        );
    }

    /// Up to `k` roots of `group` closest to `position`, ascending by squared
    /// distance. Empty for an unknown or empty group.
    ///
    /// Querying a dirty forest is a caller bug; release builds answer from
    /// the last build.
    pub fn query_k_nearest(&self, position: Vec3, group: usize, k: usize) -> Vec<(GuideId, f32)> {
        debug_assert!(!self.dirty, "querying a stale nearest-neighbour forest");
        let Some(tree) = self.trees.get(group) else {
            return Vec::new();
        };
        tree.nearest_neighbor_iter_with_distance_2(&position.to_array())
            .take(k)
            .map(|(root, distance_2)| (root.guide, distance_2))
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.trees.len()
    }

    /// Number of roots indexed across all groups.
    pub fn len(&self) -> usize {
        self.trees.iter().map(RTree::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }
}
