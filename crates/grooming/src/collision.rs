//! Host surface queries and guide collision detection.
//!
//! The host application owns the surface; the core only asks it for closest
//! points and ray hits in world space and never mutates it.

use glam::DVec3;
use tracing::trace;

use crate::selection::SelectedGuide;

/// World-space queries against the surface guides grow from.
pub trait HostSurface: Send + Sync {
    /// Closest point on the surface to `query`.
    fn closest_point(&self, query: DVec3) -> DVec3;

    /// First hit along a ray within `max_distance`. `direction` is unit length.
    fn any_intersection(&self, origin: DVec3, direction: DVec3, max_distance: f64) -> Option<DVec3>;
}

/// Distance the walk starts above the root, which sits on the surface.
const ROOT_OFFSET: f64 = 1e-6;

/// Distance a ray is advanced past a hit before casting again.
const SKIN: f64 = 1e-7;

/// Upper bound on crossings counted along one segment.
const MAX_CROSSINGS: usize = 64;

/// Walk the guide from the root and flag every vertex that ends up on the
/// far side of the surface.
///
/// Each segment toggles an inside/outside state once per surface crossing.
/// Colliding vertices get the guide-local closest surface point. Returns the
/// number of colliding vertices.
pub fn detect_collisions(guide: &mut SelectedGuide, surface: &dyn HostSurface) -> usize {
    guide.clear_collisions();

    let mut previous = guide.root_world() + guide.world_rest_normal() * ROOT_OFFSET;
    let mut inside = false;

    for k in 1..guide.vertex_count() {
        let current = guide.to_world_point(guide.segments.vertices[k]);
        if count_crossings(surface, previous, current) % 2 == 1 {
            inside = !inside;
        }
        if inside {
            let closest = guide.to_local_point(surface.closest_point(current));
            let info = &mut guide.info[k];
            info.is_colliding = true;
            info.closest_point_on_mesh = closest;
            guide.collision_count += 1;
        }
        previous = current;
    }

    if guide.collision_count > 0 {
        trace!(
            "guide {:?}: {} colliding vertices",
            guide.id, guide.collision_count
        );
    }
    guide.collision_count
}

fn count_crossings(surface: &dyn HostSurface, from: DVec3, to: DVec3) -> usize {
    let length = from.distance(to);
    if length <= 0.0 {
        return 0;
    }
    let direction = (to - from) / length;

    let mut origin = from;
    let mut remaining = length;
    let mut crossings = 0;
    while crossings < MAX_CROSSINGS {
        let Some(hit) = surface.any_intersection(origin, direction, remaining) else {
            break;
        };
        crossings += 1;
        remaining -= origin.distance(hit) + SKIN;
        if remaining <= 0.0 {
            break;
        }
        origin = hit + direction * SKIN;
    }
    crossings
}

/// Infinite plane. Points on the side the normal faces are outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneSurface {
    pub point: DVec3,
    pub normal: DVec3,
}

impl PlaneSurface {
    pub fn new(point: DVec3, normal: DVec3) -> Self {
        Self {
            point,
            normal: normal.normalize(),
        }
    }

    /// Ground plane `z = height`.
    pub fn ground(height: f64) -> Self {
        Self::new(DVec3::new(0.0, 0.0, height), DVec3::Z)
    }
}

impl HostSurface for PlaneSurface {
    fn closest_point(&self, query: DVec3) -> DVec3 {
        query - self.normal * (query - self.point).dot(self.normal)
    }

    fn any_intersection(&self, origin: DVec3, direction: DVec3, max_distance: f64) -> Option<DVec3> {
        let denom = direction.dot(self.normal);
        if denom.abs() < 1e-12 {
            return None;
        }
        let t = (self.point - origin).dot(self.normal) / denom;
        (0.0..=max_distance)
            .contains(&t)
            .then(|| origin + direction * t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereSurface {
    pub center: DVec3,
    pub radius: f64,
}

impl SphereSurface {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl HostSurface for SphereSurface {
    fn closest_point(&self, query: DVec3) -> DVec3 {
        let outward = (query - self.center).try_normalize().unwrap_or(DVec3::Z);
        self.center + outward * self.radius
    }

    fn any_intersection(&self, origin: DVec3, direction: DVec3, max_distance: f64) -> Option<DVec3> {
        let offset = origin - self.center;
        let b = direction.dot(offset);
        let c = offset.length_squared() - self.radius * self.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        [-b - root, -b + root]
            .into_iter()
            .find(|t| (0.0..=max_distance).contains(t))
            .map(|t| origin + direction * t)
    }
}
