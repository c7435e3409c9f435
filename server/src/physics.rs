//! Physics query seam consumed by the authoritative simulation.
//!
//! The core never simulates collision response itself; it asks a provider
//! whether a player stands on something and what a forward ray hits. The
//! built-in [`FlatWorld`] answers both against a flat ground plane and
//! sphere-shaped players, which is all the standalone server and the tests
//! need.

use shared::{PlayerState, Vec3, GROUND_Y};

pub trait PhysicsQuery: Send {
    fn is_grounded(&self, state: &PlayerState) -> bool;

    /// Casts a ray and returns the connection identity of the closest
    /// player hit within `max_distance`, if any.
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        candidates: &[(u64, Vec3)],
    ) -> Option<u64>;
}

pub struct FlatWorld {
    pub ground_y: f32,
    pub player_radius: f32,
    /// Vertical slack when deciding whether a player touches the ground.
    pub ground_tolerance: f32,
}

impl Default for FlatWorld {
    fn default() -> Self {
        FlatWorld {
            ground_y: GROUND_Y,
            player_radius: 0.5,
            ground_tolerance: 0.1,
        }
    }
}

impl PhysicsQuery for FlatWorld {
    fn is_grounded(&self, state: &PlayerState) -> bool {
        state.position.y <= self.ground_y + self.ground_tolerance
    }

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        candidates: &[(u64, Vec3)],
    ) -> Option<u64> {
        let dir = direction.normalize();
        if dir.magnitude() == 0.0 {
            return None;
        }

        let mut best: Option<(u64, f32)> = None;
        for (id, center) in candidates {
            let to_center = center.sub(&origin);
            // Closest point on the segment to the sphere center
            let t = to_center.dot(&dir).clamp(0.0, max_distance);
            let closest = origin.add(&dir.scale(t));
            if closest.distance(center) <= self.player_radius
                && best.map_or(true, |(_, best_t)| t < best_t)
            {
                best = Some((*id, t));
            }
        }
        best.map(|(id, _)| id)
    }
}
