//! Typed query façade over the spatial index
//!
//! Adds two cost controls on top of [`SpatialIndex`]: a one-tick result
//! cache keyed by the exact query parameters, and a per-entity throttle for
//! AI detection queries so hundreds of agents don't all pay for a radius
//! query every frame.
//!
//! All mutations of the underlying index go through this service, which
//! lets it drop stale cached results immediately; a removed entity is
//! unreachable from the very next query, cached or not.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::QueryConfig;
use crate::entity::Entity;
use crate::foundation::math::Vec3;
use crate::geometry::{BoundingSphere, Frustum};
use crate::performance::LodProfile;
use crate::physics::collision_layers::LayerMask;
use crate::spatial::{SpatialBehavior, SpatialError, SpatialIndex};

/// Bit-exact cache key for one query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueryKey {
    Radius {
        center: [u32; 3],
        radius: u32,
        mask: u32,
    },
    Frustum {
        planes: [[u32; 4]; 6],
        mask: u32,
    },
    Nearest {
        point: [u32; 3],
        max_distance: u32,
        mask: u32,
    },
}

fn vec_bits(v: Vec3) -> [u32; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

fn frustum_bits(frustum: &Frustum) -> [[u32; 4]; 6] {
    std::array::from_fn(|i| {
        let plane = &frustum.planes[i];
        [
            plane.normal.x.to_bits(),
            plane.normal.y.to_bits(),
            plane.normal.z.to_bits(),
            plane.distance.to_bits(),
        ]
    })
}

struct DetectionState {
    last_run: Instant,
    last_result: Vec<Entity>,
}

/// Query service wrapping the octree with caching and throttling
pub struct SpatialQueryService {
    index: SpatialIndex,
    set_cache: HashMap<QueryKey, Vec<Entity>>,
    nearest_cache: HashMap<QueryKey, Option<Entity>>,
    detection: HashMap<Entity, DetectionState>,
    detection_interval: Duration,
}

impl SpatialQueryService {
    /// Wrap an index with the given service settings
    pub fn new(index: SpatialIndex, config: &QueryConfig) -> Self {
        Self {
            index,
            set_cache: HashMap::new(),
            nearest_cache: HashMap::new(),
            detection: HashMap::new(),
            detection_interval: Duration::from_millis(config.detection_interval_ms),
        }
    }

    /// Read access to the wrapped index
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Start a new tick: bumps the index tick and drops all cached results
    pub fn begin_tick(&mut self) {
        self.index.begin_tick();
        self.set_cache.clear();
        self.nearest_cache.clear();
    }

    /// Apply an adaptive LOD profile to the underlying index
    pub fn apply_lod(&mut self, profile: &LodProfile) {
        self.index.set_split_threshold(profile.split_threshold);
    }

    /// Insert an entity into the index
    pub fn insert(
        &mut self,
        entity: Entity,
        bounds: BoundingSphere,
        layer_mask: LayerMask,
        behavior: SpatialBehavior,
    ) -> Result<(), SpatialError> {
        self.invalidate();
        self.index.insert(entity, bounds, layer_mask, behavior)
    }

    /// Remove an entity from the index
    ///
    /// Also purges the entity from every retained detection result, so no
    /// later query returns it through the throttle path either.
    pub fn remove(&mut self, entity: Entity) -> Result<(), SpatialError> {
        self.invalidate();
        self.detection.remove(&entity);
        for state in self.detection.values_mut() {
            state.last_result.retain(|e| *e != entity);
        }
        self.index.remove(entity)
    }

    /// Update an entity's bounds after it moved
    pub fn update(&mut self, entity: Entity, bounds: BoundingSphere) -> Result<(), SpatialError> {
        self.invalidate();
        self.index.update(entity, bounds)
    }

    /// Cached radius query
    pub fn query_radius(
        &mut self,
        center: Vec3,
        radius: f32,
        mask: LayerMask,
    ) -> Result<Vec<Entity>, SpatialError> {
        let key = QueryKey::Radius {
            center: vec_bits(center),
            radius: radius.to_bits(),
            mask: mask.bits(),
        };
        if let Some(cached) = self.set_cache.get(&key) {
            return Ok(cached.clone());
        }
        let result = self.index.query_radius(center, radius, mask)?;
        self.set_cache.insert(key, result.clone());
        Ok(result)
    }

    /// Cached frustum query
    pub fn query_frustum(&mut self, frustum: &Frustum, mask: LayerMask) -> Vec<Entity> {
        let key = QueryKey::Frustum {
            planes: frustum_bits(frustum),
            mask: mask.bits(),
        };
        if let Some(cached) = self.set_cache.get(&key) {
            return cached.clone();
        }
        let result = self.index.query_frustum(frustum, mask);
        self.set_cache.insert(key, result.clone());
        result
    }

    /// The visible set for render culling, once per frame
    pub fn visible_set(&mut self, frustum: &Frustum, mask: LayerMask) -> Vec<Entity> {
        self.query_frustum(frustum, mask)
    }

    /// Cached nearest-entity query
    pub fn query_nearest(
        &mut self,
        point: Vec3,
        mask: LayerMask,
        max_distance: f32,
    ) -> Result<Option<Entity>, SpatialError> {
        let key = QueryKey::Nearest {
            point: vec_bits(point),
            max_distance: max_distance.to_bits(),
            mask: mask.bits(),
        };
        if let Some(cached) = self.nearest_cache.get(&key) {
            return Ok(*cached);
        }
        let result = self.index.query_nearest(point, mask, max_distance)?;
        self.nearest_cache.insert(key, result);
        Ok(result)
    }

    /// Throttled detection query for one AI agent
    ///
    /// Runs a radius query at most once per configured interval per agent;
    /// a throttled call returns the agent's last computed result.
    pub fn detection_query(
        &mut self,
        agent: Entity,
        center: Vec3,
        radius: f32,
        mask: LayerMask,
    ) -> Result<Vec<Entity>, SpatialError> {
        let now = Instant::now();
        if let Some(state) = self.detection.get(&agent) {
            if now.duration_since(state.last_run) < self.detection_interval {
                return Ok(state.last_result.clone());
            }
        }

        let result = self.index.query_radius(center, radius, mask)?;
        self.detection.insert(
            agent,
            DetectionState {
                last_run: now,
                last_result: result.clone(),
            },
        );
        Ok(result)
    }

    fn invalidate(&mut self) {
        self.set_cache.clear();
        self.nearest_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OctreeConfig;
    use crate::geometry::AABB;

    fn service(detection_interval_ms: u64) -> SpatialQueryService {
        let world = AABB::new(Vec3::new(-50.0, -50.0, -50.0), Vec3::new(50.0, 50.0, 50.0));
        let index = SpatialIndex::new(world, OctreeConfig::default());
        SpatialQueryService::new(
            index,
            &QueryConfig {
                detection_interval_ms,
            },
        )
    }

    fn insert_at(service: &mut SpatialQueryService, id: u32, x: f32) {
        service
            .insert(
                Entity::new(id),
                BoundingSphere::new(Vec3::new(x, 0.0, 0.0), 1.0),
                LayerMask::AGENT,
                SpatialBehavior::Dynamic,
            )
            .expect("insert");
    }

    #[test]
    fn queries_are_repeatable_within_a_tick() {
        let mut service = service(0);
        insert_at(&mut service, 1, 0.0);
        insert_at(&mut service, 2, 3.0);

        service.begin_tick();
        let first = service
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        let second = service
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn mutations_drop_cached_results() {
        let mut service = service(0);
        insert_at(&mut service, 1, 0.0);
        insert_at(&mut service, 2, 3.0);

        service.begin_tick();
        let before = service
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(before.len(), 2);

        service.remove(Entity::new(2)).expect("remove");
        let after = service
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(after, vec![Entity::new(1)]);
    }

    #[test]
    fn detection_queries_are_throttled_per_agent() {
        let mut service = service(60_000);
        insert_at(&mut service, 1, 0.0);
        insert_at(&mut service, 2, 3.0);

        let agent = Entity::new(1);
        let first = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(first.len(), 2);

        // A new entity appears, but the agent is still inside its interval
        insert_at(&mut service, 3, 1.0);
        let throttled = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(throttled, first);

        // Another agent is not throttled by the first one's state
        let other = service
            .detection_query(Entity::new(2), Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(other.len(), 3);
    }

    #[test]
    fn removal_purges_retained_detection_results() {
        let mut service = service(60_000);
        insert_at(&mut service, 1, 0.0);
        insert_at(&mut service, 2, 3.0);

        let agent = Entity::new(1);
        let first = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert!(first.contains(&Entity::new(2)));

        service.remove(Entity::new(2)).expect("remove");
        let throttled = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert!(!throttled.contains(&Entity::new(2)));
    }

    #[test]
    fn zero_interval_always_requeries() {
        let mut service = service(0);
        insert_at(&mut service, 1, 0.0);

        let agent = Entity::new(1);
        let first = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(first.len(), 1);

        insert_at(&mut service, 2, 2.0);
        let fresh = service
            .detection_query(agent, Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn lod_profile_reshapes_future_inserts() {
        let mut service = service(0);
        service.apply_lod(&LodProfile {
            split_threshold: 64,
            simple_physics_radius: 20.0,
        });
        for i in 0..40 {
            insert_at(&mut service, i, i as f32 * 0.1);
        }
        let found = service
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(found.len(), 40);
    }

    #[test]
    fn invalid_queries_pass_errors_through() {
        let mut service = service(0);
        assert!(matches!(
            service.query_radius(Vec3::zeros(), -2.0, LayerMask::ALL),
            Err(SpatialError::InvalidQuery { .. })
        ));
        assert!(matches!(
            service.detection_query(Entity::new(1), Vec3::zeros(), f32::NAN, LayerMask::ALL),
            Err(SpatialError::InvalidQuery { .. })
        ));
    }
}
