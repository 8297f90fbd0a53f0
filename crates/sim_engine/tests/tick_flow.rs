//! Full tick-loop integration: physics step, transform write-back, spatial
//! index refresh, and consumer queries, in driver order.

use approx::assert_relative_eq;
use sim_engine::prelude::*;

const DT: f32 = 1.0 / 60.0;

struct Harness {
    store: InMemoryTransformStore,
    bridge: PhysicsBridge,
    queries: SpatialQueryService,
}

impl Harness {
    fn new() -> Self {
        let config = SimulationConfig::default()
            .with_world_bounds(Vec3::new(-100.0, -100.0, -100.0), Vec3::new(100.0, 100.0, 100.0))
            .with_thread_count(1);
        config.validate().expect("valid config");

        let world = AABB::new(config.world.min, config.world.max);
        let index = SpatialIndex::new(world, config.octree.clone());
        Self {
            store: InMemoryTransformStore::new(),
            bridge: PhysicsBridge::new(&config.physics, CollisionLayerMatrix::default()),
            queries: SpatialQueryService::new(index, &config.query),
        }
    }

    fn spawn_dynamic(&mut self, id: u32, position: Vec3, radius: f32) -> Entity {
        let entity = Entity::new(id);
        self.store.spawn(
            entity,
            Transform::from_position(position),
            &[ComponentTag::Spatial, ComponentTag::RigidBody],
        );
        self.bridge
            .register_body(
                entity,
                ShapeDescriptor::Sphere { radius },
                BodyKind::Dynamic,
                CollisionLayer::new(0).expect("layer"),
                &self.store,
            )
            .expect("register body");
        self.queries
            .insert(
                entity,
                BoundingSphere::new(position, radius),
                LayerMask::AGENT,
                SpatialBehavior::Dynamic,
            )
            .expect("insert record");
        entity
    }

    fn despawn(&mut self, entity: Entity) {
        self.bridge.unregister_body(entity).expect("unregister");
        self.queries.remove(entity).expect("remove record");
        self.store.despawn(entity);
    }

    /// One driver tick: step first, then refresh the index, then query.
    fn tick(&mut self) -> StepReport {
        self.queries.begin_tick();
        let report = self.bridge.step(DT, &mut self.store).expect("step");
        for entity in &report.moved {
            let transform = self.store.transform(*entity).expect("moved entity transform");
            let radius = self
                .queries
                .index()
                .record(*entity)
                .map_or(1.0, |record| record.bounds.radius);
            self.queries
                .update(*entity, BoundingSphere::new(transform.position, radius))
                .expect("index update");
        }
        report
    }
}

#[test]
fn falling_entity_stays_in_sync_across_ticks() {
    let mut harness = Harness::new();
    let faller = harness.spawn_dynamic(1, Vec3::new(0.0, 40.0, 0.0), 1.0);

    for _ in 0..60 {
        harness.tick();
    }

    // The store transform matches the engine pose
    let stored = harness.store.transform(faller).expect("transform");
    let (engine_position, _) = harness.bridge.pose(faller).expect("pose");
    assert_relative_eq!(stored.position.y, engine_position.y, epsilon = 1e-3);
    assert!(stored.position.y < 40.0 - 2.0);

    // The spatial index reflects the post-step position, not the spawn one
    let found = harness
        .queries
        .query_radius(stored.position, 2.0, LayerMask::ALL)
        .expect("query");
    assert_eq!(found, vec![faller]);
    let stale = harness
        .queries
        .query_radius(Vec3::new(0.0, 40.0, 0.0), 2.0, LayerMask::ALL)
        .expect("query");
    assert!(stale.is_empty());
}

#[test]
fn despawned_entity_is_gone_from_every_surface() {
    let mut harness = Harness::new();
    let keeper = harness.spawn_dynamic(1, Vec3::new(-5.0, 0.0, 0.0), 1.0);
    let doomed = harness.spawn_dynamic(2, Vec3::new(5.0, 0.0, 0.0), 1.0);

    harness.tick();
    harness.despawn(doomed);
    harness.tick();

    let found = harness
        .queries
        .query_radius(Vec3::zeros(), 50.0, LayerMask::ALL)
        .expect("query");
    assert_eq!(found, vec![keeper]);

    let hit = harness
        .bridge
        .raycast(Vec3::new(5.0, 20.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 100.0, LayerMask::ALL);
    assert!(hit.is_none());
    assert_eq!(harness.bridge.body_count(), 1);
}

#[test]
fn culling_and_monitor_consume_the_tick_outputs() {
    let mut harness = Harness::new();
    for i in 0..20 {
        let x = -30.0 + i as f32 * 3.0;
        harness.spawn_dynamic(i, Vec3::new(x, 0.0, -30.0), 1.0);
    }

    let mut monitor = PerformanceMonitor::new(32, 4);
    for _ in 0..8 {
        let report = harness.tick();
        let sample = FrameSample {
            step_millis: report.step_millis,
            entity_count: harness.queries.index().len(),
            write_backs: report.moved.len(),
        };
        if let Some(profile) = monitor.record(sample) {
            assert!(profile.split_threshold >= 8);
            harness.queries.apply_lod(&profile);
        }
    }
    assert_eq!(monitor.sample_count(), 8);

    // Frustum culling over the post-step positions: a camera at the origin
    // looking down -Z sees the whole row
    struct FixedCamera {
        view_projection: Mat4,
    }
    impl FrustumSource for FixedCamera {
        fn active_frustum(&self) -> Frustum {
            Frustum::from_view_projection(&self.view_projection)
        }
    }

    let projection = nalgebra::Perspective3::new(1.0, std::f32::consts::FRAC_PI_2, 0.1, 500.0);
    let camera = FixedCamera {
        view_projection: projection.to_homogeneous(),
    };
    let visible = harness
        .queries
        .visible_set(&camera.active_frustum(), LayerMask::ALL);
    assert_eq!(visible.len(), 20);
}
