//! Physics bridge
//!
//! Owns the rapier3d simulation state and the bidirectional entity-body
//! mapping. `step` is synchronous from the caller's point of view; the
//! engine parallelizes internally across a bridge-owned worker pool.
//!
//! Failure policy: a fault inside the engine never propagates to the
//! caller. The bridge enters a degraded state, logs a critical error, and
//! rebuilds all bodies from the authoritative transforms. While degraded,
//! raycasts miss and overlaps come back empty so rendering, culling, and
//! movement keep running.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use nalgebra::{Isometry3, Translation3};
use rapier3d::prelude::{
    CCDSolver, Collider, ColliderHandle, ColliderSet, DefaultBroadPhase, ImpulseJointSet,
    IntegrationParameters, IslandManager, MultibodyJointSet, NarrowPhase, PhysicsPipeline,
    QueryFilter, QueryPipeline, RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};
use rayon::ThreadPoolBuilder;

use crate::config::PhysicsConfig;
use crate::entity::{Entity, TransformStore};
use crate::foundation::logging::{default_diagnostics, Diagnostics, Severity};
use crate::foundation::math::{Point3, Quat, Vec3};
use crate::foundation::time::Stopwatch;
use crate::geometry::Ray;
use crate::physics::collision_layers::{
    CollisionLayer, CollisionLayerMatrix, LayerMask, LayerSpec, LayerTableError,
};
use crate::physics::shape::{BodyKind, ShapeDescriptor};
use crate::physics::PhysicsError;

/// Consecutive recovery failures after which the bridge stays degraded
const MAX_RECOVERY_FAILURES: u32 = 2;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Simulation is healthy and stepping normally
    Running,
    /// An internal engine fault occurred; queries miss until recovery
    Degraded,
}

/// Result of a successful raycast
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    /// The entity whose body was hit
    pub entity: Entity,
    /// Distance from the ray origin to the hit point
    pub distance: f32,
    /// Hit point in world space
    pub point: Vec3,
    /// Surface normal at the hit point
    pub normal: Vec3,
}

/// Outcome of one `step` call
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Entities whose transform was written back this tick, sorted by id
    pub moved: Vec<Entity>,
    /// Whether this call performed a degraded-state recovery instead of
    /// simulating
    pub recovered: bool,
    /// Wall-clock duration of the engine step in milliseconds
    pub step_millis: f32,
}

/// Everything retained per registered body
///
/// The descriptor fields are kept so a recovery pass can rebuild the engine
/// body from scratch; the last written pose drives the write-back epsilon
/// filter.
struct BodyRecord {
    body: RigidBodyHandle,
    collider: ColliderHandle,
    shape: ShapeDescriptor,
    kind: BodyKind,
    layer: CollisionLayer,
    last_pose: (Vec3, Quat),
}

/// Bridge between the entity world and the rapier3d simulation
pub struct PhysicsBridge {
    gravity: Vec3,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    thread_pool: Option<rayon::ThreadPool>,

    records: HashMap<Entity, BodyRecord>,
    handle_to_entity: HashMap<RigidBodyHandle, Entity>,

    layers: CollisionLayerMatrix,
    layers_dirty: bool,

    state: BridgeState,
    consecutive_recovery_failures: u32,
    fault_fuse: u32,

    max_bodies: usize,
    write_back_epsilon: f32,
    tick: u64,
    diagnostics: Diagnostics,
}

impl PhysicsBridge {
    /// Create a bridge with the given settings and layer table
    pub fn new(config: &PhysicsConfig, layers: CollisionLayerMatrix) -> Self {
        Self::with_diagnostics(config, layers, default_diagnostics())
    }

    /// Create a bridge reporting through the given diagnostics sink
    pub fn with_diagnostics(
        config: &PhysicsConfig,
        layers: CollisionLayerMatrix,
        diagnostics: Diagnostics,
    ) -> Self {
        let thread_count = config.resolved_thread_count();
        let thread_pool = match ThreadPoolBuilder::new().num_threads(thread_count).build() {
            Ok(pool) => Some(pool),
            Err(error) => {
                diagnostics.record(
                    Severity::Warning,
                    "physics.init",
                    &format!("worker pool unavailable ({error}), stepping without parallelism"),
                );
                None
            }
        };

        Self {
            gravity: config.gravity,
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            thread_pool,
            records: HashMap::new(),
            handle_to_entity: HashMap::new(),
            layers,
            layers_dirty: false,
            state: BridgeState::Running,
            consecutive_recovery_failures: 0,
            fault_fuse: 0,
            max_bodies: config.max_bodies,
            write_back_epsilon: config.write_back_epsilon,
            tick: 0,
            diagnostics,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Whether the bridge is in the degraded state
    pub fn is_degraded(&self) -> bool {
        self.state == BridgeState::Degraded
    }

    /// Number of registered bodies
    pub fn body_count(&self) -> usize {
        self.records.len()
    }

    /// Completed simulation ticks
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The collision layer table
    pub fn layers(&self) -> &CollisionLayerMatrix {
        &self.layers
    }

    /// Replace the gravity vector; applies from the next step
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    /// Engine pose of an entity's body, if registered
    pub fn pose(&self, entity: Entity) -> Option<(Vec3, Quat)> {
        let record = self.records.get(&entity)?;
        let body = self.bodies.get(record.body)?;
        Some((*body.translation(), *body.rotation()))
    }

    /// Register a rigid body for an entity
    ///
    /// The initial pose is read from the transform store. Fails with
    /// `InvalidShape` for degenerate geometry and `CapacityExceeded` once
    /// the soft body cap is reached.
    pub fn register_body(
        &mut self,
        entity: Entity,
        shape: ShapeDescriptor,
        kind: BodyKind,
        layer: CollisionLayer,
        store: &dyn TransformStore,
    ) -> Result<(), PhysicsError> {
        if self.state == BridgeState::Degraded {
            self.diagnostics.record(
                Severity::Warning,
                "physics.register",
                &format!("rejected entity {} while degraded", entity.id()),
            );
            return Err(PhysicsError::Degraded);
        }
        if self.records.contains_key(&entity) {
            self.diagnostics.record(
                Severity::Warning,
                "physics.register",
                &format!("duplicate registration of entity {}", entity.id()),
            );
            return Err(PhysicsError::DuplicateEntity { entity });
        }
        if self.records.len() >= self.max_bodies {
            self.diagnostics.record(
                Severity::Warning,
                "physics.register",
                &format!(
                    "rejected entity {}: body cap {} reached",
                    entity.id(),
                    self.max_bodies
                ),
            );
            return Err(PhysicsError::CapacityExceeded {
                capacity: self.max_bodies,
            });
        }
        if let Err(error) = shape.validate() {
            self.diagnostics.record(
                Severity::Warning,
                "physics.register",
                &format!("rejected entity {}: {error}", entity.id()),
            );
            return Err(error);
        }

        let pose = store.transform(entity).unwrap_or_default();
        let position = pose.position;
        let rotation = pose.rotation;

        let builder = match kind {
            BodyKind::Static => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let body = builder
            .position(Isometry3::from_parts(
                Translation3::from(position),
                rotation,
            ))
            .build();
        let body_handle = self.bodies.insert(body);

        let collider = shape
            .collider_builder()
            .collision_groups(self.layers.interaction_groups(layer))
            .build();
        let collider_handle =
            self.colliders
                .insert_with_parent(collider, body_handle, &mut self.bodies);

        // Both maps change together or not at all.
        self.records.insert(
            entity,
            BodyRecord {
                body: body_handle,
                collider: collider_handle,
                shape,
                kind,
                layer,
                last_pose: (position, rotation),
            },
        );
        self.handle_to_entity.insert(body_handle, entity);
        self.query_pipeline.update(&self.colliders);

        self.diagnostics.record(
            Severity::Debug,
            "physics.register",
            &format!("registered {kind:?} body for entity {}", entity.id()),
        );
        Ok(())
    }

    /// Remove an entity's body
    ///
    /// A second call for the same entity reports `NotFound` without
    /// touching engine state.
    pub fn unregister_body(&mut self, entity: Entity) -> Result<(), PhysicsError> {
        let Some(record) = self.records.remove(&entity) else {
            self.diagnostics.record(
                Severity::Warning,
                "physics.unregister",
                &format!("unregister of unknown entity {}", entity.id()),
            );
            return Err(PhysicsError::NotFound { entity });
        };
        self.handle_to_entity.remove(&record.body);
        self.bodies.remove(
            record.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.query_pipeline.update(&self.colliders);
        Ok(())
    }

    /// Remove bodies whose entity no longer exists in the registry
    ///
    /// Returns the number of reclaimed bodies. Cleanup normally happens
    /// through `unregister_body` during entity destruction; this catches
    /// anything that slipped past it.
    pub fn reclaim_orphans(&mut self, store: &dyn TransformStore) -> usize {
        let orphans: Vec<Entity> = self
            .records
            .keys()
            .filter(|entity| !store.is_alive(**entity))
            .copied()
            .collect();
        for entity in &orphans {
            self.diagnostics.record(
                Severity::Info,
                "physics.reclaim",
                &format!("reclaiming orphaned body of entity {}", entity.id()),
            );
            let _ = self.unregister_body(*entity);
        }
        orphans.len()
    }

    /// Enable or disable collision between two layers
    ///
    /// The write is symmetric and applies to every affected collider before
    /// the next step.
    pub fn set_layer_collision(&mut self, a: CollisionLayer, b: CollisionLayer, enabled: bool) {
        self.layers.set(a, b, enabled);
        self.layers_dirty = true;
    }

    /// Whether two layers collide
    pub fn layer_collision(&self, a: CollisionLayer, b: CollisionLayer) -> bool {
        self.layers.get(a, b)
    }

    /// Replace the whole layer table from a startup spec list
    pub fn rebuild_layers(&mut self, specs: &[LayerSpec]) -> Result<(), LayerTableError> {
        self.layers.rebuild(specs)?;
        self.layers_dirty = true;
        Ok(())
    }

    /// Apply an instantaneous impulse to a dynamic body
    pub fn apply_impulse(&mut self, entity: Entity, impulse: Vec3) -> Result<(), PhysicsError> {
        if self.state == BridgeState::Degraded {
            return Err(PhysicsError::Degraded);
        }
        let Some(record) = self.records.get(&entity) else {
            return Err(PhysicsError::NotFound { entity });
        };
        if record.kind != BodyKind::Dynamic {
            self.diagnostics.record(
                Severity::Warning,
                "physics.impulse",
                &format!("ignored impulse on non-dynamic entity {}", entity.id()),
            );
            return Ok(());
        }
        if let Some(body) = self.bodies.get_mut(record.body) {
            body.apply_impulse(impulse, true);
        }
        Ok(())
    }

    /// Advance the simulation by `dt` seconds and write back moved poses
    ///
    /// The only path by which physics mutates outside state: every Dynamic
    /// or Kinematic body whose pose changed beyond the configured epsilon
    /// gets its transform written to the store. While degraded this
    /// attempts recovery instead of simulating.
    pub fn step(
        &mut self,
        dt: f32,
        store: &mut dyn TransformStore,
    ) -> Result<StepReport, PhysicsError> {
        if !dt.is_finite() || dt <= 0.0 {
            self.diagnostics.record(
                Severity::Warning,
                "physics.step",
                &format!("skipped step with invalid dt {dt}"),
            );
            return Ok(StepReport::default());
        }

        if self.state == BridgeState::Degraded {
            if self.consecutive_recovery_failures >= MAX_RECOVERY_FAILURES {
                return Err(PhysicsError::Degraded);
            }
            return if self.attempt_recovery(store) {
                Ok(StepReport {
                    recovered: true,
                    ..StepReport::default()
                })
            } else {
                Err(PhysicsError::Degraded)
            };
        }

        self.refresh_collision_groups();
        self.sync_kinematic_targets(store);
        self.integration_parameters.dt = dt;

        let watch = Stopwatch::start_new();
        let outcome = {
            let gravity = self.gravity;
            let parameters = self.integration_parameters.clone();
            let pool = self.thread_pool.as_ref();
            let fuse = &mut self.fault_fuse;
            let pipeline = &mut self.pipeline;
            let islands = &mut self.island_manager;
            let broad_phase = &mut self.broad_phase;
            let narrow_phase = &mut self.narrow_phase;
            let bodies = &mut self.bodies;
            let colliders = &mut self.colliders;
            let impulse_joints = &mut self.impulse_joints;
            let multibody_joints = &mut self.multibody_joints;
            let ccd_solver = &mut self.ccd_solver;
            let query_pipeline = &mut self.query_pipeline;

            catch_unwind(AssertUnwindSafe(move || {
                if *fuse > 0 {
                    *fuse -= 1;
                    panic!("injected physics engine fault");
                }
                let mut run = move || {
                    pipeline.step(
                        &gravity,
                        &parameters,
                        islands,
                        broad_phase,
                        narrow_phase,
                        bodies,
                        colliders,
                        impulse_joints,
                        multibody_joints,
                        ccd_solver,
                        Some(query_pipeline),
                        &(),
                        &(),
                    );
                };
                match pool {
                    Some(pool) => pool.install(run),
                    None => run(),
                }
            }))
        };

        if outcome.is_err() {
            self.state = BridgeState::Degraded;
            self.diagnostics.record(
                Severity::Critical,
                "physics.step",
                &format!(
                    "internal engine fault at tick {} with {} bodies; entering degraded state",
                    self.tick,
                    self.records.len()
                ),
            );
            return if self.attempt_recovery(store) {
                Ok(StepReport {
                    recovered: true,
                    ..StepReport::default()
                })
            } else {
                Err(PhysicsError::Degraded)
            };
        }

        self.tick += 1;
        let moved = self.write_back(store);
        Ok(StepReport {
            moved,
            recovered: false,
            step_millis: watch.elapsed_millis(),
        })
    }

    /// Cast a ray against the engine's exact collision geometry
    ///
    /// Returns `None` on a miss, for malformed input, and always while
    /// degraded.
    pub fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<RayHit> {
        if self.state == BridgeState::Degraded {
            return None;
        }
        if !max_distance.is_finite() || max_distance <= 0.0 {
            return None;
        }
        let length = direction.magnitude();
        if !length.is_finite() || length <= f32::EPSILON {
            return None;
        }

        let ray = Ray::new(origin, direction);
        let engine_ray = rapier3d::prelude::Ray::new(Point3::from(ray.origin), ray.direction);

        let mask_bits = mask.bits();
        let on_queried_layer = |_handle: ColliderHandle, collider: &Collider| {
            collider.collision_groups().memberships.bits() & mask_bits != 0
        };
        let filter = QueryFilter::default().predicate(&on_queried_layer);

        let (collider_handle, intersection) = self.query_pipeline.cast_ray_and_get_normal(
            &self.bodies,
            &self.colliders,
            &engine_ray,
            max_distance,
            true,
            filter,
        )?;

        let collider = self.colliders.get(collider_handle)?;
        let body_handle = collider.parent()?;
        let entity = *self.handle_to_entity.get(&body_handle)?;
        Some(RayHit {
            entity,
            distance: intersection.time_of_impact,
            point: ray.point_at(intersection.time_of_impact),
            normal: intersection.normal,
        })
    }

    /// All entities whose bodies overlap the given shape at the given pose
    ///
    /// Results are sorted by entity id. Empty while degraded.
    pub fn overlap_shape(
        &self,
        shape: &ShapeDescriptor,
        position: Vec3,
        rotation: Quat,
        mask: LayerMask,
    ) -> Result<Vec<Entity>, PhysicsError> {
        shape.validate()?;
        if self.state == BridgeState::Degraded {
            return Ok(Vec::new());
        }

        let shared = shape.shared_shape();
        let pose = Isometry3::from_parts(Translation3::from(position), rotation);

        let mask_bits = mask.bits();
        let on_queried_layer = |_handle: ColliderHandle, collider: &Collider| {
            collider.collision_groups().memberships.bits() & mask_bits != 0
        };
        let filter = QueryFilter::default().predicate(&on_queried_layer);

        let mut hits = Vec::new();
        self.query_pipeline.intersections_with_shape(
            &self.bodies,
            &self.colliders,
            &pose,
            &*shared,
            filter,
            |handle| {
                let entity = self
                    .colliders
                    .get(handle)
                    .and_then(rapier3d::prelude::Collider::parent)
                    .and_then(|body| self.handle_to_entity.get(&body));
                if let Some(entity) = entity {
                    hits.push(*entity);
                }
                true
            },
        );
        hits.sort_unstable();
        Ok(hits)
    }

    /// Re-apply interaction groups after a layer table change
    fn refresh_collision_groups(&mut self) {
        if !self.layers_dirty {
            return;
        }
        for record in self.records.values() {
            if let Some(collider) = self.colliders.get_mut(record.collider) {
                collider.set_collision_groups(self.layers.interaction_groups(record.layer));
            }
        }
        self.layers_dirty = false;
    }

    /// Push authoritative transforms into kinematic bodies before stepping
    fn sync_kinematic_targets(&mut self, store: &dyn TransformStore) {
        for (entity, record) in &self.records {
            if record.kind != BodyKind::Kinematic {
                continue;
            }
            let Some(transform) = store.transform(*entity) else {
                continue;
            };
            if let Some(body) = self.bodies.get_mut(record.body) {
                body.set_next_kinematic_position(Isometry3::from_parts(
                    Translation3::from(transform.position),
                    transform.rotation,
                ));
            }
        }
    }

    /// Write changed poses back to the store; returns the moved entities
    fn write_back(&mut self, store: &mut dyn TransformStore) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.records.keys().copied().collect();
        entities.sort_unstable();

        let mut moved = Vec::new();
        for entity in entities {
            let Some(record) = self.records.get_mut(&entity) else {
                continue;
            };
            if record.kind == BodyKind::Static {
                continue;
            }
            let Some(body) = self.bodies.get(record.body) else {
                continue;
            };

            let position = *body.translation();
            let rotation = *body.rotation();
            let (last_position, last_rotation) = record.last_pose;
            let changed = (position - last_position).magnitude() > self.write_back_epsilon
                || rotation.angle_to(&last_rotation) > self.write_back_epsilon;
            if !changed {
                continue;
            }

            record.last_pose = (position, rotation);
            let mut transform = store.transform(entity).unwrap_or_default();
            transform.position = position;
            transform.rotation = rotation;
            store.set_transform(entity, transform);
            moved.push(entity);
        }
        moved
    }

    /// One recovery pass: rebuild every engine body from current transforms
    fn attempt_recovery(&mut self, store: &dyn TransformStore) -> bool {
        self.diagnostics.record(
            Severity::Info,
            "physics.recover",
            &format!("rebuilding {} bodies from current transforms", self.records.len()),
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| self.rebuild_world(store)));
        match outcome {
            Ok(()) => {
                self.state = BridgeState::Running;
                self.consecutive_recovery_failures = 0;
                self.diagnostics.record(
                    Severity::Info,
                    "physics.recover",
                    "recovery complete, resuming simulation",
                );
                true
            }
            Err(_) => {
                self.consecutive_recovery_failures += 1;
                let permanent = self.consecutive_recovery_failures >= MAX_RECOVERY_FAILURES;
                self.diagnostics.record(
                    Severity::Critical,
                    "physics.recover",
                    &format!(
                        "recovery attempt {} failed{}",
                        self.consecutive_recovery_failures,
                        if permanent {
                            "; bridge stays degraded"
                        } else {
                            ""
                        }
                    ),
                );
                false
            }
        }
    }

    /// Replace all engine state and re-create every body from its record
    fn rebuild_world(&mut self, store: &dyn TransformStore) {
        if self.fault_fuse > 0 {
            self.fault_fuse -= 1;
            panic!("injected physics engine fault");
        }

        self.pipeline = PhysicsPipeline::new();
        self.island_manager = IslandManager::new();
        self.broad_phase = DefaultBroadPhase::new();
        self.narrow_phase = NarrowPhase::new();
        self.bodies = RigidBodySet::new();
        self.colliders = ColliderSet::new();
        self.impulse_joints = ImpulseJointSet::new();
        self.multibody_joints = MultibodyJointSet::new();
        self.ccd_solver = CCDSolver::new();
        self.query_pipeline = QueryPipeline::new();
        self.handle_to_entity.clear();

        let mut entities: Vec<Entity> = self.records.keys().copied().collect();
        entities.sort_unstable();

        for entity in entities {
            let Some(record) = self.records.get_mut(&entity) else {
                continue;
            };
            let (position, rotation) = store
                .transform(entity)
                .map_or(record.last_pose, |t| (t.position, t.rotation));

            let builder = match record.kind {
                BodyKind::Static => RigidBodyBuilder::fixed(),
                BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
                BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            };
            let body = builder
                .position(Isometry3::from_parts(
                    Translation3::from(position),
                    rotation,
                ))
                .build();
            let body_handle = self.bodies.insert(body);
            let collider = record
                .shape
                .collider_builder()
                .collision_groups(self.layers.interaction_groups(record.layer))
                .build();
            let collider_handle =
                self.colliders
                    .insert_with_parent(collider, body_handle, &mut self.bodies);

            record.body = body_handle;
            record.collider = collider_handle;
            record.last_pose = (position, rotation);
            self.handle_to_entity.insert(body_handle, entity);
        }

        self.query_pipeline.update(&self.colliders);
        self.layers_dirty = false;
    }

    /// Arm the fault injector: the next `count` engine interactions panic
    #[cfg(test)]
    fn inject_fault(&mut self, count: u32) {
        self.fault_fuse = count;
    }
}
