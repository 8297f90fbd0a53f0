//! # Sim Engine
//!
//! Spatial partitioning and physics synchronization core for a real-time 3D
//! simulation engine.
//!
//! ## Features
//!
//! - **Octree Spatial Index**: radius, frustum, and nearest-neighbor queries
//!   over hundreds of moving entities
//! - **Physics Bridge**: rapier3d simulation with per-tick transform
//!   synchronization and graceful degradation on engine faults
//! - **Collision Layers**: symmetric 32-layer matrix with per-layer
//!   priorities, mapped onto engine interaction groups
//! - **Query Service**: one-tick result caching and per-agent detection
//!   throttling
//! - **Adaptive LOD**: octree and physics fidelity derived from measured
//!   frame cost
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sim_engine::prelude::*;
//!
//! fn main() {
//!     let config = SimulationConfig::default();
//!     let world = AABB::new(config.world.min, config.world.max);
//!
//!     let index = SpatialIndex::new(world, config.octree.clone());
//!     let mut queries = SpatialQueryService::new(index, &config.query);
//!     let mut bridge = PhysicsBridge::new(&config.physics, CollisionLayerMatrix::default());
//!     let mut store = InMemoryTransformStore::new();
//!
//!     // One tick: step physics, then refresh the index for moved entities
//!     queries.begin_tick();
//!     if let Ok(report) = bridge.step(1.0 / 60.0, &mut store) {
//!         for entity in report.moved {
//!             if let Some(transform) = store.transform(entity) {
//!                 let _ = queries.update(entity, BoundingSphere::new(transform.position, 1.0));
//!             }
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod entity;
pub mod foundation;
pub mod geometry;
pub mod performance;
pub mod physics;
pub mod spatial;

/// Common imports for engine users
pub mod prelude {
    pub use crate::config::{
        Config, ConfigError, OctreeConfig, PhysicsConfig, QueryConfig, SimulationConfig,
        WorldConfig,
    };
    pub use crate::entity::{
        ComponentTag, Entity, FrustumSource, InMemoryTransformStore, TransformStore,
    };
    pub use crate::foundation::{
        math::{Mat4, Quat, Transform, Vec3},
        time::{Stopwatch, Timer},
    };
    pub use crate::geometry::{BoundingSphere, Frustum, Plane, Ray, AABB};
    pub use crate::performance::{
        adaptive_lod, FrameSample, LodProfile, PerformanceMonitor, FRAME_BUDGET_MS,
    };
    pub use crate::physics::{
        BodyKind, BridgeState, CollisionLayer, CollisionLayerMatrix, LayerMask, LayerSpec,
        PhysicsBridge, PhysicsError, RayHit, ShapeDescriptor, StepReport,
    };
    pub use crate::spatial::{
        SpatialBehavior, SpatialError, SpatialIndex, SpatialQueryService, SpatialRecord,
    };
}
