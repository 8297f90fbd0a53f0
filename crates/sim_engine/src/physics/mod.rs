//! Physics integration layer
//!
//! Owns the rapier3d simulation and keeps it consistent with the
//! authoritative entity transforms: poses are read before each step and
//! written back afterwards through the external transform store. Raycast
//! and overlap queries go through the engine's own acceleration structures,
//! independent of the octree.

pub mod bridge;
pub mod collision_layers;
pub mod shape;

pub use bridge::{BridgeState, PhysicsBridge, RayHit, StepReport};
pub use collision_layers::{
    CollisionLayer, CollisionLayerMatrix, LayerMask, LayerSpec, LayerTableError,
};
pub use shape::{BodyKind, ShapeDescriptor};

use thiserror::Error;

use crate::entity::Entity;

/// Errors surfaced by the physics bridge
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhysicsError {
    /// The shape descriptor describes degenerate geometry
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// What was wrong with the descriptor
        reason: String,
    },

    /// The entity already has a registered body
    #[error("entity {} already has a registered body", entity.id())]
    DuplicateEntity {
        /// Offending entity
        entity: Entity,
    },

    /// The entity has no registered body
    #[error("entity {} has no registered body", entity.id())]
    NotFound {
        /// Offending entity
        entity: Entity,
    },

    /// The soft body cap was reached; the registration was rejected
    #[error("body capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// Configured body cap
        capacity: usize,
    },

    /// The bridge is degraded after an internal engine fault
    #[error("physics bridge is degraded")]
    Degraded,
}
