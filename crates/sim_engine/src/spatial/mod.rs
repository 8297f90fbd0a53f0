//! Spatial partitioning and query services
//!
//! Provides the octree-backed [`SpatialIndex`] for proximity, culling, and
//! nearest-neighbor queries, plus the [`SpatialQueryService`] façade that
//! adds per-tick result caching and detection-query throttling.
//!
//! Both types are single-threaded by contract: they must only be touched
//! from the main simulation thread, and provide no internal locking.

mod octree;
mod query;

pub use octree::{SpatialBehavior, SpatialIndex, SpatialRecord};
pub use query::SpatialQueryService;

use thiserror::Error;

use crate::entity::Entity;

/// Errors surfaced by the spatial index and query service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpatialError {
    /// The entity is already present in the index
    #[error("entity {} is already present in the spatial index", entity.id())]
    DuplicateEntity {
        /// Offending entity
        entity: Entity,
    },

    /// The entity is not present in the index
    #[error("entity {} is not present in the spatial index", entity.id())]
    NotFound {
        /// Offending entity
        entity: Entity,
    },

    /// The query parameters are malformed (e.g. a negative radius)
    #[error("invalid spatial query: {reason}")]
    InvalidQuery {
        /// What was wrong with the parameters
        reason: String,
    },
}
