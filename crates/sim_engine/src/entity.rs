//! Entity identity and the narrow interfaces to the surrounding engine
//!
//! Entities are opaque ids owned by an external registry; this core never
//! allocates them. The [`TransformStore`] and [`FrustumSource`] traits are
//! the only channels through which the spatial index and the physics bridge
//! observe or mutate the rest of the engine.

use std::collections::HashMap;

use crate::foundation::math::Transform;
use crate::geometry::Frustum;

/// Entity identifier
///
/// Ordered by id so queries can break ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: u32,
}

impl Entity {
    /// Create an entity handle for an id issued by the external registry
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// Get the entity ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Component tags this core can ask the external store about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentTag {
    /// Entity carries a spatial volume and participates in spatial queries
    Spatial,
    /// Entity carries a rigid body registered with the physics bridge
    RigidBody,
}

/// Access to the authoritative transform storage of the entity registry
///
/// The physics bridge reads poses before a step and writes them back after;
/// nothing else in this core mutates transforms.
pub trait TransformStore {
    /// Current transform of an entity, `None` if the entity is unknown
    fn transform(&self, entity: Entity) -> Option<Transform>;

    /// Overwrite an entity's transform
    fn set_transform(&mut self, entity: Entity, transform: Transform);

    /// Whether the entity still exists in the registry
    fn is_alive(&self, entity: Entity) -> bool;

    /// Entities currently carrying the given component tag
    fn entities_with(&self, tag: ComponentTag) -> Vec<Entity>;
}

/// Access to the active camera's view volume
pub trait FrustumSource {
    /// Frustum of the active camera, recomputed for the current frame
    fn active_frustum(&self) -> Frustum;
}

/// Simple in-memory transform store for tests and headless tooling
#[derive(Debug, Default)]
pub struct InMemoryTransformStore {
    transforms: HashMap<Entity, Transform>,
    tags: HashMap<Entity, Vec<ComponentTag>>,
}

impl InMemoryTransformStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity with a transform and its component tags
    pub fn spawn(&mut self, entity: Entity, transform: Transform, tags: &[ComponentTag]) {
        self.transforms.insert(entity, transform);
        self.tags.insert(entity, tags.to_vec());
    }

    /// Remove an entity entirely
    pub fn despawn(&mut self, entity: Entity) {
        self.transforms.remove(&entity);
        self.tags.remove(&entity);
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl TransformStore for InMemoryTransformStore {
    fn transform(&self, entity: Entity) -> Option<Transform> {
        self.transforms.get(&entity).cloned()
    }

    fn set_transform(&mut self, entity: Entity, transform: Transform) {
        self.transforms.insert(entity, transform);
    }

    fn is_alive(&self, entity: Entity) -> bool {
        self.transforms.contains_key(&entity)
    }

    fn entities_with(&self, tag: ComponentTag) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .tags
            .iter()
            .filter(|(_, tags)| tags.contains(&tag))
            .map(|(entity, _)| *entity)
            .collect();
        entities.sort_unstable();
        entities
    }
}
