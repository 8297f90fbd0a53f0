//! Octree spatial index
//!
//! Hierarchical 3D partitioning over an arena of nodes. Nodes are addressed
//! by integer id rather than owned pointers, which keeps traversal
//! cache-friendly and makes teardown of pruned subtrees a loop instead of a
//! recursive drop.
//!
//! Subdivision uses tight node bounds: a record lives in the deepest node
//! that fully contains its bounding volume, so records straddling a child
//! boundary stay in the parent. Nodes split when they exceed the configured
//! record count and merge back when a subtree falls below half of it, the
//! hysteresis preventing thrash at the boundary.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::config::OctreeConfig;
use crate::entity::Entity;
use crate::foundation::logging::{default_diagnostics, Diagnostics, Severity};
use crate::foundation::math::Vec3;
use crate::geometry::{BoundingSphere, Frustum, AABB};
use crate::physics::collision_layers::LayerMask;
use crate::spatial::SpatialError;

slotmap::new_key_type! {
    /// Key of a spatial record in the index's record arena
    struct RecordKey;
}

/// How an entity's bounds evolve over time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialBehavior {
    /// Bounds never change after insertion
    Static,
    /// Bounds are updated as the entity moves
    Dynamic,
}

/// Index of a node in the octree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

const ROOT: NodeId = NodeId(0);

/// One entity's entry in the spatial index
///
/// A record is reachable from exactly one octree node at all times.
#[derive(Debug, Clone)]
pub struct SpatialRecord {
    /// The entity this record belongs to
    pub entity: Entity,
    /// Current bounding volume
    pub bounds: BoundingSphere,
    /// Layers the entity belongs to, for query filtering
    pub layer_mask: LayerMask,
    /// Whether the entity's bounds are expected to change
    pub behavior: SpatialBehavior,
    /// Index tick at which the bounds were last written
    pub last_update: u64,
    node: NodeId,
}

#[derive(Debug)]
struct OctreeNode {
    bounds: AABB,
    depth: u32,
    parent: Option<NodeId>,
    children: Option<[NodeId; 8]>,
    records: Vec<RecordKey>,
}

impl OctreeNode {
    fn new(bounds: AABB, depth: u32, parent: Option<NodeId>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            records: Vec::new(),
        }
    }
}

/// Octree-backed spatial index over dynamic entities
///
/// Main-thread only; callers sequence all access. Queries are repeatable:
/// the same call against unchanged contents returns the same entity set.
pub struct SpatialIndex {
    nodes: Vec<OctreeNode>,
    free_nodes: Vec<NodeId>,
    records: SlotMap<RecordKey, SpatialRecord>,
    by_entity: HashMap<Entity, RecordKey>,
    config: OctreeConfig,
    tick: u64,
    diagnostics: Diagnostics,
}

impl SpatialIndex {
    /// Create an index covering the given world bounds
    pub fn new(world_bounds: AABB, config: OctreeConfig) -> Self {
        Self::with_diagnostics(world_bounds, config, default_diagnostics())
    }

    /// Create an index reporting through the given diagnostics sink
    pub fn with_diagnostics(
        world_bounds: AABB,
        config: OctreeConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            nodes: vec![OctreeNode::new(world_bounds, 0, None)],
            free_nodes: Vec::new(),
            records: SlotMap::with_key(),
            by_entity: HashMap::new(),
            config,
            tick: 0,
            diagnostics,
        }
    }

    /// World bounds covered by the root node
    pub fn world_bounds(&self) -> AABB {
        self.node(ROOT).bounds
    }

    /// Number of indexed entities
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no entities
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether an entity is currently indexed
    pub fn contains(&self, entity: Entity) -> bool {
        self.by_entity.contains_key(&entity)
    }

    /// The record for an entity, if indexed
    pub fn record(&self, entity: Entity) -> Option<&SpatialRecord> {
        self.by_entity.get(&entity).map(|&key| &self.records[key])
    }

    /// Current index tick
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the index tick; called once at the start of every frame
    pub fn begin_tick(&mut self) {
        self.tick += 1;
    }

    /// Replace the split threshold, typically from the adaptive LOD profile
    ///
    /// Takes effect on future splits; the existing tree reshapes lazily as
    /// records move.
    pub fn set_split_threshold(&mut self, threshold: usize) {
        self.config.split_threshold = threshold.max(1);
    }

    /// Insert an entity with its bounding volume and layer mask
    ///
    /// Bounds outside the world are clamped to the root node rather than
    /// rejected, so far-flung entities remain queryable.
    pub fn insert(
        &mut self,
        entity: Entity,
        bounds: BoundingSphere,
        layer_mask: LayerMask,
        behavior: SpatialBehavior,
    ) -> Result<(), SpatialError> {
        if self.by_entity.contains_key(&entity) {
            self.diagnostics.record(
                Severity::Warning,
                "spatial.insert",
                &format!("duplicate insert of entity {}", entity.id()),
            );
            return Err(SpatialError::DuplicateEntity { entity });
        }

        let bounds = BoundingSphere::new(bounds.center, bounds.radius.max(0.0));
        if !self.node(ROOT).bounds.contains_aabb(&bounds.aabb()) {
            self.diagnostics.record(
                Severity::Debug,
                "spatial.insert",
                &format!("entity {} bounds outside world, kept at root", entity.id()),
            );
        }

        let tick = self.tick;
        let key = self.records.insert(SpatialRecord {
            entity,
            bounds,
            layer_mask,
            behavior,
            last_update: tick,
            node: ROOT,
        });
        self.by_entity.insert(entity, key);
        self.place(key);
        Ok(())
    }

    /// Remove an entity from the index
    ///
    /// The entity is unreachable from any query as soon as this returns.
    pub fn remove(&mut self, entity: Entity) -> Result<(), SpatialError> {
        let Some(key) = self.by_entity.remove(&entity) else {
            self.diagnostics.record(
                Severity::Warning,
                "spatial.remove",
                &format!("remove of unknown entity {}", entity.id()),
            );
            return Err(SpatialError::NotFound { entity });
        };
        let Some(record) = self.records.remove(key) else {
            return Err(SpatialError::NotFound { entity });
        };

        self.detach(key, record.node);
        self.try_merge_upward(record.node);
        Ok(())
    }

    /// Update an entity's bounding volume after it moved
    ///
    /// Repositions the record only when it no longer fits its node, so the
    /// common small-movement case touches nothing but the record itself.
    pub fn update(&mut self, entity: Entity, new_bounds: BoundingSphere) -> Result<(), SpatialError> {
        let Some(&key) = self.by_entity.get(&entity) else {
            self.diagnostics.record(
                Severity::Warning,
                "spatial.update",
                &format!("update of unknown entity {}", entity.id()),
            );
            return Err(SpatialError::NotFound { entity });
        };

        let new_bounds = BoundingSphere::new(new_bounds.center, new_bounds.radius.max(0.0));
        let tick = self.tick;
        let node_id = {
            let record = &mut self.records[key];
            record.bounds = new_bounds;
            record.last_update = tick;
            record.node
        };

        let aabb = new_bounds.aabb();
        let contains = self.node(node_id).bounds.contains_aabb(&aabb);
        match (contains, self.node(node_id).children) {
            // Still fits a leaf: nothing to move.
            (true, None) => return Ok(()),
            // Still fits a branch and no child can take it: stays put.
            (true, Some(children)) => {
                if !children
                    .iter()
                    .any(|&c| self.node(c).bounds.contains_aabb(&aabb))
                {
                    return Ok(());
                }
            }
            // Out-of-world records always live at the root.
            (false, _) if node_id == ROOT => return Ok(()),
            (false, _) => {}
        }

        self.detach(key, node_id);
        self.place(key);
        self.try_merge_upward(node_id);
        Ok(())
    }

    /// All entities whose bounds intersect the given sphere
    pub fn query_radius(
        &self,
        center: Vec3,
        radius: f32,
        mask: LayerMask,
    ) -> Result<Vec<Entity>, SpatialError> {
        if !radius.is_finite() || radius < 0.0 {
            self.diagnostics.record(
                Severity::Warning,
                "spatial.query_radius",
                &format!("rejected query with radius {radius}"),
            );
            return Err(SpatialError::InvalidQuery {
                reason: format!("radius must be finite and non-negative, got {radius}"),
            });
        }

        let sphere = BoundingSphere::new(center, radius);
        let mut results = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if id != ROOT && !node.bounds.intersects_sphere(&sphere) {
                continue;
            }
            for &key in &node.records {
                let record = &self.records[key];
                if mask.intersects(record.layer_mask) && sphere.intersects(&record.bounds) {
                    results.push(record.entity);
                }
            }
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        Ok(results)
    }

    /// All entities whose bounds touch the given frustum
    ///
    /// Conservative: may include entities just outside the frustum volume,
    /// never misses one inside it.
    pub fn query_frustum(&self, frustum: &Frustum, mask: LayerMask) -> Vec<Entity> {
        let mut results = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if id != ROOT && !frustum.intersects_aabb(&node.bounds) {
                continue;
            }
            for &key in &node.records {
                let record = &self.records[key];
                if mask.intersects(record.layer_mask) && frustum.intersects_sphere(&record.bounds) {
                    results.push(record.entity);
                }
            }
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        results
    }

    /// The entity nearest to a point, within a maximum distance
    ///
    /// Distance is measured to the surface of each record's bounding
    /// sphere. Ties go to the lowest entity id, so repeated queries are
    /// deterministic.
    pub fn query_nearest(
        &self,
        point: Vec3,
        mask: LayerMask,
        max_distance: f32,
    ) -> Result<Option<Entity>, SpatialError> {
        if !max_distance.is_finite() || max_distance < 0.0 {
            self.diagnostics.record(
                Severity::Warning,
                "spatial.query_nearest",
                &format!("rejected query with max distance {max_distance}"),
            );
            return Err(SpatialError::InvalidQuery {
                reason: format!("max distance must be finite and non-negative, got {max_distance}"),
            });
        }

        let mut best: Option<(f32, Entity)> = None;
        self.nearest_in(ROOT, point, mask, max_distance, &mut best);
        Ok(best.map(|(_, entity)| entity))
    }

    fn nearest_in(
        &self,
        id: NodeId,
        point: Vec3,
        mask: LayerMask,
        max_distance: f32,
        best: &mut Option<(f32, Entity)>,
    ) {
        let node = self.node(id);
        // The root also holds clamped out-of-world records, so it is never
        // pruned by its bounds.
        if id != ROOT {
            let lower_bound = node.bounds.distance_squared_to_point(point).sqrt();
            let limit = best.map_or(max_distance, |(d, _)| d.min(max_distance));
            if lower_bound > limit {
                return;
            }
        }

        for &key in &node.records {
            let record = &self.records[key];
            if !mask.intersects(record.layer_mask) {
                continue;
            }
            let distance =
                ((record.bounds.center - point).magnitude() - record.bounds.radius).max(0.0);
            if distance > max_distance {
                continue;
            }
            let better = match best {
                None => true,
                Some((bd, be)) => {
                    distance < *bd || (distance == *bd && record.entity.id() < be.id())
                }
            };
            if better {
                *best = Some((distance, record.entity));
            }
        }

        if let Some(children) = node.children {
            for child in children {
                self.nearest_in(child, point, mask, max_distance, best);
            }
        }
    }

    fn node(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut OctreeNode {
        &mut self.nodes[id.index()]
    }

    fn alloc_node(&mut self, bounds: AABB, depth: u32, parent: NodeId) -> NodeId {
        if let Some(id) = self.free_nodes.pop() {
            self.nodes[id.index()] = OctreeNode::new(bounds, depth, Some(parent));
            id
        } else {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(OctreeNode::new(bounds, depth, Some(parent)));
            id
        }
    }

    /// Attach a record to the deepest node fully containing its bounds
    fn place(&mut self, key: RecordKey) {
        let aabb = self.records[key].bounds.aabb();
        let mut target = ROOT;
        if self.node(ROOT).bounds.contains_aabb(&aabb) {
            loop {
                let Some(children) = self.node(target).children else {
                    break;
                };
                match children
                    .iter()
                    .find(|&&c| self.node(c).bounds.contains_aabb(&aabb))
                {
                    Some(&child) => target = child,
                    None => break,
                }
            }
        }

        self.node_mut(target).records.push(key);
        self.records[key].node = target;
        self.try_split(target);
    }

    fn detach(&mut self, key: RecordKey, node: NodeId) {
        let records = &mut self.node_mut(node).records;
        if let Some(position) = records.iter().position(|&k| k == key) {
            records.swap_remove(position);
        }
    }

    /// Subdivide a leaf that outgrew the split threshold
    fn try_split(&mut self, id: NodeId) {
        let node = self.node(id);
        if node.children.is_some()
            || node.records.len() <= self.config.split_threshold
            || node.depth >= self.config.max_depth
            || node.bounds.extents().x <= self.config.min_node_size
        {
            return;
        }

        let bounds = node.bounds;
        let depth = node.depth;
        let center = bounds.center();
        let quarter = bounds.extents() * 0.5;

        let mut children = [ROOT; 8];
        for (octant, child) in children.iter_mut().enumerate() {
            let x_sign = if octant & 1 != 0 { 1.0 } else { -1.0 };
            let y_sign = if octant & 2 != 0 { 1.0 } else { -1.0 };
            let z_sign = if octant & 4 != 0 { 1.0 } else { -1.0 };

            let child_center = Vec3::new(
                center.x + quarter.x * x_sign,
                center.y + quarter.y * y_sign,
                center.z + quarter.z * z_sign,
            );
            *child = self.alloc_node(
                AABB::from_center_extents(child_center, quarter),
                depth + 1,
                id,
            );
        }
        self.node_mut(id).children = Some(children);

        // Push every record that fully fits a child down one level;
        // straddlers stay with the parent.
        let keys = std::mem::take(&mut self.node_mut(id).records);
        let mut straddlers = Vec::new();
        for key in keys {
            let aabb = self.records[key].bounds.aabb();
            match children
                .iter()
                .find(|&&c| self.node(c).bounds.contains_aabb(&aabb))
            {
                Some(&child) => {
                    self.node_mut(child).records.push(key);
                    self.records[key].node = child;
                }
                None => straddlers.push(key),
            }
        }
        self.node_mut(id).records = straddlers;

        for child in children {
            if !self.node(child).records.is_empty() {
                self.try_split(child);
            }
        }
    }

    /// Collapse under-populated subtrees along the path to the root
    fn try_merge_upward(&mut self, from: NodeId) {
        let mut current = Some(from);
        while let Some(id) = current {
            if self.node(id).children.is_some()
                && self.subtree_record_count(id) < self.config.merge_threshold()
            {
                self.collapse(id);
            }
            current = self.node(id).parent;
        }
    }

    /// Pull every descendant record into `id` and free the subtree
    fn collapse(&mut self, id: NodeId) {
        let Some(children) = self.node_mut(id).children.take() else {
            return;
        };

        let mut gathered = Vec::new();
        let mut stack: Vec<NodeId> = children.to_vec();
        while let Some(child) = stack.pop() {
            if let Some(grandchildren) = self.node_mut(child).children.take() {
                stack.extend(grandchildren);
            }
            gathered.append(&mut self.node_mut(child).records);
            self.free_nodes.push(child);
        }

        for &key in &gathered {
            self.records[key].node = id;
        }
        self.node_mut(id).records.extend(gathered);
    }

    fn subtree_record_count(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            count += node.records.len();
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        count
    }

    #[cfg(test)]
    fn live_node_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    #[cfg(test)]
    fn root_is_leaf(&self) -> bool {
        self.node(ROOT).children.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Perspective3;

    fn world() -> AABB {
        AABB::new(Vec3::new(-50.0, -50.0, -50.0), Vec3::new(50.0, 50.0, 50.0))
    }

    fn index() -> SpatialIndex {
        SpatialIndex::new(world(), OctreeConfig::default())
    }

    fn sphere(x: f32, y: f32, z: f32, r: f32) -> BoundingSphere {
        BoundingSphere::new(Vec3::new(x, y, z), r)
    }

    fn insert_at(index: &mut SpatialIndex, id: u32, x: f32, y: f32, z: f32) {
        index
            .insert(
                Entity::new(id),
                sphere(x, y, z, 1.0),
                LayerMask::ENVIRONMENT,
                SpatialBehavior::Dynamic,
            )
            .expect("insert");
    }

    /// Deterministic pseudo-uniform positions, no external RNG needed
    fn scatter(count: u32, half_extent: f32) -> Vec<Vec3> {
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
            (unit * 2.0 - 1.0) * half_extent
        };
        (0..count)
            .map(|_| Vec3::new(next(), next(), next()))
            .collect()
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut index = index();
        insert_at(&mut index, 1, 0.0, 0.0, 0.0);
        let err = index
            .insert(
                Entity::new(1),
                sphere(5.0, 0.0, 0.0, 1.0),
                LayerMask::ALL,
                SpatialBehavior::Static,
            )
            .expect_err("duplicate");
        assert_eq!(
            err,
            SpatialError::DuplicateEntity {
                entity: Entity::new(1)
            }
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn removed_entity_is_unreachable() {
        let mut index = index();
        insert_at(&mut index, 1, 0.0, 0.0, 0.0);
        insert_at(&mut index, 2, 3.0, 0.0, 0.0);

        index.remove(Entity::new(1)).expect("remove");

        let found = index
            .query_radius(Vec3::zeros(), 10.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(found, vec![Entity::new(2)]);
        assert!(!index.contains(Entity::new(1)));

        let err = index.remove(Entity::new(1)).expect_err("second remove");
        assert_eq!(
            err,
            SpatialError::NotFound {
                entity: Entity::new(1)
            }
        );
    }

    #[test]
    fn dense_cluster_forces_subdivision() {
        let mut index = index();
        for i in 0..32 {
            let offset = i as f32 * 0.4;
            insert_at(&mut index, i, -40.0 + offset, -40.0, -40.0);
        }
        assert!(!index.root_is_leaf());
        assert_eq!(index.len(), 32);

        // Every record stays reachable through the subdivided tree
        let found = index
            .query_radius(Vec3::new(-35.0, -40.0, -40.0), 50.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(found.len(), 32);
    }

    #[test]
    fn sparse_subtrees_merge_back() {
        let mut index = index();
        for i in 0..32 {
            let offset = i as f32 * 0.4;
            insert_at(&mut index, i, -40.0 + offset, -40.0, -40.0);
        }
        let subdivided_nodes = index.live_node_count();
        assert!(subdivided_nodes > 1);

        for i in 0..31 {
            index.remove(Entity::new(i)).expect("remove");
        }

        // One record left: the tree collapses back to the bare root
        assert!(index.root_is_leaf());
        assert_eq!(index.live_node_count(), 1);
        let found = index
            .query_radius(Vec3::new(-40.0, -40.0, -40.0), 30.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(found, vec![Entity::new(31)]);
    }

    #[test]
    fn radius_query_matches_brute_force() {
        let mut index = index();
        let positions = scatter(500, 49.0);
        for (i, position) in positions.iter().enumerate() {
            index
                .insert(
                    Entity::new(i as u32),
                    BoundingSphere::new(*position, 1.0),
                    LayerMask::ENVIRONMENT,
                    SpatialBehavior::Dynamic,
                )
                .expect("insert");
        }

        let center = Vec3::new(5.0, -3.0, 12.0);
        let radius = 20.0;
        let mut expected: Vec<Entity> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| ((*p - center).magnitude()) <= radius + 1.0)
            .map(|(i, _)| Entity::new(i as u32))
            .collect();
        expected.sort_unstable();

        let mut found = index
            .query_radius(center, radius, LayerMask::ALL)
            .expect("query");
        found.sort_unstable();
        assert_eq!(found, expected);
        assert!(!expected.is_empty());
    }

    #[test]
    fn uniform_scatter_query_is_exact() {
        // 1000 unit-radius entities in a 100x100x100 world; a radius-5 query
        // from the center returns exactly the entities within distance 6.
        let mut index = index();
        let positions = scatter(1000, 49.0);
        for (i, position) in positions.iter().enumerate() {
            index
                .insert(
                    Entity::new(i as u32),
                    BoundingSphere::new(*position, 1.0),
                    LayerMask::ALL,
                    SpatialBehavior::Dynamic,
                )
                .expect("insert");
        }

        let mut expected: Vec<Entity> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.magnitude() <= 6.0)
            .map(|(i, _)| Entity::new(i as u32))
            .collect();
        expected.sort_unstable();

        let mut found = index
            .query_radius(Vec3::zeros(), 5.0, LayerMask::ALL)
            .expect("query");
        found.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn layer_mask_filters_queries() {
        let mut index = index();
        index
            .insert(
                Entity::new(1),
                sphere(0.0, 0.0, 0.0, 1.0),
                LayerMask::PLAYER,
                SpatialBehavior::Dynamic,
            )
            .expect("insert");
        index
            .insert(
                Entity::new(2),
                sphere(1.0, 0.0, 0.0, 1.0),
                LayerMask::TRIGGER,
                SpatialBehavior::Static,
            )
            .expect("insert");

        let found = index
            .query_radius(Vec3::zeros(), 10.0, LayerMask::DETECTION)
            .expect("query");
        assert_eq!(found, vec![Entity::new(1)]);
    }

    #[test]
    fn frustum_query_never_drops_contained_entities() {
        let mut index = index();
        // In front of a camera at the origin looking down -Z
        insert_at(&mut index, 1, 0.0, 0.0, -20.0);
        insert_at(&mut index, 2, 4.0, 2.0, -30.0);
        // Behind the camera
        insert_at(&mut index, 3, 0.0, 0.0, 20.0);

        let projection = Perspective3::new(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&projection.to_homogeneous());

        let mut found = index.query_frustum(&frustum, LayerMask::ALL);
        found.sort_unstable();
        assert_eq!(found, vec![Entity::new(1), Entity::new(2)]);
    }

    #[test]
    fn nearest_breaks_ties_by_entity_id() {
        let mut index = index();
        insert_at(&mut index, 9, 10.0, 0.0, 0.0);
        insert_at(&mut index, 4, -10.0, 0.0, 0.0);
        insert_at(&mut index, 7, 30.0, 0.0, 0.0);

        let nearest = index
            .query_nearest(Vec3::zeros(), LayerMask::ALL, 100.0)
            .expect("query");
        assert_eq!(nearest, Some(Entity::new(4)));

        let none = index
            .query_nearest(Vec3::zeros(), LayerMask::ALL, 2.0)
            .expect("query");
        assert_eq!(none, None);
    }

    #[test]
    fn out_of_world_bounds_stay_queryable() {
        let mut index = index();
        insert_at(&mut index, 1, 500.0, 0.0, 0.0);

        let found = index
            .query_radius(Vec3::new(500.0, 0.0, 0.0), 2.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(found, vec![Entity::new(1)]);
    }

    #[test]
    fn update_moves_entity_between_regions() {
        let mut index = index();
        for i in 0..20 {
            insert_at(&mut index, i, -40.0 + i as f32 * 0.3, -40.0, -40.0);
        }
        // Move one record to the far corner of the world
        index
            .update(Entity::new(0), sphere(45.0, 45.0, 45.0, 1.0))
            .expect("update");

        let near_new = index
            .query_radius(Vec3::new(45.0, 45.0, 45.0), 3.0, LayerMask::ALL)
            .expect("query");
        assert_eq!(near_new, vec![Entity::new(0)]);

        let near_old = index
            .query_radius(Vec3::new(-40.0, -40.0, -40.0), 1.5, LayerMask::ALL)
            .expect("query");
        assert!(!near_old.contains(&Entity::new(0)));
    }

    #[test]
    fn update_stamps_the_current_tick() {
        let mut index = index();
        insert_at(&mut index, 1, 0.0, 0.0, 0.0);
        index.begin_tick();
        index.begin_tick();
        index
            .update(Entity::new(1), sphere(1.0, 0.0, 0.0, 1.0))
            .expect("update");

        let record = index.record(Entity::new(1)).expect("record");
        assert_eq!(record.last_update, 2);
        assert_eq!(record.behavior, SpatialBehavior::Dynamic);
    }

    #[test]
    fn raised_split_threshold_keeps_clusters_in_one_node() {
        let mut index = index();
        index.set_split_threshold(64);
        for i in 0..32 {
            insert_at(&mut index, i, -40.0 + i as f32 * 0.4, -40.0, -40.0);
        }
        // Under the coarser profile the cluster never justifies a split
        assert!(index.root_is_leaf());
        assert_eq!(index.len(), 32);
    }

    #[test]
    fn negative_parameters_are_invalid_queries() {
        let mut index = index();
        insert_at(&mut index, 1, 0.0, 0.0, 0.0);

        assert!(matches!(
            index.query_radius(Vec3::zeros(), -1.0, LayerMask::ALL),
            Err(SpatialError::InvalidQuery { .. })
        ));
        assert!(matches!(
            index.query_nearest(Vec3::zeros(), LayerMask::ALL, -0.5),
            Err(SpatialError::InvalidQuery { .. })
        ));
    }
}
