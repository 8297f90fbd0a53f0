//! Geometric primitives and intersection predicates
//!
//! Bounding volumes and the intersection tests shared by the octree, the
//! query service, and the physics bridge. All predicates are conservative
//! where exactness is impossible: they may report an intersection that a
//! finer test would reject, never the reverse.

use crate::foundation::math::{Mat4, Vec3};

/// Axis-Aligned Bounding Box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given half-extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the half-extents of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check if this AABB fully contains another AABB
    pub fn contains_aabb(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Point on or inside this AABB closest to the given point
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        Vec3::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        )
    }

    /// Squared distance from a point to this AABB (zero if inside)
    pub fn distance_squared_to_point(&self, point: Vec3) -> f32 {
        (self.closest_point(point) - point).magnitude_squared()
    }

    /// Check if a sphere intersects this AABB
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.distance_squared_to_point(sphere.center) <= sphere.radius * sphere.radius
    }

    /// Test ray intersection with this AABB using the slab method
    ///
    /// Returns the distance to the entry point if the ray intersects,
    /// `None` otherwise.
    pub fn intersect_ray(&self, ray_origin: Vec3, ray_dir: Vec3) -> Option<f32> {
        let inv = Vec3::new(
            if ray_dir.x == 0.0 { f32::INFINITY } else { 1.0 / ray_dir.x },
            if ray_dir.y == 0.0 { f32::INFINITY } else { 1.0 / ray_dir.y },
            if ray_dir.z == 0.0 { f32::INFINITY } else { 1.0 / ray_dir.z },
        );

        let t1 = (self.min.x - ray_origin.x) * inv.x;
        let t2 = (self.max.x - ray_origin.x) * inv.x;
        let t3 = (self.min.y - ray_origin.y) * inv.y;
        let t4 = (self.max.y - ray_origin.y) * inv.y;
        let t5 = (self.min.z - ray_origin.z) * inv.z;
        let t6 = (self.max.z - ray_origin.z) * inv.z;

        let tmin = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
        let tmax = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

        if tmax >= tmin && tmax >= 0.0 {
            Some(tmin.max(0.0))
        } else {
            None
        }
    }
}

/// A bounding sphere, the bounds representation carried by spatial records
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// The center position of the sphere in world space
    pub center: Vec3,
    /// The radius of the sphere
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a new bounding sphere with the given center and radius
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// The tightest AABB enclosing this sphere
    pub fn aabb(&self) -> AABB {
        let r = Vec3::new(self.radius, self.radius, self.radius);
        AABB::new(self.center - r, self.center + r)
    }

    /// Check if this sphere intersects with another
    pub fn intersects(&self, other: &BoundingSphere) -> bool {
        let distance_squared = (self.center - other.center).magnitude_squared();
        let radius_sum = self.radius + other.radius;
        distance_squared <= radius_sum * radius_sum
    }

    /// Test ray intersection with this sphere
    ///
    /// Returns the distance along the ray if hit, `None` otherwise.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let oc = ray.origin - self.center;
        let b = 2.0 * oc.dot(&ray.direction);
        let c = oc.dot(&oc) - self.radius * self.radius;

        let discriminant = b * b - 4.0 * c;
        if discriminant < 0.0 {
            return None;
        }

        let sqrt_d = discriminant.sqrt();
        let t1 = (-b - sqrt_d) * 0.5;
        let t2 = (-b + sqrt_d) * 0.5;

        if t1 > 0.0 {
            Some(t1)
        } else if t2 > 0.0 {
            Some(t2)
        } else {
            None
        }
    }
}

/// A ray for ray casting queries
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// The origin point of the ray in world space
    pub origin: Vec3,
    /// The direction of the ray (normalized on construction)
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray with the given origin and direction
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Get a point along the ray at distance t
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Plane defined by normal and distance from origin
///
/// Signed distance is `normal · p + distance`; positive is the inside
/// half-space for frustum planes.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Normal vector (normalized on construction)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        let length = normal.magnitude();
        Self {
            normal: normal / length,
            distance: distance / length,
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Frustum for visibility culling
///
/// Transient: derived from the active camera's view-projection matrix and
/// recomputed per query, never stored across ticks.
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Six planes (left, right, bottom, top, near, far), normals pointing inward
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction: each plane is a sum or difference of the
    /// fourth row of the combined matrix with one of the other rows.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let row = |i: usize| {
            (
                Vec3::new(vp[(i, 0)], vp[(i, 1)], vp[(i, 2)]),
                vp[(i, 3)],
            )
        };
        let (r0, d0) = row(0);
        let (r1, d1) = row(1);
        let (r2, d2) = row(2);
        let (r3, d3) = row(3);

        Self {
            planes: [
                Plane::new(r3 + r0, d3 + d0), // left
                Plane::new(r3 - r0, d3 - d0), // right
                Plane::new(r3 + r1, d3 + d1), // bottom
                Plane::new(r3 - r1, d3 - d1), // top
                Plane::new(r3 + r2, d3 + d2), // near
                Plane::new(r3 - r2, d3 - d2), // far
            ],
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    ///
    /// Conservative p-vertex test: may report boxes near the frustum edges
    /// as visible, never rejects a box that is actually inside.
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        for plane in &self.planes {
            // The corner of the AABB furthest along the plane normal
            let mut p = aabb.min;
            if plane.normal.x >= 0.0 {
                p.x = aabb.max.x;
            }
            if plane.normal.y >= 0.0 {
                p.y = aabb.max.y;
            }
            if plane.normal.z >= 0.0 {
                p.z = aabb.max.z;
            }

            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Check if a sphere is inside or intersects the frustum
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }

    /// Check if a sphere is fully inside the frustum
    pub fn contains_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= sphere.radius)
    }
}
