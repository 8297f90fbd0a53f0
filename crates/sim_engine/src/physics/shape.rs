//! Body shape and kind descriptors
//!
//! The shape set is closed and small, so shapes are a tagged enum rather
//! than a trait hierarchy. Descriptors are retained by the bridge after
//! registration; a degraded-state recovery rebuilds every engine body from
//! them.

use rapier3d::prelude::{ColliderBuilder, SharedShape};
use serde::{Deserialize, Serialize};

use crate::foundation::math::{Point3, Vec3};
use crate::physics::PhysicsError;

/// Simulation behavior of a registered body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Never moves; other bodies collide against it
    Static,
    /// Driven by gameplay through the transform store, pushes dynamic bodies
    Kinematic,
    /// Fully simulated by the engine
    Dynamic,
}

/// Collision geometry of a registered body, in body-local space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShapeDescriptor {
    /// Sphere centered on the body origin
    Sphere {
        /// Sphere radius
        radius: f32,
    },
    /// Axis-aligned box centered on the body origin
    Box {
        /// Half-extent along each local axis
        half_extents: Vec3,
    },
    /// Capsule aligned with the local Y axis
    Capsule {
        /// Half the distance between the two cap centers
        half_height: f32,
        /// Cap radius
        radius: f32,
    },
}

impl ShapeDescriptor {
    /// Reject degenerate geometry: non-finite or non-positive dimensions
    pub fn validate(&self) -> Result<(), PhysicsError> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        let ok = match self {
            Self::Sphere { radius } => valid(*radius),
            Self::Box { half_extents } => {
                valid(half_extents.x) && valid(half_extents.y) && valid(half_extents.z)
            }
            Self::Capsule {
                half_height,
                radius,
            } => valid(*half_height) && valid(*radius),
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidShape {
                reason: format!("{self:?}"),
            })
        }
    }

    /// Radius of the smallest origin-centered sphere enclosing the shape
    pub fn bounding_radius(&self) -> f32 {
        match self {
            Self::Sphere { radius } => *radius,
            Self::Box { half_extents } => half_extents.magnitude(),
            Self::Capsule {
                half_height,
                radius,
            } => half_height + radius,
        }
    }

    /// Engine collider builder for this shape
    pub fn collider_builder(&self) -> ColliderBuilder {
        match self {
            Self::Sphere { radius } => ColliderBuilder::ball(*radius),
            Self::Box { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            Self::Capsule {
                half_height,
                radius,
            } => ColliderBuilder::capsule_y(*half_height, *radius),
        }
    }

    /// Standalone engine shape, for overlap queries
    pub fn shared_shape(&self) -> SharedShape {
        match self {
            Self::Sphere { radius } => SharedShape::ball(*radius),
            Self::Box { half_extents } => {
                SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            Self::Capsule {
                half_height,
                radius,
            } => SharedShape::capsule(
                Point3::new(0.0, -half_height, 0.0),
                Point3::new(0.0, *half_height, 0.0),
                *radius,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_shapes_are_rejected() {
        assert!(ShapeDescriptor::Sphere { radius: 0.0 }.validate().is_err());
        assert!(ShapeDescriptor::Sphere { radius: f32::NAN }.validate().is_err());
        assert!(ShapeDescriptor::Box {
            half_extents: Vec3::new(1.0, -1.0, 1.0)
        }
        .validate()
        .is_err());
        assert!(ShapeDescriptor::Capsule {
            half_height: 0.5,
            radius: 0.25
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn bounding_radius_encloses_the_shape() {
        let shape = ShapeDescriptor::Box {
            half_extents: Vec3::new(1.0, 2.0, 2.0),
        };
        assert!((shape.bounding_radius() - 3.0).abs() < 1e-6);

        let capsule = ShapeDescriptor::Capsule {
            half_height: 1.0,
            radius: 0.5,
        };
        assert!((capsule.bounding_radius() - 1.5).abs() < 1e-6);
    }
}
