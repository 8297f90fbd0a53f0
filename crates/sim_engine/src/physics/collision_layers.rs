//! Collision layer system for filtering collision detection and queries
//!
//! Entities carry a layer (a single bit index) and queries carry a mask.
//! The [`CollisionLayerMatrix`] decides which pairs of layers interact and
//! maps game-level layers onto the physics engine's interaction groups.

use std::collections::HashMap;

use bitflags::bitflags;
use rapier3d::prelude::{Group, InteractionGroups};
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    /// Layer bitmask used to filter spatial queries and collisions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerMask: u32 {
        /// Player characters
        const PLAYER = 1 << 0;
        /// Non-player agents
        const AGENT = 1 << 1;
        /// Projectiles
        const PROJECTILE = 1 << 2;
        /// Static environment geometry
        const ENVIRONMENT = 1 << 3;
        /// Trigger volumes (no physical response)
        const TRIGGER = 1 << 4;
        /// Debris and small physics objects
        const DEBRIS = 1 << 5;
        /// Vehicles
        const VEHICLE = 1 << 6;
        /// Pickups and collectibles
        const PICKUP = 1 << 7;

        /// Layers considered by render culling
        const RENDERABLE = Self::PLAYER.bits()
            | Self::AGENT.bits()
            | Self::PROJECTILE.bits()
            | Self::ENVIRONMENT.bits()
            | Self::DEBRIS.bits()
            | Self::VEHICLE.bits()
            | Self::PICKUP.bits();

        /// Layers considered by AI detection queries
        const DETECTION = Self::PLAYER.bits() | Self::AGENT.bits() | Self::VEHICLE.bits();

        /// Every layer, including custom bits 8..32
        const ALL = u32::MAX;
    }
}

/// Number of addressable collision layers
pub const LAYER_COUNT: usize = 32;

/// A single collision layer, identified by its bit index (0..32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollisionLayer(u8);

impl CollisionLayer {
    /// Create a layer from a bit index
    ///
    /// Returns `None` for indices outside `0..32`.
    pub fn new(bit: u8) -> Option<Self> {
        (bit < LAYER_COUNT as u8).then_some(Self(bit))
    }

    /// The layer's bit index
    pub fn bit(&self) -> u8 {
        self.0
    }

    /// The single-bit mask for this layer
    pub fn mask(&self) -> LayerMask {
        LayerMask::from_bits_retain(1 << self.0)
    }
}

/// One entry of the startup layer table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Human-readable layer name, unique within the table
    pub name: String,
    /// Bit index in `0..32`
    pub bit: u8,
    /// Mask of layers this layer collides with
    pub collides_with: u32,
    /// Resolution priority; higher wins in [`CollisionLayerMatrix::dominant_layer`]
    pub priority: i32,
}

/// Errors raised while rebuilding the layer table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayerTableError {
    /// A spec entry addresses a bit outside 0..32
    #[error("layer '{name}' uses bit {bit}, outside 0..32")]
    BitOutOfRange {
        /// Offending layer name
        name: String,
        /// Offending bit index
        bit: u8,
    },

    /// Two spec entries claim the same bit
    #[error("layers '{first}' and '{second}' both use bit {bit}")]
    DuplicateBit {
        /// First claimant
        first: String,
        /// Second claimant
        second: String,
        /// Contested bit index
        bit: u8,
    },

    /// Two spec entries share a name
    #[error("layer name '{name}' appears more than once")]
    DuplicateName {
        /// Repeated name
        name: String,
    },
}

/// Symmetric 32x32 collision table with per-layer priorities
///
/// Stored as one row mask per layer; bit `b` of row `a` says whether layers
/// `a` and `b` collide. Every write updates both rows, so symmetry holds by
/// construction.
#[derive(Debug, Clone)]
pub struct CollisionLayerMatrix {
    rows: [u32; LAYER_COUNT],
    priorities: [i32; LAYER_COUNT],
    names: [Option<String>; LAYER_COUNT],
    by_name: HashMap<String, CollisionLayer>,
}

impl Default for CollisionLayerMatrix {
    fn default() -> Self {
        Self::all_collide()
    }
}

impl CollisionLayerMatrix {
    /// Create a matrix where every pair of layers collides
    pub fn all_collide() -> Self {
        Self {
            rows: [u32::MAX; LAYER_COUNT],
            priorities: [0; LAYER_COUNT],
            names: std::array::from_fn(|_| None),
            by_name: HashMap::new(),
        }
    }

    /// Create a matrix from a startup layer table
    pub fn from_specs(specs: &[LayerSpec]) -> Result<Self, LayerTableError> {
        let mut matrix = Self::all_collide();
        matrix.rebuild(specs)?;
        Ok(matrix)
    }

    /// Replace the whole table from a spec list, atomically
    ///
    /// The candidate table is validated and assembled aside; `self` is only
    /// touched once nothing can fail. A pair of configured layers collides
    /// when each side's mask contains the other. Pairs involving a layer
    /// absent from the table keep the all-collide default toward it.
    pub fn rebuild(&mut self, specs: &[LayerSpec]) -> Result<(), LayerTableError> {
        let mut declared: [Option<&LayerSpec>; LAYER_COUNT] = [None; LAYER_COUNT];
        let mut by_name: HashMap<String, CollisionLayer> = HashMap::new();

        for spec in specs {
            let Some(layer) = CollisionLayer::new(spec.bit) else {
                return Err(LayerTableError::BitOutOfRange {
                    name: spec.name.clone(),
                    bit: spec.bit,
                });
            };
            if let Some(existing) = declared[spec.bit as usize] {
                return Err(LayerTableError::DuplicateBit {
                    first: existing.name.clone(),
                    second: spec.name.clone(),
                    bit: spec.bit,
                });
            }
            if by_name.contains_key(&spec.name) {
                return Err(LayerTableError::DuplicateName {
                    name: spec.name.clone(),
                });
            }
            declared[spec.bit as usize] = Some(spec);
            by_name.insert(spec.name.clone(), layer);
        }

        // Configured layers start from their declared mask, everything else
        // keeps the all-collide default.
        let declared_mask: [u32; LAYER_COUNT] =
            std::array::from_fn(|i| declared[i].map_or(u32::MAX, |s| s.collides_with));

        let mut rows = [0u32; LAYER_COUNT];
        for a in 0..LAYER_COUNT {
            for b in 0..LAYER_COUNT {
                let enabled = declared_mask[a] & (1 << b) != 0 && declared_mask[b] & (1 << a) != 0;
                if enabled {
                    rows[a] |= 1 << b;
                }
            }
        }

        self.rows = rows;
        self.priorities = std::array::from_fn(|i| declared[i].map_or(0, |s| s.priority));
        self.names = std::array::from_fn(|i| declared[i].map(|s| s.name.clone()));
        self.by_name = by_name;
        Ok(())
    }

    /// Enable or disable collision between two layers
    ///
    /// Both directions are written, so the table stays symmetric.
    pub fn set(&mut self, a: CollisionLayer, b: CollisionLayer, enabled: bool) {
        let (ia, ib) = (a.bit() as usize, b.bit() as usize);
        if enabled {
            self.rows[ia] |= 1 << ib;
            self.rows[ib] |= 1 << ia;
        } else {
            self.rows[ia] &= !(1 << ib);
            self.rows[ib] &= !(1 << ia);
        }
    }

    /// Whether two layers collide
    pub fn get(&self, a: CollisionLayer, b: CollisionLayer) -> bool {
        self.rows[a.bit() as usize] & (1 << b.bit()) != 0
    }

    /// Mask of every layer colliding with the given layer
    pub fn row(&self, layer: CollisionLayer) -> LayerMask {
        LayerMask::from_bits_retain(self.rows[layer.bit() as usize])
    }

    /// Resolution priority of a layer
    pub fn priority(&self, layer: CollisionLayer) -> i32 {
        self.priorities[layer.bit() as usize]
    }

    /// The layer that wins a pairwise interaction
    ///
    /// Higher priority wins; the lower bit index wins a priority tie.
    pub fn dominant_layer(&self, a: CollisionLayer, b: CollisionLayer) -> CollisionLayer {
        match self.priority(a).cmp(&self.priority(b)) {
            std::cmp::Ordering::Greater => a,
            std::cmp::Ordering::Less => b,
            std::cmp::Ordering::Equal => a.min(b),
        }
    }

    /// Look up a layer by its configured name
    pub fn layer_by_name(&self, name: &str) -> Option<CollisionLayer> {
        self.by_name.get(name).copied()
    }

    /// Configured name of a layer, if any
    pub fn name(&self, layer: CollisionLayer) -> Option<&str> {
        self.names[layer.bit() as usize].as_deref()
    }

    /// Engine-side interaction groups for a body on the given layer
    ///
    /// Membership is the layer's own bit; the filter is its current matrix
    /// row. Combined with rapier's both-ways group test this reproduces the
    /// symmetric table exactly.
    pub fn interaction_groups(&self, layer: CollisionLayer) -> InteractionGroups {
        InteractionGroups::new(
            Group::from_bits_truncate(layer.mask().bits()),
            Group::from_bits_truncate(self.rows[layer.bit() as usize]),
        )
    }

    /// Back-map an engine membership group to the game-level layer
    ///
    /// Returns the lowest set bit, matching how bodies are always members
    /// of exactly one layer.
    pub fn layer_of_group(&self, group: Group) -> Option<CollisionLayer> {
        let bits = group.bits();
        if bits == 0 {
            return None;
        }
        CollisionLayer::new(bits.trailing_zeros() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(bit: u8) -> CollisionLayer {
        CollisionLayer::new(bit).expect("bit in range")
    }

    #[test]
    fn set_is_symmetric() {
        let mut matrix = CollisionLayerMatrix::all_collide();
        let (a, b) = (layer(3), layer(17));

        matrix.set(a, b, false);
        assert!(!matrix.get(a, b));
        assert!(!matrix.get(b, a));

        matrix.set(b, a, true);
        assert!(matrix.get(a, b));
        assert!(matrix.get(b, a));
    }

    #[test]
    fn default_is_all_collide() {
        let matrix = CollisionLayerMatrix::default();
        assert!(matrix.get(layer(0), layer(31)));
        assert!(matrix.get(layer(12), layer(12)));
    }

    #[test]
    fn rebuild_applies_both_ways_semantics() {
        let specs = vec![
            LayerSpec {
                name: "player".to_string(),
                bit: 0,
                collides_with: 0b0110,
                priority: 10,
            },
            LayerSpec {
                name: "agent".to_string(),
                bit: 1,
                collides_with: 0b0001,
                priority: 5,
            },
            LayerSpec {
                name: "ghost".to_string(),
                bit: 2,
                collides_with: 0,
                priority: 0,
            },
        ];
        let matrix = CollisionLayerMatrix::from_specs(&specs).expect("valid table");

        // player<->agent: each lists the other
        assert!(matrix.get(layer(0), layer(1)));
        // player lists ghost, but ghost lists nobody
        assert!(!matrix.get(layer(0), layer(2)));
        // unconfigured layers keep the default toward each other
        assert!(matrix.get(layer(8), layer(9)));

        assert_eq!(matrix.layer_by_name("player"), Some(layer(0)));
        assert_eq!(matrix.dominant_layer(layer(0), layer(1)), layer(0));
    }

    #[test]
    fn rebuild_rejects_duplicate_bits_without_mutating() {
        let mut matrix = CollisionLayerMatrix::all_collide();
        matrix.set(layer(4), layer(5), false);

        let specs = vec![
            LayerSpec {
                name: "one".to_string(),
                bit: 7,
                collides_with: u32::MAX,
                priority: 0,
            },
            LayerSpec {
                name: "two".to_string(),
                bit: 7,
                collides_with: u32::MAX,
                priority: 0,
            },
        ];
        let err = matrix.rebuild(&specs).expect_err("duplicate bit");
        assert!(matches!(err, LayerTableError::DuplicateBit { bit: 7, .. }));

        // The failed rebuild left the previous table intact
        assert!(!matrix.get(layer(4), layer(5)));
    }

    #[test]
    fn interaction_groups_round_trip() {
        let matrix = CollisionLayerMatrix::all_collide();
        let l = layer(6);
        let groups = matrix.interaction_groups(l);
        assert_eq!(matrix.layer_of_group(groups.memberships), Some(l));
    }

    #[test]
    fn mask_composites_cover_expected_layers() {
        assert!(LayerMask::RENDERABLE.contains(LayerMask::ENVIRONMENT));
        assert!(!LayerMask::RENDERABLE.contains(LayerMask::TRIGGER));
        assert!(LayerMask::DETECTION.contains(LayerMask::VEHICLE));
        assert!(LayerMask::ALL.contains(LayerMask::RENDERABLE));
    }
}
