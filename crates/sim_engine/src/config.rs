//! Configuration system
//!
//! All tunables consumed at startup live here: world bounds, octree
//! thresholds, physics engine settings, query service behavior, and the
//! default collision layer table. Configurations are plain serde types and
//! can be loaded from TOML or RON files through the [`Config`] trait.

use serde::{Deserialize, Serialize};

use crate::foundation::math::Vec3;
use crate::physics::collision_layers::LayerSpec;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// World bounds configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Minimum corner of the simulated world
    pub min: Vec3,
    /// Maximum corner of the simulated world
    pub max: Vec3,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            min: Vec3::new(-500.0, -500.0, -500.0),
            max: Vec3::new(500.0, 500.0, 500.0),
        }
    }
}

/// Octree tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OctreeConfig {
    /// Record count above which a node subdivides
    pub split_threshold: usize,

    /// Maximum subdivision depth
    pub max_depth: u32,

    /// Minimum node edge length (prevents excessive subdivision)
    pub min_node_size: f32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            split_threshold: 8,
            max_depth: 8,
            min_node_size: 1.0,
        }
    }
}

impl OctreeConfig {
    /// Subtree record count below which children merge back into the parent
    ///
    /// Half the split threshold, so a node oscillating around the split
    /// point does not thrash between subdivided and merged.
    pub fn merge_threshold(&self) -> usize {
        self.split_threshold / 2
    }
}

/// Physics engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Worker threads for the internal simulation pool
    ///
    /// `None` selects hardware concurrency minus one.
    pub thread_count: Option<usize>,

    /// Gravity vector applied to dynamic bodies
    pub gravity: Vec3,

    /// Soft cap on registered bodies; registration past it is rejected
    pub max_bodies: usize,

    /// Minimum pose change (meters / radians) that triggers a transform
    /// write-back after a step
    pub write_back_epsilon: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            thread_count: None,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            max_bodies: 4096,
            write_back_epsilon: 1.0e-4,
        }
    }
}

impl PhysicsConfig {
    /// Resolve the worker thread count against the machine
    pub fn resolved_thread_count(&self) -> usize {
        self.thread_count
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1)
    }
}

/// Query service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Minimum interval between detection queries for one entity, in
    /// milliseconds
    pub detection_interval_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: 200,
        }
    }
}

/// Complete configuration for the spatial/physics core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// World bounds
    pub world: WorldConfig,
    /// Octree tuning
    pub octree: OctreeConfig,
    /// Physics engine settings
    pub physics: PhysicsConfig,
    /// Query service settings
    pub query: QueryConfig,
    /// Collision layer table applied at startup; empty keeps all-collide
    pub layers: Vec<LayerSpec>,
}

impl SimulationConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set world bounds
    pub fn with_world_bounds(mut self, min: Vec3, max: Vec3) -> Self {
        self.world = WorldConfig { min, max };
        self
    }

    /// Set gravity
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.physics.gravity = gravity;
        self
    }

    /// Set the physics worker thread count
    pub fn with_thread_count(mut self, threads: usize) -> Self {
        self.physics.thread_count = Some(threads);
        self
    }

    /// Set the octree split threshold
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.octree.split_threshold = threshold;
        self
    }

    /// Set the startup collision layer table
    pub fn with_layers(mut self, layers: Vec<LayerSpec>) -> Self {
        self.layers = layers;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.world.min.x >= self.world.max.x
            || self.world.min.y >= self.world.max.y
            || self.world.min.z >= self.world.max.z
        {
            return Err("World bounds must have positive extent on every axis".to_string());
        }

        if self.octree.split_threshold == 0 {
            return Err("Octree split threshold must be at least 1".to_string());
        }

        if self.octree.max_depth == 0 || self.octree.max_depth > 16 {
            return Err("Octree max depth must be between 1 and 16".to_string());
        }

        if self.physics.max_bodies == 0 {
            return Err("Physics body cap must be at least 1".to_string());
        }

        if !self.physics.write_back_epsilon.is_finite() || self.physics.write_back_epsilon < 0.0 {
            return Err("Write-back epsilon must be finite and non-negative".to_string());
        }

        for spec in &self.layers {
            if spec.bit >= 32 {
                return Err(format!("Layer '{}' uses bit {} outside 0..32", spec.name, spec.bit));
            }
        }

        Ok(())
    }
}

impl Config for SimulationConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_world_bounds_are_rejected() {
        let config = SimulationConfig::new()
            .with_world_bounds(Vec3::new(10.0, 0.0, 0.0), Vec3::new(-10.0, 1.0, 1.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_threshold_is_half_of_split() {
        let octree = OctreeConfig {
            split_threshold: 8,
            ..Default::default()
        };
        assert_eq!(octree.merge_threshold(), 4);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = SimulationConfig::new()
            .with_gravity(Vec3::new(0.0, -3.7, 0.0))
            .with_split_threshold(12);
        let text = toml::to_string_pretty(&config).expect("serialize");
        let back: SimulationConfig = toml::from_str(&text).expect("parse");
        assert_eq!(back.octree.split_threshold, 12);
        assert!((back.physics.gravity.y + 3.7).abs() < 1e-6);
    }
}
