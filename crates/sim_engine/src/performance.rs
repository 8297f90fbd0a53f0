//! Performance monitoring and adaptive level of detail
//!
//! Collects per-tick timing samples from the physics bridge and the driver
//! loop, and periodically derives an LOD profile from them. The derivation
//! is a pure function of the measured numbers; nothing in the update loop
//! mutates LOD state ad hoc.

use std::collections::VecDeque;

/// Frame budget the monitor aims for, in milliseconds (60 Hz)
pub const FRAME_BUDGET_MS: f32 = 1000.0 / 60.0;

/// One tick's worth of measurements
#[derive(Debug, Clone, Copy)]
pub struct FrameSample {
    /// Wall-clock duration of the physics step, in milliseconds
    pub step_millis: f32,
    /// Entities registered with the spatial index this tick
    pub entity_count: usize,
    /// Transforms written back by the bridge this tick
    pub write_backs: usize,
}

/// Tuning knobs derived from measured load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodProfile {
    /// Octree split threshold to apply; higher makes the tree coarser
    pub split_threshold: usize,
    /// Distance beyond which gameplay may run simplified physics
    pub simple_physics_radius: f32,
}

impl Default for LodProfile {
    fn default() -> Self {
        Self {
            split_threshold: 8,
            simple_physics_radius: 100.0,
        }
    }
}

/// Derive an LOD profile from average step time and entity count
///
/// Pure: same inputs, same profile. Tiers are deliberately coarse so the
/// profile is stable from one recomputation to the next.
pub fn adaptive_lod(average_step_millis: f32, entity_count: usize) -> LodProfile {
    let mut pressure = average_step_millis / FRAME_BUDGET_MS;
    if entity_count > 2000 {
        pressure += 0.25;
    }

    if pressure <= 0.5 {
        LodProfile::default()
    } else if pressure <= 1.0 {
        LodProfile {
            split_threshold: 12,
            simple_physics_radius: 60.0,
        }
    } else if pressure <= 2.0 {
        LodProfile {
            split_threshold: 16,
            simple_physics_radius: 35.0,
        }
    } else {
        LodProfile {
            split_threshold: 24,
            simple_physics_radius: 20.0,
        }
    }
}

/// Rolling performance monitor
pub struct PerformanceMonitor {
    samples: VecDeque<FrameSample>,
    capacity: usize,
    recompute_interval: u32,
    ticks_since_recompute: u32,
    profile: LodProfile,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(120, 30)
    }
}

impl PerformanceMonitor {
    /// Create a monitor keeping `capacity` samples and recomputing the LOD
    /// profile every `recompute_interval` ticks
    pub fn new(capacity: usize, recompute_interval: u32) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            recompute_interval: recompute_interval.max(1),
            ticks_since_recompute: 0,
            profile: LodProfile::default(),
        }
    }

    /// Record one tick's sample; returns a fresh profile when due
    ///
    /// Returns `Some` only on recomputation ticks where the profile
    /// actually changed, so callers can apply it exactly once.
    pub fn record(&mut self, sample: FrameSample) -> Option<LodProfile> {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        self.ticks_since_recompute += 1;
        if self.ticks_since_recompute < self.recompute_interval {
            return None;
        }
        self.ticks_since_recompute = 0;

        let entity_count = self.samples.back().map_or(0, |s| s.entity_count);
        let fresh = adaptive_lod(self.average_step_millis(), entity_count);
        if fresh == self.profile {
            None
        } else {
            self.profile = fresh;
            Some(fresh)
        }
    }

    /// Average physics step time over the sample window, in milliseconds
    pub fn average_step_millis(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f32 = self.samples.iter().map(|s| s.step_millis).sum();
        total / self.samples.len() as f32
    }

    /// Fraction of the frame budget consumed by the average step
    pub fn utilization(&self) -> f32 {
        self.average_step_millis() / FRAME_BUDGET_MS
    }

    /// The profile as of the last recomputation
    pub fn profile(&self) -> LodProfile {
        self.profile
    }

    /// Number of retained samples
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
