use serde::{Deserialize, Serialize};
use anyhow::{Result, anyhow};
use super::Validate;
use crate::simulation::EntityKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub simulation: SimulationParams,
    #[serde(default)]
    pub mapping: MappingParams,
    #[serde(default)]
    pub collision: CollisionParams,
    #[serde(default)]
    pub motion: MotionParams,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationParams {
    /// Seconds of simulated time per tick.
    #[serde(default = "default_step_length")]
    pub step_length: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Kinematic,
    Stationary,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingParams {
    /// Search radius used when a placement command does not carry one.
    pub default_radius: f64,
    /// Maximum heading difference in degrees for vehicle matches.
    pub angle_tolerance: f64,
    /// Grid cell edge length of the lane index.
    pub index_cell_size: f64,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            default_radius: 100.0,
            angle_tolerance: 45.0,
            index_cell_size: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Junction occupancy is not evaluated.
    None,
    /// Collisions are logged and reported; the step is committed.
    #[default]
    Warn,
    /// As `Warn`, then both participants are removed.
    Remove,
    /// The step is discarded and the session closed.
    Strict,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CollisionParams {
    #[serde(default)]
    pub policy: CollisionPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionProfile {
    pub length: f64,
    pub max_speed: f64,
    pub accel: f64,
    pub decel: f64,
    /// Standard deviation of the per-entity speed factor around 1.0.
    pub speed_dev: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionParams {
    pub vehicle: MotionProfile,
    pub person: MotionProfile,
}

impl MotionParams {
    pub fn profile(&self, kind: EntityKind) -> &MotionProfile {
        match kind {
            EntityKind::Vehicle => &self.vehicle,
            EntityKind::Person => &self.person,
        }
    }
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            vehicle: MotionProfile {
                length: 5.0,
                max_speed: 13.89,
                accel: 2.6,
                decel: 4.5,
                speed_dev: 0.1,
            },
            person: MotionProfile {
                length: 0.5,
                max_speed: 1.39,
                accel: 1.5,
                decel: 2.0,
                speed_dev: 0.1,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    pub timing_samples: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { timing_samples: 100 }
    }
}

fn default_step_length() -> f64 {
    1.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationParams {
                step_length: default_step_length(),
                seed: None,
                backend: BackendKind::default(),
            },
            mapping: MappingParams::default(),
            collision: CollisionParams::default(),
            motion: MotionParams::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> Result<()> {
        if !(self.simulation.step_length > 0.0) || !self.simulation.step_length.is_finite() {
            return Err(anyhow!("Step length must be positive and finite"));
        }

        let mapping = &self.mapping;
        if !(mapping.default_radius >= 0.0) {
            return Err(anyhow!("Default search radius must be non-negative"));
        }
        if !(0.0..=180.0).contains(&mapping.angle_tolerance) {
            return Err(anyhow!("Angle tolerance {} must be in range [0, 180]", mapping.angle_tolerance));
        }
        if !(mapping.index_cell_size > 0.0) || !mapping.index_cell_size.is_finite() {
            return Err(anyhow!("Index cell size must be positive and finite"));
        }

        for (name, profile) in [("vehicle", &self.motion.vehicle), ("person", &self.motion.person)] {
            if !(profile.length > 0.0) {
                return Err(anyhow!("Length for '{}' must be positive", name));
            }
            if !(profile.max_speed > 0.0) {
                return Err(anyhow!("Max speed for '{}' must be positive", name));
            }
            if !(profile.accel > 0.0) || !(profile.decel > 0.0) {
                return Err(anyhow!("Acceleration values for '{}' must be positive", name));
            }
            if !(0.0..0.5).contains(&profile.speed_dev) {
                return Err(anyhow!("Speed deviation for '{}' must be in range [0, 0.5)", name));
            }
        }

        if self.performance.timing_samples == 0 {
            return Err(anyhow!("Timing samples must be greater than zero"));
        }

        Ok(())
    }
}
