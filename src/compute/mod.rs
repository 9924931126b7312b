use crate::config::{BackendKind, MotionParams};
use crate::network::Lane;
use crate::simulation::Entity;
use anyhow::Result;

pub mod kinematic;
pub mod stationary;

pub use kinematic::*;
pub use stationary::*;

/// Result of one motion update for an on-lane entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionUpdate {
    pub speed: f64,
    /// Distance travelled along the lane during the tick.
    pub distance: f64,
}

/// Motion model consulted once per on-lane entity per tick.
pub trait MotionBackend {
    fn advance(&mut self, entity: &Entity, lane: &Lane, dt: f64) -> Result<MotionUpdate>;
    fn get_name(&self) -> &'static str;
}

pub enum ComputeBackend {
    Kinematic(KinematicBackend),
    Stationary(StationaryBackend),
}

impl ComputeBackend {
    pub fn new(kind: BackendKind, params: MotionParams) -> Self {
        match kind {
            BackendKind::Kinematic => Self::new_kinematic(params),
            BackendKind::Stationary => Self::new_stationary(),
        }
    }

    pub fn new_kinematic(params: MotionParams) -> Self {
        ComputeBackend::Kinematic(KinematicBackend::new(params))
    }

    pub fn new_stationary() -> Self {
        ComputeBackend::Stationary(StationaryBackend)
    }
}

impl MotionBackend for ComputeBackend {
    fn advance(&mut self, entity: &Entity, lane: &Lane, dt: f64) -> Result<MotionUpdate> {
        match self {
            ComputeBackend::Kinematic(backend) => backend.advance(entity, lane, dt),
            ComputeBackend::Stationary(backend) => backend.advance(entity, lane, dt),
        }
    }

    fn get_name(&self) -> &'static str {
        match self {
            ComputeBackend::Kinematic(backend) => backend.get_name(),
            ComputeBackend::Stationary(backend) => backend.get_name(),
        }
    }
}
