use crate::network::Lane;
use crate::simulation::Entity;
use anyhow::Result;
use super::{MotionBackend, MotionUpdate};

/// Keeps every entity where it was placed. Useful when the caller drives all
/// positions through placement commands.
pub struct StationaryBackend;

impl MotionBackend for StationaryBackend {
    fn advance(&mut self, _entity: &Entity, _lane: &Lane, _dt: f64) -> Result<MotionUpdate> {
        Ok(MotionUpdate {
            speed: 0.0,
            distance: 0.0,
        })
    }

    fn get_name(&self) -> &'static str {
        "stationary"
    }
}
