use crate::config::MotionParams;
use crate::network::Lane;
use crate::simulation::{target_speed, Entity};
use anyhow::{Result, bail};
use super::{MotionBackend, MotionUpdate};

/// Accelerates or brakes towards the lane's target speed within the
/// profile's limits, then moves at the new speed for the whole tick.
pub struct KinematicBackend {
    params: MotionParams,
}

impl KinematicBackend {
    pub fn new(params: MotionParams) -> Self {
        Self { params }
    }
}

impl MotionBackend for KinematicBackend {
    fn advance(&mut self, entity: &Entity, lane: &Lane, dt: f64) -> Result<MotionUpdate> {
        if !(dt > 0.0) {
            bail!("time step must be positive, got {}", dt);
        }

        let profile = self.params.profile(entity.kind);
        let target = target_speed(profile, entity, lane);

        let speed = if entity.speed < target {
            (entity.speed + profile.accel * dt).min(target)
        } else {
            (entity.speed - profile.decel * dt).max(target)
        };

        Ok(MotionUpdate {
            speed,
            distance: speed * dt,
        })
    }

    fn get_name(&self) -> &'static str {
        "kinematic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::EntityKind;
    use crate::testing;

    #[test]
    fn accelerates_up_to_lane_limit() {
        let network = testing::corridor();
        let lane = network.edge_by_id("EN").unwrap().lane(0).unwrap();
        let mut backend = KinematicBackend::new(MotionParams::default());
        let mut entity = Entity::new("v", EntityKind::Vehicle, 1.0);

        let first = backend.advance(&entity, lane, 1.0).unwrap();
        assert!((first.speed - 2.6).abs() < 1e-9);
        assert!((first.distance - 2.6).abs() < 1e-9);

        entity.speed = 7.5;
        let capped = backend.advance(&entity, lane, 1.0).unwrap();
        assert_eq!(capped.speed, 8.0);
    }

    #[test]
    fn brakes_when_too_fast() {
        let network = testing::corridor();
        let lane = network.edge_by_id("EN").unwrap().lane(0).unwrap();
        let mut backend = KinematicBackend::new(MotionParams::default());
        let mut entity = Entity::new("p", EntityKind::Person, 1.0);
        entity.speed = 5.0;

        let update = backend.advance(&entity, lane, 1.0).unwrap();
        assert!((update.speed - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_step() {
        let network = testing::corridor();
        let lane = network.edge_by_id("EN").unwrap().lane(0).unwrap();
        let mut backend = KinematicBackend::new(MotionParams::default());
        let entity = Entity::new("v", EntityKind::Vehicle, 1.0);
        assert!(backend.advance(&entity, lane, 0.0).is_err());
    }
}
