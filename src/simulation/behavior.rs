use super::{Entity, EntityKind};
use crate::config::{MotionParams, MotionProfile};
use crate::network::Lane;
use rand::{SeedableRng};
use rand_distr::{Normal, Distribution};
use rand::rngs::StdRng;

/// Samples per-entity speed preferences. Seeded, so two sessions with the
/// same seed and command sequence move identically.
pub struct BehaviorEngine {
    params: MotionParams,
    rng: StdRng,
}

impl BehaviorEngine {
    pub fn new(params: MotionParams, seed: Option<u64>) -> Self {
        let rng = if let Some(seed) = seed {
            StdRng::seed_from_u64(seed)
        } else {
            StdRng::from_entropy()
        };

        Self { params, rng }
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    /// Speed factor drawn around 1.0 and clipped to two deviations.
    pub fn sample_speed_factor(&mut self, kind: EntityKind) -> f64 {
        let deviation = self.params.profile(kind).speed_dev;
        if deviation <= 0.0 {
            return 1.0;
        }

        match Normal::new(1.0, deviation) {
            Ok(normal) => normal
                .sample(&mut self.rng)
                .clamp(1.0 - 2.0 * deviation, 1.0 + 2.0 * deviation),
            Err(_) => 1.0,
        }
    }
}

/// Desired speed of `entity` on `lane`.
pub fn target_speed(profile: &MotionProfile, entity: &Entity, lane: &Lane) -> f64 {
    lane.speed_limit.min(profile.max_speed) * entity.speed_factor
}
