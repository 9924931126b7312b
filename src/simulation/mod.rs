use nalgebra::{Vector2, Point2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::network::Network;

pub mod behavior;
pub mod collision;
pub mod traffic;

pub use behavior::*;
pub use collision::*;
pub use traffic::*;

pub type Vec2 = Vector2<f64>;
pub type Point = Point2<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Vehicle,
    Person,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Vehicle => write!(f, "vehicle"),
            EntityKind::Person => write!(f, "person"),
        }
    }
}

/// Where an entity is. Consumers must handle every variant.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlacementState {
    /// Attached to lane geometry; `lateral_offset` is positive to the left.
    OnLane {
        edge_id: String,
        lane_index: usize,
        offset: f64,
        lateral_offset: f64,
    },
    /// World coordinates are authoritative.
    Free { x: f64, y: f64, heading: f64 },
    /// Only exists while a placement is being resolved.
    Undetermined,
}

impl PlacementState {
    pub fn is_on_lane(&self) -> bool {
        matches!(self, PlacementState::OnLane { .. })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, PlacementState::Free { .. })
    }

    /// World coordinates, or `None` while undetermined or when the lane is
    /// not part of `network`.
    pub fn world_position(&self, network: &Network) -> Option<Point> {
        match self {
            PlacementState::OnLane { edge_id, lane_index, offset, lateral_offset } => {
                let lane = network.lane(network.lane_ref(edge_id, *lane_index)?);
                Some(lane.position_at(*offset, *lateral_offset))
            }
            PlacementState::Free { x, y, .. } => Some(Point::new(*x, *y)),
            PlacementState::Undetermined => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub placement: PlacementState,
    /// Last known heading in degrees.
    pub heading: f64,
    pub speed: f64,
    /// Multiplier on the lane speed limit, sampled once at creation.
    pub speed_factor: f64,
    /// Edge ids to follow at lane ends; empty means pick successors freely.
    pub route: Vec<String>,
    pub route_position: usize,
    /// Simulated time at which the entity leaves the session.
    pub exit_time: Option<f64>,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind, speed_factor: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            placement: PlacementState::Undetermined,
            heading: 0.0,
            speed: 0.0,
            speed_factor,
            route: Vec::new(),
            route_position: 0,
            exit_time: None,
        }
    }

    /// Position of `edge_id` in the route, preferring entries at or after
    /// the current route position.
    pub fn route_index_of(&self, edge_id: &str) -> Option<usize> {
        self.route_index_from(edge_id, self.route_position)
    }

    pub fn route_index_from(&self, edge_id: &str, start: usize) -> Option<usize> {
        self.route
            .iter()
            .skip(start)
            .position(|e| e == edge_id)
            .map(|i| i + start)
            .or_else(|| self.route.iter().position(|e| e == edge_id))
    }
}

/// Discrete session time.
#[derive(Debug, Clone)]
pub struct SimulationClock {
    tick: u64,
    step_length: f64,
}

impl SimulationClock {
    pub fn new(step_length: f64) -> Self {
        Self { tick: 0, step_length }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn step_length(&self) -> f64 {
        self.step_length
    }

    pub fn time(&self) -> f64 {
        self.tick as f64 * self.step_length
    }

    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[derive(Debug, Clone)]
pub struct SimulationState {
    pub entities: BTreeMap<String, Entity>,
    pub clock: SimulationClock,
}

impl SimulationState {
    pub fn new(step_length: f64) -> Self {
        Self {
            entities: BTreeMap::new(),
            clock: SimulationClock::new(step_length),
        }
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_entity_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn get_kind_counts(&self) -> HashMap<EntityKind, usize> {
        let mut counts = HashMap::new();
        for entity in self.entities.values() {
            *counts.entry(entity.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Two entities sharing a junction closer than their combined half lengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    pub entity_a: String,
    pub entity_b: String,
    pub junction_id: String,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' and '{}' in junction '{}'", self.entity_a, self.entity_b, self.junction_id)
    }
}

/// An entity ran off a lane end with nowhere to continue and became free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryEvent {
    pub entity_id: String,
    pub edge_id: String,
    pub lane_index: usize,
}

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub step_time: Duration,
    pub entity_count: usize,
}

#[derive(Debug)]
pub struct PerformanceTracker {
    samples: VecDeque<StepMetrics>,
    max_samples: usize,
    current_step_start: Option<Instant>,
}

impl PerformanceTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            current_step_start: None,
        }
    }

    pub fn start_step(&mut self) {
        self.current_step_start = Some(Instant::now());
    }

    pub fn end_step(&mut self, entity_count: usize) {
        if let Some(start) = self.current_step_start.take() {
            if self.samples.len() >= self.max_samples {
                self.samples.pop_front();
            }
            self.samples.push_back(StepMetrics {
                step_time: start.elapsed(),
                entity_count,
            });
        }
    }

    /// Drops the running measurement of a step that did not complete.
    pub fn abort_step(&mut self) {
        self.current_step_start = None;
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn average_step_time(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }

        let total: Duration = self.samples.iter().map(|s| s.step_time).sum();
        total / self.samples.len() as u32
    }

    pub fn steps_per_second(&self) -> f64 {
        let average = self.average_step_time();
        if average.is_zero() {
            return 0.0;
        }
        1.0 / average.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn clock_counts_ticks() {
        let mut clock = SimulationClock::new(0.5);
        for expected in 1..=4 {
            assert_eq!(clock.advance(), expected);
        }
        assert_eq!(clock.time(), 2.0);
    }

    #[test]
    fn world_position_per_state() {
        let network = testing::corridor();

        let on_lane = PlacementState::OnLane {
            edge_id: "WE".to_string(),
            lane_index: 1,
            offset: 40.0,
            lateral_offset: 0.5,
        };
        let p = on_lane.world_position(&network).unwrap();
        assert!((p.x - 50.0).abs() < 1e-9);
        assert!((p.y + 1.1).abs() < 1e-9);

        let free = PlacementState::Free { x: 3.0, y: 4.0, heading: 90.0 };
        assert_eq!(free.world_position(&network), Some(Point::new(3.0, 4.0)));
        assert_eq!(PlacementState::Undetermined.world_position(&network), None);
    }

    #[test]
    fn route_lookup_prefers_current_position() {
        let mut entity = Entity::new("v", EntityKind::Vehicle, 1.0);
        entity.route = vec!["WE".into(), "EW".into(), "WE".into()];
        assert_eq!(entity.route_index_of("WE"), Some(0));
        entity.route_position = 1;
        assert_eq!(entity.route_index_of("WE"), Some(2));
        assert_eq!(entity.route_index_of("EN"), None);
    }

    #[test]
    fn aborted_steps_are_not_sampled() {
        let mut tracker = PerformanceTracker::new(4);
        tracker.start_step();
        tracker.abort_step();
        tracker.end_step(3);
        assert_eq!(tracker.sample_count(), 0);

        tracker.start_step();
        tracker.end_step(3);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn placement_serializes_tagged() {
        let free = PlacementState::Free { x: 1.0, y: 2.0, heading: 0.0 };
        let json = serde_json::to_string(&free).unwrap();
        assert_eq!(json, r#"{"state":"free","x":1.0,"y":2.0,"heading":0.0}"#);
    }
}
