//! The stepped control session: sole owner and writer of entity state and
//! simulated time.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::compute::{ComputeBackend, MotionBackend};
use crate::config::{CollisionPolicy, SessionConfig, SimulationConfig};
use crate::error::{ControlError, Result};
use crate::mapping::{PlacementRequest, PositionMapper};
use crate::network::{Network, NetworkIndex};
use crate::simulation::{
    validate_route, Advance, BehaviorEngine, BoundaryEvent, Collision, CollisionDetector, Entity,
    EntityKind, Occupant, PerformanceTracker, PlacementState, Point, SimulationState, TrafficManager,
};

pub mod channel;
pub mod export;

pub use channel::*;
pub use export::*;

/// Arguments of a placement command.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceArgs {
    /// Kind used when the entity does not exist yet.
    pub kind: EntityKind,
    pub x: f64,
    pub y: f64,
    pub edge: Option<String>,
    pub lane: Option<usize>,
    pub heading: Option<f64>,
    /// Falls back to the session default radius.
    pub radius: Option<f64>,
    pub keep_route: bool,
}

impl PlaceArgs {
    pub fn new(kind: EntityKind, x: f64, y: f64) -> Self {
        Self {
            kind,
            x,
            y,
            edge: None,
            lane: None,
            heading: None,
            radius: None,
            keep_route: false,
        }
    }

    pub fn on_edge(mut self, edge: impl Into<String>) -> Self {
        self.edge = Some(edge.into());
        self
    }

    pub fn on_lane(mut self, lane: usize) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn keep_route(mut self) -> Self {
        self.keep_route = true;
        self
    }
}

/// Arguments of a direct lane insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertArgs {
    pub kind: EntityKind,
    pub edge: String,
    pub lane: usize,
    pub offset: f64,
    pub speed: f64,
    /// Must contain `edge` when non-empty.
    pub route: Vec<String>,
    pub exit_time: Option<f64>,
}

impl InsertArgs {
    pub fn new(kind: EntityKind, edge: impl Into<String>, lane: usize, offset: f64) -> Self {
        Self {
            kind,
            edge: edge.into(),
            lane,
            offset,
            speed: 0.0,
            route: Vec::new(),
            exit_time: None,
        }
    }
}

/// Everything that happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub tick: u64,
    pub time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collisions: Vec<Collision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundary_events: Vec<BoundaryEvent>,
    /// Routed entities that finished their route.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arrived: Vec<String>,
    /// Entities whose scheduled exit time passed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exited: Vec<String>,
    /// Entities removed by the `remove` collision policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

pub struct ControlSession {
    mapper: PositionMapper,
    backend: ComputeBackend,
    behavior: BehaviorEngine,
    traffic: TrafficManager,
    collisions: CollisionDetector,
    policy: CollisionPolicy,
    default_radius: f64,
    state: SimulationState,
    performance: PerformanceTracker,
    closed: bool,
}

impl ControlSession {
    pub fn new(config: &SimulationConfig) -> anyhow::Result<Self> {
        let network = Arc::new(Network::from_config(&config.network)?);
        let index = Arc::new(NetworkIndex::new(network, config.session.mapping.index_cell_size));
        Ok(Self::with_index(index, &config.session))
    }

    /// Builds a session over an existing index, so several independent
    /// sessions can share one network.
    pub fn with_index(index: Arc<NetworkIndex>, config: &SessionConfig) -> Self {
        let network = Arc::clone(index.network());
        let motion = config.motion.clone();

        log::info!(
            "Opening session on network '{}' ({:.2}s steps, {:?} collision policy)",
            network.name(),
            config.simulation.step_length,
            config.collision.policy
        );

        Self {
            mapper: PositionMapper::new(index, config.mapping.angle_tolerance),
            backend: ComputeBackend::new(config.simulation.backend, motion.clone()),
            behavior: BehaviorEngine::new(motion.clone(), config.simulation.seed),
            traffic: TrafficManager::new(Arc::clone(&network)),
            collisions: CollisionDetector::new(network, motion),
            policy: config.collision.policy,
            default_radius: config.mapping.default_radius,
            state: SimulationState::new(config.simulation.step_length),
            performance: PerformanceTracker::new(config.performance.timing_samples as usize),
            closed: false,
        }
    }

    pub fn network(&self) -> &Arc<Network> {
        self.mapper.index().network()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.get_name()
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn tick(&self) -> u64 {
        self.state.clock.tick()
    }

    pub fn time(&self) -> f64 {
        self.state.clock.time()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ControlError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn entity(&self, id: &str) -> Result<&Entity> {
        self.ensure_open()?;
        self.state
            .get_entity(id)
            .ok_or_else(|| ControlError::UnknownEntity(id.to_string()))
    }

    /// Advances simulated time by one tick. All entity updates of the tick
    /// are computed first and committed together; on error nothing changes.
    pub fn step(&mut self) -> Result<StepReport> {
        self.ensure_open()?;
        self.performance.start_step();

        let network = Arc::clone(self.network());
        let mut report = StepReport::default();
        let batch = match self.compute_batch(&network, &mut report) {
            Ok(batch) => batch,
            Err(err) => {
                self.performance.abort_step();
                log::warn!("Tick {} aborted, nothing committed: {}", self.state.clock.tick() + 1, err);
                return Err(err);
            }
        };

        let collisions = if self.policy == CollisionPolicy::None {
            Vec::new()
        } else {
            let occupants: Vec<Occupant<'_>> = batch
                .iter()
                .filter_map(|(e, crossed)| {
                    e.placement.world_position(&network).map(|position| Occupant {
                        id: &e.id,
                        kind: e.kind,
                        position,
                        crossed,
                    })
                })
                .collect();
            self.collisions.detect(&occupants)
        };

        let next_tick = self.state.clock.tick() + 1;
        if self.policy == CollisionPolicy::Strict && !collisions.is_empty() {
            for collision in &collisions {
                log::error!("Collision at tick {}: {}", next_tick, collision);
            }
            self.performance.abort_step();
            self.close();
            return Err(ControlError::CollisionDetected(collisions));
        }
        for collision in &collisions {
            log::warn!("Collision at tick {}: {}", next_tick, collision);
        }

        // Commit the whole tick
        self.state.entities = batch.into_iter().map(|(e, _)| (e.id.clone(), e)).collect();
        report.tick = self.state.clock.advance();
        report.time = self.state.clock.time();

        if self.policy == CollisionPolicy::Remove {
            for collision in &collisions {
                for id in [&collision.entity_a, &collision.entity_b] {
                    if self.state.remove_entity(id).is_some() {
                        log::info!("Removed colliding entity '{}'", id);
                        report.removed.push(id.clone());
                    }
                }
            }
        }

        let time = report.time;
        let expired: Vec<String> = self
            .state
            .entities
            .values()
            .filter(|e| e.exit_time.is_some_and(|t| t <= time))
            .map(|e| e.id.clone())
            .collect();
        for id in expired {
            self.state.remove_entity(&id);
            log::info!("Entity '{}' reached its scheduled exit at {:.2}s", id, time);
            report.exited.push(id);
        }

        report.collisions = collisions;

        self.performance.end_step(self.state.entities.len());
        log::debug!(
            "Tick {} ({:.2}s): {} entities, avg step {:?}",
            report.tick,
            report.time,
            self.state.entities.len(),
            self.performance.average_step_time()
        );

        Ok(report)
    }

    /// Next state of every entity surviving the tick, with the junctions it
    /// crossed. Arrivals and boundary events are recorded in `report`.
    fn compute_batch(&mut self, network: &Network, report: &mut StepReport) -> Result<Vec<(Entity, Vec<String>)>> {
        let dt = self.state.clock.step_length();
        let mut batch = Vec::with_capacity(self.state.entities.len());

        for entity in self.state.entities.values() {
            let mut next = entity.clone();
            let mut crossed = Vec::new();

            match &entity.placement {
                PlacementState::OnLane { edge_id, lane_index, offset, lateral_offset } => {
                    let lane_ref = network.lane_ref(edge_id, *lane_index).ok_or_else(|| {
                        ControlError::InvalidArgument(format!(
                            "entity '{}' references missing lane {}_{}",
                            entity.id, edge_id, lane_index
                        ))
                    })?;
                    let update = self.backend.advance(entity, network.lane(lane_ref), dt)?;
                    next.speed = update.speed;

                    match self.traffic.advance(entity, lane_ref, *offset, update.distance) {
                        Advance::OnLane { lane, offset, route_position, junctions } => {
                            let target = network.lane(lane);
                            next.placement = PlacementState::OnLane {
                                edge_id: target.edge_id.clone(),
                                lane_index: target.index,
                                offset,
                                lateral_offset: lateral_offset.clamp(-target.width / 2.0, target.width / 2.0),
                            };
                            next.heading = target.heading_at(offset);
                            next.route_position = route_position;
                            crossed = junctions;
                        }
                        Advance::Boundary { lane, junctions } => {
                            let source = network.lane(lane);
                            let end = source.length();
                            let position = source.position_at(end, *lateral_offset);
                            let heading = source.heading_at(end);

                            log::info!(
                                "Entity '{}' ran off the end of lane {} and is now free at ({:.2}, {:.2})",
                                entity.id,
                                source.id(),
                                position.x,
                                position.y
                            );
                            report.boundary_events.push(BoundaryEvent {
                                entity_id: entity.id.clone(),
                                edge_id: source.edge_id.clone(),
                                lane_index: source.index,
                            });

                            next.placement = PlacementState::Free {
                                x: position.x,
                                y: position.y,
                                heading,
                            };
                            next.heading = heading;
                            next.speed = 0.0;
                            crossed = junctions;
                        }
                        Advance::Arrived => {
                            log::info!("Entity '{}' arrived at the end of its route", entity.id);
                            report.arrived.push(entity.id.clone());
                            continue;
                        }
                    }
                }
                PlacementState::Free { .. } | PlacementState::Undetermined => {}
            }

            batch.push((next, crossed));
        }

        Ok(batch)
    }

    /// Resolves `(x, y)` for `id`, creating the entity when unseen, and
    /// commits the result. On error nothing changes.
    pub fn place(&mut self, id: &str, args: &PlaceArgs) -> Result<PlacementState> {
        self.ensure_open()?;
        if id.is_empty() {
            return Err(ControlError::InvalidArgument("entity id must not be empty".to_string()));
        }

        let (current, last_heading, kind) = match self.state.get_entity(id) {
            Some(entity) => {
                if entity.kind != args.kind {
                    log::debug!(
                        "Placement for '{}' requested as {}, keeping existing kind {}",
                        id, args.kind, entity.kind
                    );
                }
                (entity.placement.clone(), entity.heading, entity.kind)
            }
            None => (PlacementState::Undetermined, args.heading.unwrap_or(0.0), args.kind),
        };

        let request = PlacementRequest {
            point: Point::new(args.x, args.y),
            edge_hint: args.edge.as_deref(),
            lane_hint: args.lane,
            heading: args.heading,
            kind,
            radius: args.radius.unwrap_or(self.default_radius),
            keep_route: args.keep_route,
        };
        let resolved = self.mapper.resolve(&request, &current, last_heading)?;

        let heading = match &resolved {
            PlacementState::OnLane { edge_id, lane_index, offset, .. } => self
                .network()
                .lane_ref(edge_id, *lane_index)
                .map(|lane| self.network().lane(lane).heading_at(*offset))
                .unwrap_or(last_heading),
            PlacementState::Free { heading, .. } => *heading,
            PlacementState::Undetermined => last_heading,
        };

        let behavior = &mut self.behavior;
        let entity = self.state.entities.entry(id.to_string()).or_insert_with(|| {
            log::debug!("Created {} '{}'", kind, id);
            Entity::new(id, kind, behavior.sample_speed_factor(kind))
        });
        entity.placement = resolved.clone();
        entity.heading = heading;

        Ok(resolved)
    }

    /// Adds a new entity directly onto a lane.
    pub fn insert(&mut self, id: &str, args: &InsertArgs) -> Result<PlacementState> {
        self.ensure_open()?;
        if id.is_empty() {
            return Err(ControlError::InvalidArgument("entity id must not be empty".to_string()));
        }
        if self.state.get_entity(id).is_some() {
            return Err(ControlError::InvalidArgument(format!("entity '{}' already exists", id)));
        }

        let network = Arc::clone(self.network());
        let edge = network
            .edge_by_id(&args.edge)
            .ok_or_else(|| ControlError::InvalidHint(format!("unknown edge '{}'", args.edge)))?;
        let lane = edge.lane(args.lane).ok_or_else(|| {
            ControlError::InvalidHint(format!(
                "lane index {} out of range for edge '{}' with {} lanes",
                args.lane,
                args.edge,
                edge.lanes().len()
            ))
        })?;
        if !lane.allows(args.kind) {
            return Err(ControlError::InvalidHint(format!("lane {} does not allow {}", lane.id(), args.kind)));
        }
        if !args.offset.is_finite() || args.offset < 0.0 || args.offset > lane.length() {
            return Err(ControlError::InvalidArgument(format!(
                "offset {} outside lane {} of length {:.2}",
                args.offset,
                lane.id(),
                lane.length()
            )));
        }
        if !args.speed.is_finite() || args.speed < 0.0 {
            return Err(ControlError::InvalidArgument(format!("speed {} must be non-negative", args.speed)));
        }
        if args.exit_time.is_some_and(|t| !t.is_finite()) {
            return Err(ControlError::InvalidArgument("exit time is not finite".to_string()));
        }

        let mut entity = Entity::new(id, args.kind, self.behavior.sample_speed_factor(args.kind));
        if !args.route.is_empty() {
            validate_route(&network, &args.route).map_err(ControlError::InvalidHint)?;
            entity.route = args.route.clone();
            entity.route_position = entity
                .route_index_of(&args.edge)
                .ok_or_else(|| ControlError::InvalidHint(format!("route does not contain edge '{}'", args.edge)))?;
        }

        entity.placement = PlacementState::OnLane {
            edge_id: args.edge.clone(),
            lane_index: args.lane,
            offset: args.offset,
            lateral_offset: 0.0,
        };
        entity.heading = lane.heading_at(args.offset);
        entity.speed = args.speed;
        entity.exit_time = args.exit_time;

        log::debug!("Inserted {} '{}' on lane {} at {:.2}m", args.kind, id, lane.id(), args.offset);
        let placement = entity.placement.clone();
        self.state.add_entity(entity);
        Ok(placement)
    }

    pub fn position(&self, id: &str) -> Result<(f64, f64)> {
        let entity = self.entity(id)?;
        let point = entity.placement.world_position(self.network()).ok_or_else(|| {
            ControlError::InvalidArgument(format!("entity '{}' has no resolved position", id))
        })?;
        Ok((point.x, point.y))
    }

    pub fn placement(&self, id: &str) -> Result<&PlacementState> {
        Ok(&self.entity(id)?.placement)
    }

    pub fn heading(&self, id: &str) -> Result<f64> {
        Ok(self.entity(id)?.heading)
    }

    pub fn speed(&self, id: &str) -> Result<f64> {
        Ok(self.entity(id)?.speed)
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.state
            .remove_entity(id)
            .map(|entity| log::debug!("Removed {} '{}'", entity.kind, id))
            .ok_or_else(|| ControlError::UnknownEntity(id.to_string()))
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.state.entities.keys().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.state.entities.len()
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        Ok(Snapshot::capture(self.network(), &self.state))
    }

    /// Ends the session. Entities become unreachable and the clock stops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let counts = self.state.get_kind_counts();
        log::info!(
            "Closing session at tick {} ({} vehicles, {} persons)",
            self.state.clock.tick(),
            counts.get(&EntityKind::Vehicle).copied().unwrap_or(0),
            counts.get(&EntityKind::Person).copied().unwrap_or(0)
        );
        self.state.entities.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn failed_step_commits_nothing() {
        let mut config = SessionConfig::default();
        config.simulation.step_length = 0.0;
        let mut session = ControlSession::with_index(testing::corridor_index(), &config);

        let mut args = InsertArgs::new(EntityKind::Vehicle, "WE", 1, 40.0);
        args.speed = 6.0;
        let before = session.insert("v", &args).unwrap();
        session.place("p", &PlaceArgs::new(EntityKind::Person, 300.0, 300.0).with_radius(0.0)).unwrap();

        let err = session.step().unwrap_err();
        assert_eq!(err.code(), "motion_error");

        assert!(!session.is_closed());
        assert_eq!(session.tick(), 0);
        assert_eq!(session.placement("v").unwrap(), &before);
        assert_eq!(session.speed("v").unwrap(), 6.0);
        assert_eq!(session.entity_count(), 2);
        assert_eq!(session.performance().sample_count(), 0);

        // Retrying fails the same way and still leaves no timing sample
        assert!(session.step().is_err());
        assert_eq!(session.tick(), 0);
        assert_eq!(session.performance().sample_count(), 0);
    }

    #[test]
    fn successful_steps_are_timed() {
        let mut session = ControlSession::with_index(testing::corridor_index(), &SessionConfig::default());
        session.insert("v", &InsertArgs::new(EntityKind::Vehicle, "WE", 1, 0.0)).unwrap();

        session.step().unwrap();
        session.step().unwrap();
        assert_eq!(session.performance().sample_count(), 2);
    }
}
