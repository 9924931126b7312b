use std::sync::Arc;

use super::{Entity, EntityKind};
use crate::network::{LaneRef, Network};

/// Upper bound on edges crossed in one step.
const MAX_TRANSITIONS_PER_STEP: usize = 64;

/// Outcome of moving an on-lane entity forward. `junctions` lists the ids
/// of junctions crossed during the move, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    OnLane {
        lane: LaneRef,
        offset: f64,
        route_position: usize,
        junctions: Vec<String>,
    },
    /// Ran off the end of `lane` with no usable successor.
    Boundary { lane: LaneRef, junctions: Vec<String> },
    /// Finished the last edge of its route.
    Arrived,
}

enum NextEdge {
    Edge(usize, Option<usize>),
    RouteEnd,
    DeadEnd,
}

/// Walks entities along lanes and across junctions into successor edges.
pub struct TrafficManager {
    network: Arc<Network>,
}

impl TrafficManager {
    pub fn new(network: Arc<Network>) -> Self {
        Self { network }
    }

    pub fn advance(&self, entity: &Entity, lane: LaneRef, offset: f64, distance: f64) -> Advance {
        let mut lane = lane;
        let mut offset = offset + distance.max(0.0);
        let mut route_position = entity.route_position;
        let mut junctions = Vec::new();

        for _ in 0..MAX_TRANSITIONS_PER_STEP {
            let length = self.network.lane(lane).length();
            if offset <= length {
                return Advance::OnLane { lane, offset, route_position, junctions };
            }
            let leftover = offset - length;

            let (edge, next_route_position) = match self.next_edge(entity, lane.edge, route_position) {
                NextEdge::Edge(edge, position) => (edge, position),
                NextEdge::RouteEnd => return Advance::Arrived,
                NextEdge::DeadEnd => return Advance::Boundary { lane, junctions },
            };
            let Some(entry) = self.entry_lane(edge, lane.lane, entity.kind) else {
                return Advance::Boundary { lane, junctions };
            };

            log::debug!(
                "Entity '{}' crosses from {} to {}",
                entity.id,
                self.network.lane(lane).id(),
                self.network.lane(LaneRef { edge, lane: entry }).id()
            );

            junctions.push(self.network.edge(lane.edge).to.clone());
            lane = LaneRef { edge, lane: entry };
            offset = leftover;
            if let Some(position) = next_route_position {
                route_position = position;
            }
        }

        log::warn!("Entity '{}' crossed too many edges in one step, holding at lane end", entity.id);
        let length = self.network.lane(lane).length();
        Advance::OnLane { lane, offset: length, route_position, junctions }
    }

    fn next_edge(&self, entity: &Entity, edge: usize, route_position: usize) -> NextEdge {
        let edge_id = &self.network.edge(edge).id;

        if let Some(index) = entity.route_index_from(edge_id, route_position) {
            return match entity.route.get(index + 1) {
                Some(next_id) => match self.network.edge_index(next_id) {
                    Some(next) => NextEdge::Edge(next, Some(index + 1)),
                    None => NextEdge::DeadEnd,
                },
                None => NextEdge::RouteEnd,
            };
        }

        let successors = self.network.successors(edge);
        let current = self.network.edge(edge);
        let usable = |&&next: &&usize| self.has_lane_for(next, entity.kind);

        // Turning back is the last resort
        successors
            .iter()
            .filter(|&&next| !self.network.edge(next).is_reverse_of(current))
            .find(usable)
            .or_else(|| successors.iter().find(usable))
            .map(|&next| NextEdge::Edge(next, None))
            .unwrap_or(NextEdge::DeadEnd)
    }

    fn has_lane_for(&self, edge: usize, kind: EntityKind) -> bool {
        self.network.edge(edge).lanes().iter().any(|l| l.allows(kind))
    }

    /// Lane to enter on `edge`: the same index when allowed, else the
    /// lowest index allowing `kind`.
    fn entry_lane(&self, edge: usize, lane_index: usize, kind: EntityKind) -> Option<usize> {
        let lanes = self.network.edge(edge).lanes();
        let preferred = lane_index.min(lanes.len().saturating_sub(1));
        if lanes.get(preferred).is_some_and(|l| l.allows(kind)) {
            return Some(preferred);
        }
        lanes.iter().position(|l| l.allows(kind))
    }
}

/// Routes must name existing edges, each leaving where the previous ends.
pub fn validate_route(network: &Network, route: &[String]) -> Result<(), String> {
    for pair in route.windows(2) {
        let (Some(from), Some(to)) = (network.edge_by_id(&pair[0]), network.edge_by_id(&pair[1])) else {
            continue;
        };
        if from.to != to.from {
            return Err(format!("route edge '{}' does not continue from '{}'", to.id, from.id));
        }
    }
    if let Some(missing) = route.iter().find(|id| network.edge_by_id(id).is_none()) {
        return Err(format!("route references unknown edge '{}'", missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn manager() -> (Arc<Network>, TrafficManager) {
        let network = Arc::new(testing::corridor());
        (Arc::clone(&network), TrafficManager::new(network))
    }

    #[test]
    fn stays_on_lane_before_end() {
        let (network, manager) = manager();
        let lane = network.lane_ref("WE", 1).unwrap();
        let entity = Entity::new("v", EntityKind::Vehicle, 1.0);

        let advance = manager.advance(&entity, lane, 10.0, 15.0);
        assert_eq!(
            advance,
            Advance::OnLane { lane, offset: 25.0, route_position: 0, junctions: vec![] }
        );
    }

    #[test]
    fn crosses_into_non_reverse_successor() {
        let (network, manager) = manager();
        let lane = network.lane_ref("WE", 1).unwrap();
        let entity = Entity::new("v", EntityKind::Vehicle, 1.0);

        match manager.advance(&entity, lane, 175.0, 10.0) {
            Advance::OnLane { lane, offset, junctions, .. } => {
                assert_eq!(network.lane(lane).id(), "EN_0");
                assert!((offset - 5.0).abs() < 1e-9);
                assert_eq!(junctions, vec!["E".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dead_end_becomes_boundary() {
        let (network, manager) = manager();
        let lane = network.lane_ref("EN", 0).unwrap();
        let entity = Entity::new("v", EntityKind::Vehicle, 1.0);

        assert_eq!(
            manager.advance(&entity, lane, 179.0, 5.0),
            Advance::Boundary { lane, junctions: vec![] }
        );
    }

    #[test]
    fn follows_route_and_arrives() {
        let (network, manager) = manager();
        let lane = network.lane_ref("WE", 1).unwrap();
        let mut entity = Entity::new("v", EntityKind::Vehicle, 1.0);
        entity.route = vec!["WE".into(), "EW".into()];

        match manager.advance(&entity, lane, 179.0, 3.0) {
            Advance::OnLane { lane, route_position, .. } => {
                assert_eq!(network.lane(lane).id(), "EW_1");
                assert_eq!(route_position, 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        entity.route_position = 1;
        let ew = network.lane_ref("EW", 1).unwrap();
        assert_eq!(manager.advance(&entity, ew, 179.0, 3.0), Advance::Arrived);
    }

    #[test]
    fn route_connectivity_is_checked() {
        let network = testing::corridor();
        assert!(validate_route(&network, &["WE".into(), "EN".into()]).is_ok());
        assert!(validate_route(&network, &["EN".into(), "WE".into()]).is_err());
        assert!(validate_route(&network, &["WE".into(), "XX".into()]).is_err());
    }
}
