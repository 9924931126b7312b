use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::network::{LaneRef, Network};
use crate::simulation::{EntityKind, PlacementState, SimulationState};

/// Full state dump of a session at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub network: String,
    pub tick: u64,
    pub time: f64,
    pub entities: Vec<EntitySnapshot>,
    pub lanes: Vec<LaneSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    pub kind: EntityKind,
    pub placement: PlacementState,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
}

/// Occupancy of one lane; `mean_speed` is 0 for empty lanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub id: String,
    pub occupancy: usize,
    pub mean_speed: f64,
}

impl Snapshot {
    pub fn capture(network: &Network, state: &SimulationState) -> Self {
        let mut per_lane: HashMap<LaneRef, (usize, f64)> = HashMap::new();
        let mut entities = Vec::with_capacity(state.entities.len());

        for entity in state.entities.values() {
            if let PlacementState::OnLane { edge_id, lane_index, .. } = &entity.placement {
                if let Some(lane) = network.lane_ref(edge_id, *lane_index) {
                    let slot = per_lane.entry(lane).or_insert((0, 0.0));
                    slot.0 += 1;
                    slot.1 += entity.speed;
                }
            }

            let Some(position) = entity.placement.world_position(network) else {
                continue;
            };
            entities.push(EntitySnapshot {
                id: entity.id.clone(),
                kind: entity.kind,
                placement: entity.placement.clone(),
                x: position.x,
                y: position.y,
                heading: entity.heading,
                speed: entity.speed,
            });
        }

        let lanes = network
            .lane_refs()
            .map(|lane| {
                let (occupancy, speed_sum) = per_lane.get(&lane).copied().unwrap_or((0, 0.0));
                LaneSnapshot {
                    id: network.lane(lane).id(),
                    occupancy,
                    mean_speed: if occupancy == 0 { 0.0 } else { speed_sum / occupancy as f64 },
                }
            })
            .collect();

        Self {
            network: network.name().to_string(),
            tick: state.clock.tick(),
            time: state.clock.time(),
            entities,
            lanes,
        }
    }

    pub fn lane(&self, id: &str) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|l| l.id == id)
    }
}
