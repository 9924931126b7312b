use serde::{Deserialize, Serialize};
use anyhow::{Result, anyhow};
use std::collections::HashSet;
use super::Validate;
use crate::simulation::EntityKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub network: NetworkInfo,
    #[serde(default)]
    pub junctions: Vec<JunctionConfig>,
    pub edges: Vec<EdgeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JunctionConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_junction_radius")]
    pub radius: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeConfig {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Centerline as `[x, y]` pairs in travel direction.
    pub shape: Vec<[f64; 2]>,
    #[serde(default = "default_speed_limit")]
    pub speed_limit: f64,
    /// Lanes from right (index 0) to left.
    pub lanes: Vec<LaneConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaneConfig {
    #[serde(default = "default_lane_width")]
    pub width: f64,
    /// Entity kinds allowed on this lane; empty means all.
    #[serde(default)]
    pub allow: Vec<EntityKind>,
    #[serde(default)]
    pub speed_limit: Option<f64>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            width: default_lane_width(),
            allow: Vec::new(),
            speed_limit: None,
        }
    }
}

fn default_junction_radius() -> f64 {
    10.0
}

fn default_speed_limit() -> f64 {
    13.89
}

fn default_lane_width() -> f64 {
    3.2
}

impl Validate for NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.edges.is_empty() {
            return Err(anyhow!("Network '{}' defines no edges", self.network.name));
        }

        let mut junction_ids = HashSet::new();
        for junction in &self.junctions {
            if junction.id.is_empty() {
                return Err(anyhow!("Junction ids must not be empty"));
            }
            if !junction_ids.insert(junction.id.as_str()) {
                return Err(anyhow!("Duplicate junction id '{}'", junction.id));
            }
            if !junction.x.is_finite() || !junction.y.is_finite() {
                return Err(anyhow!("Junction '{}' has a non-finite position", junction.id));
            }
            if !(junction.radius > 0.0) {
                return Err(anyhow!("Junction '{}' radius must be positive", junction.id));
            }
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if edge.id.is_empty() {
                return Err(anyhow!("Edge ids must not be empty"));
            }
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(anyhow!("Duplicate edge id '{}'", edge.id));
            }

            for junction in [&edge.from, &edge.to] {
                if !junction_ids.contains(junction.as_str()) {
                    return Err(anyhow!("Edge '{}' references unknown junction '{}'", edge.id, junction));
                }
            }

            if edge.shape.len() < 2 {
                return Err(anyhow!("Edge '{}' shape needs at least two points", edge.id));
            }
            if edge.shape.iter().flatten().any(|c| !c.is_finite()) {
                return Err(anyhow!("Edge '{}' shape contains non-finite coordinates", edge.id));
            }
            let length: f64 = edge.shape.windows(2)
                .map(|w| ((w[1][0] - w[0][0]).powi(2) + (w[1][1] - w[0][1]).powi(2)).sqrt())
                .sum();
            if length <= 0.0 {
                return Err(anyhow!("Edge '{}' shape has zero length", edge.id));
            }

            if !(edge.speed_limit > 0.0) {
                return Err(anyhow!("Edge '{}' speed limit must be positive", edge.id));
            }

            if edge.lanes.is_empty() {
                return Err(anyhow!("Edge '{}' must have at least one lane", edge.id));
            }
            for (index, lane) in edge.lanes.iter().enumerate() {
                if !(lane.width > 0.0) {
                    return Err(anyhow!("Lane {} of edge '{}' width must be positive", index, edge.id));
                }
                if let Some(limit) = lane.speed_limit {
                    if !(limit > 0.0) {
                        return Err(anyhow!("Lane {} of edge '{}' speed limit must be positive", index, edge.id));
                    }
                }
            }
        }

        Ok(())
    }
}
