use anyhow::Result;
use std::collections::HashMap;

use crate::config::{NetworkConfig, Validate};
use crate::simulation::{EntityKind, Point};

pub mod geometry;
pub mod index;

pub use geometry::*;
pub use index::*;

/// Dense handle to a lane: edge position in [`Network::edges`] plus lane index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneRef {
    pub edge: usize,
    pub lane: usize,
}

#[derive(Debug, Clone)]
pub struct Junction {
    pub id: String,
    pub center: Point,
    pub radius: f64,
}

impl Junction {
    pub fn contains(&self, point: &Point) -> bool {
        (point - self.center).norm() <= self.radius
    }
}

#[derive(Debug, Clone)]
pub struct Lane {
    pub edge_id: String,
    pub index: usize,
    pub width: f64,
    pub speed_limit: f64,
    allow: Vec<EntityKind>,
    shape: Polyline,
}

impl Lane {
    pub fn id(&self) -> String {
        format!("{}_{}", self.edge_id, self.index)
    }

    pub fn shape(&self) -> &Polyline {
        &self.shape
    }

    pub fn length(&self) -> f64 {
        self.shape.length()
    }

    pub fn allows(&self, kind: EntityKind) -> bool {
        self.allow.is_empty() || self.allow.contains(&kind)
    }

    /// World position at `offset` along the lane, shifted `lateral` to the left.
    pub fn position_at(&self, offset: f64, lateral: f64) -> Point {
        let base = self.shape.position_at(offset);
        if lateral == 0.0 {
            return base;
        }
        base + left_normal(&self.shape.direction_at(offset)) * lateral
    }

    pub fn heading_at(&self, offset: f64) -> f64 {
        self.shape.heading_at(offset)
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub speed_limit: f64,
    shape: Polyline,
    lanes: Vec<Lane>,
}

impl Edge {
    pub fn shape(&self) -> &Polyline {
        &self.shape
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    pub fn is_reverse_of(&self, other: &Edge) -> bool {
        self.from == other.to && self.to == other.from
    }
}

/// Read-only road graph. Edges are kept sorted by id, so edge positions order
/// the same way as their identifiers.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    edges: Vec<Edge>,
    edge_lookup: HashMap<String, usize>,
    junctions: Vec<Junction>,
    junction_lookup: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
}

impl Network {
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        config.validate()?;

        let junctions: Vec<Junction> = config.junctions
            .iter()
            .map(|j| Junction {
                id: j.id.clone(),
                center: Point::new(j.x, j.y),
                radius: j.radius,
            })
            .collect();
        let junction_lookup = junctions
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id.clone(), i))
            .collect();

        let mut edge_configs: Vec<_> = config.edges.iter().collect();
        edge_configs.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges = Vec::with_capacity(edge_configs.len());
        for edge_config in edge_configs {
            let shape = Polyline::new(
                edge_config.shape.iter().map(|[x, y]| Point::new(*x, *y)).collect(),
            );

            // Lanes are stacked right to left around the edge centerline
            let total_width: f64 = edge_config.lanes.iter().map(|l| l.width).sum();
            let mut consumed = 0.0;
            let mut lanes = Vec::with_capacity(edge_config.lanes.len());
            for (index, lane_config) in edge_config.lanes.iter().enumerate() {
                let center_offset = -total_width / 2.0 + consumed + lane_config.width / 2.0;
                consumed += lane_config.width;

                lanes.push(Lane {
                    edge_id: edge_config.id.clone(),
                    index,
                    width: lane_config.width,
                    speed_limit: lane_config.speed_limit.unwrap_or(edge_config.speed_limit),
                    allow: lane_config.allow.clone(),
                    shape: shape.offset_laterally(center_offset),
                });
            }

            edges.push(Edge {
                id: edge_config.id.clone(),
                from: edge_config.from.clone(),
                to: edge_config.to.clone(),
                speed_limit: edge_config.speed_limit,
                shape,
                lanes,
            });
        }

        let edge_lookup = edges
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.from.clone()).or_default().push(i);
        }

        log::debug!(
            "Built network '{}': {} edges, {} junctions",
            config.network.name,
            edges.len(),
            junctions.len()
        );

        Ok(Self {
            name: config.network.name.clone(),
            edges,
            edge_lookup,
            junctions,
            junction_lookup,
            outgoing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> &Edge {
        &self.edges[index]
    }

    pub fn edge_index(&self, id: &str) -> Option<usize> {
        self.edge_lookup.get(id).copied()
    }

    pub fn edge_by_id(&self, id: &str) -> Option<&Edge> {
        self.edge_index(id).map(|i| &self.edges[i])
    }

    pub fn lane(&self, lane: LaneRef) -> &Lane {
        &self.edges[lane.edge].lanes[lane.lane]
    }

    pub fn lane_ref(&self, edge_id: &str, lane_index: usize) -> Option<LaneRef> {
        let edge = self.edge_index(edge_id)?;
        (lane_index < self.edges[edge].lanes.len()).then_some(LaneRef { edge, lane: lane_index })
    }

    pub fn lane_refs(&self) -> impl Iterator<Item = LaneRef> + '_ {
        self.edges.iter().enumerate().flat_map(|(edge, e)| {
            (0..e.lanes.len()).map(move |lane| LaneRef { edge, lane })
        })
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    pub fn junction(&self, id: &str) -> Option<&Junction> {
        self.junction_lookup.get(id).map(|&i| &self.junctions[i])
    }

    /// Edges leaving the end junction of `edge`, in id order.
    pub fn successors(&self, edge: usize) -> &[usize] {
        self.outgoing
            .get(&self.edges[edge].to)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
