//! Resolution of free world coordinates into lane-relative or free
//! placements.

use std::sync::Arc;

use crate::error::{ControlError, Result};
use crate::network::{compare_candidates, LaneCandidate, LaneRef, NetworkIndex};
use crate::simulation::{EntityKind, PlacementState, Point};

/// One placement query.
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub point: Point,
    /// Restrict matching to this edge. Empty is the same as `None`.
    pub edge_hint: Option<&'a str>,
    /// Only honoured together with an edge hint.
    pub lane_hint: Option<usize>,
    /// Degrees, counter-clockwise from +x.
    pub heading: Option<f64>,
    pub kind: EntityKind,
    /// Zero forces a free placement.
    pub radius: f64,
    /// Prefer the lanes of the current edge when already on a lane.
    pub keep_route: bool,
}

pub struct PositionMapper {
    index: Arc<NetworkIndex>,
    angle_tolerance: f64,
}

impl PositionMapper {
    pub fn new(index: Arc<NetworkIndex>, angle_tolerance: f64) -> Self {
        Self {
            index,
            angle_tolerance,
        }
    }

    pub fn index(&self) -> &Arc<NetworkIndex> {
        &self.index
    }

    pub fn angle_tolerance(&self) -> f64 {
        self.angle_tolerance
    }

    /// Resolves `request` for an entity currently at `current` whose last
    /// known heading is `last_heading`. Never mutates anything.
    pub fn resolve(
        &self,
        request: &PlacementRequest<'_>,
        current: &PlacementState,
        last_heading: f64,
    ) -> Result<PlacementState> {
        let point = request.point;
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "target position ({}, {}) is not finite",
                point.x, point.y
            )));
        }
        if request.radius.is_nan() || request.radius < 0.0 {
            return Err(ControlError::InvalidArgument(format!(
                "search radius {} must be non-negative",
                request.radius
            )));
        }
        if request.heading.is_some_and(|h| !h.is_finite()) {
            return Err(ControlError::InvalidArgument("heading is not finite".to_string()));
        }

        let edge_hint = request.edge_hint.filter(|e| !e.is_empty());
        let lane_hint = edge_hint.and(request.lane_hint);
        self.check_hints(edge_hint, lane_hint)?;

        let free = PlacementState::Free {
            x: point.x,
            y: point.y,
            heading: request.heading.unwrap_or(last_heading),
        };

        if request.radius == 0.0 {
            log::debug!("Radius 0 requested, placing freely at ({:.2}, {:.2})", point.x, point.y);
            return Ok(free);
        }

        if request.keep_route {
            if let Some(candidate) = self.keep_route_candidate(request, current, edge_hint, lane_hint) {
                log::debug!(
                    "Kept entity on current edge: {} at {:.2}m",
                    self.index.network().lane(candidate.lane).id(),
                    candidate.offset
                );
                return Ok(self.on_lane(&candidate, request.kind));
            }
        }

        let kind = request.kind;
        let mut candidates = self.index.nearest_lanes_filtered(point, request.radius, request.heading, |lane| {
            lane.allows(kind)
                && edge_hint.map_or(true, |e| lane.edge_id == e)
                && lane_hint.map_or(true, |l| lane.index == l)
        });

        // An explicit edge hint wins over the heading check
        if request.heading.is_some() && kind == EntityKind::Vehicle && edge_hint.is_none() {
            candidates.retain(|c| c.heading_delta <= self.angle_tolerance);
        }

        match candidates.first() {
            Some(best) => {
                log::debug!(
                    "Matched ({:.2}, {:.2}) to {} at {:.2}m, {:.2}m off centerline",
                    point.x,
                    point.y,
                    self.index.network().lane(best.lane).id(),
                    best.offset,
                    best.lateral_distance
                );
                Ok(self.on_lane(best, kind))
            }
            None => {
                log::debug!(
                    "No lane within {:.1}m of ({:.2}, {:.2}), placing freely",
                    request.radius,
                    point.x,
                    point.y
                );
                Ok(free)
            }
        }
    }

    fn check_hints(&self, edge_hint: Option<&str>, lane_hint: Option<usize>) -> Result<()> {
        let Some(edge_id) = edge_hint else {
            return Ok(());
        };
        let edge = self
            .index
            .network()
            .edge_by_id(edge_id)
            .ok_or_else(|| ControlError::InvalidHint(format!("unknown edge '{}'", edge_id)))?;

        if let Some(lane) = lane_hint {
            if lane >= edge.lanes().len() {
                return Err(ControlError::InvalidHint(format!(
                    "lane index {} out of range for edge '{}' with {} lanes",
                    lane,
                    edge_id,
                    edge.lanes().len()
                )));
            }
        }
        Ok(())
    }

    fn keep_route_candidate(
        &self,
        request: &PlacementRequest<'_>,
        current: &PlacementState,
        edge_hint: Option<&str>,
        lane_hint: Option<usize>,
    ) -> Option<LaneCandidate> {
        let PlacementState::OnLane { edge_id, lane_index, .. } = current else {
            return None;
        };
        if edge_hint.is_some_and(|e| e != edge_id.as_str()) {
            return None;
        }

        let network = self.index.network();
        let edge = network.edge_index(edge_id)?;
        let lane_count = network.edge(edge).lanes().len();
        let lowest = lane_index.saturating_sub(1);
        let highest = (lane_index + 1).min(lane_count.saturating_sub(1));

        let mut candidates: Vec<LaneCandidate> = (lowest..=highest)
            .filter(|&lane| lane_hint.map_or(true, |l| l == lane))
            .map(|lane| LaneRef { edge, lane })
            .filter(|&lane| network.lane(lane).allows(request.kind))
            .map(|lane| self.index.candidate(request.point, lane, request.heading))
            .collect();
        candidates.sort_by(compare_candidates);

        candidates
            .into_iter()
            .next()
            .filter(|c| c.lateral_distance <= request.radius)
    }

    /// Vehicles snap onto the centerline; pedestrians keep their lateral
    /// offset within the lane.
    fn on_lane(&self, candidate: &LaneCandidate, kind: EntityKind) -> PlacementState {
        let lane = self.index.network().lane(candidate.lane);
        let lateral_offset = match kind {
            EntityKind::Vehicle => 0.0,
            EntityKind::Person => candidate.signed_lateral.clamp(-lane.width / 2.0, lane.width / 2.0),
        };

        PlacementState::OnLane {
            edge_id: lane.edge_id.clone(),
            lane_index: lane.index,
            offset: candidate.offset,
            lateral_offset,
        }
    }
}
