use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{heading_delta, Lane, LaneRef, Network, Projection};
use crate::simulation::Point;

/// A lane within search range of a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneCandidate {
    pub lane: LaneRef,
    pub offset: f64,
    pub lateral_distance: f64,
    pub signed_lateral: f64,
    /// Difference between the query heading and the lane heading at `offset`;
    /// zero when the query carried no heading.
    pub heading_delta: f64,
}

/// Uniform grid over lane segments. Built once, never mutated, safe to share
/// between threads behind an `Arc`.
#[derive(Debug)]
pub struct NetworkIndex {
    network: Arc<Network>,
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<LaneRef>>,
}

impl NetworkIndex {
    pub fn new(network: Arc<Network>, cell_size: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<LaneRef>> = HashMap::new();

        for lane_ref in network.lane_refs() {
            let lane = network.lane(lane_ref);
            for (a, b) in lane.shape().segments() {
                let (min_x, max_x) = (a.x.min(b.x), a.x.max(b.x));
                let (min_y, max_y) = (a.y.min(b.y), a.y.max(b.y));
                let (cx0, cy0) = cell_of(min_x, min_y, cell_size);
                let (cx1, cy1) = cell_of(max_x, max_y, cell_size);

                for cx in cx0..=cx1 {
                    for cy in cy0..=cy1 {
                        let cell = cells.entry((cx, cy)).or_default();
                        // A lane's segments are visited consecutively
                        if cell.last() != Some(&lane_ref) {
                            cell.push(lane_ref);
                        }
                    }
                }
            }
        }

        log::debug!(
            "Indexed network '{}' into {} cells of {:.1}m",
            network.name(),
            cells.len(),
            cell_size
        );

        Self {
            network,
            cell_size,
            cells,
        }
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn project(&self, point: Point, lane: LaneRef) -> Projection {
        self.network.lane(lane).shape().project(point)
    }

    /// Projects `point` onto `lane` and scores it against an optional heading.
    pub fn candidate(&self, point: Point, lane: LaneRef, heading: Option<f64>) -> LaneCandidate {
        let projection = self.project(point, lane);
        let heading_delta = heading
            .map(|h| heading_delta(h, self.network.lane(lane).heading_at(projection.offset)))
            .unwrap_or(0.0);

        LaneCandidate {
            lane,
            offset: projection.offset,
            lateral_distance: projection.lateral_distance,
            signed_lateral: projection.signed_lateral,
            heading_delta,
        }
    }

    pub fn nearest_lanes(&self, point: Point, radius: f64, heading: Option<f64>) -> Vec<LaneCandidate> {
        self.nearest_lanes_filtered(point, radius, heading, |_| true)
    }

    /// Lanes passing `filter` whose centerline lies within `radius` of
    /// `point`, best first.
    pub fn nearest_lanes_filtered<F>(
        &self,
        point: Point,
        radius: f64,
        heading: Option<f64>,
        filter: F,
    ) -> Vec<LaneCandidate>
    where
        F: Fn(&Lane) -> bool,
    {
        if !(radius >= 0.0) {
            return Vec::new();
        }

        let mut candidates: Vec<LaneCandidate> = self
            .lanes_near(point, radius)
            .into_iter()
            .filter(|&lane| filter(self.network.lane(lane)))
            .map(|lane| self.candidate(point, lane, heading))
            .filter(|c| c.lateral_distance <= radius)
            .collect();

        candidates.sort_by(compare_candidates);
        candidates
    }

    fn lanes_near(&self, point: Point, radius: f64) -> BTreeSet<LaneRef> {
        let span = (2.0 * radius / self.cell_size).ceil() + 1.0;
        if !radius.is_finite() || span * span > self.cells.len() as f64 {
            return self.network.lane_refs().collect();
        }

        let (cx0, cy0) = cell_of(point.x - radius, point.y - radius, self.cell_size);
        let (cx1, cy1) = cell_of(point.x + radius, point.y + radius, self.cell_size);

        let mut lanes = BTreeSet::new();
        for cx in cx0..=cx1 {
            for cy in cy0..=cy1 {
                if let Some(cell) = self.cells.get(&(cx, cy)) {
                    lanes.extend(cell.iter().copied());
                }
            }
        }
        lanes
    }
}

/// Candidate ranking: lateral distance, then heading difference, then edge id
/// and lane index.
pub fn compare_candidates(a: &LaneCandidate, b: &LaneCandidate) -> Ordering {
    a.lateral_distance
        .total_cmp(&b.lateral_distance)
        .then(a.heading_delta.total_cmp(&b.heading_delta))
        .then(a.lane.cmp(&b.lane))
}

fn cell_of(x: f64, y: f64, cell_size: f64) -> (i64, i64) {
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn edge_ids(index: &NetworkIndex, candidates: &[LaneCandidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| index.network().lane(c.lane).id())
            .collect()
    }

    #[test]
    fn orders_by_lateral_distance() {
        let index = testing::corridor_index();
        let found = index.nearest_lanes(Point::new(100.0, -2.0), 10.0, None);

        assert_eq!(edge_ids(&index, &found), vec!["WE_1", "WE_0", "EW_1", "EW_0"]);
        assert!((found[0].lateral_distance - 0.4).abs() < 1e-9);
        assert!((found[0].offset - 90.0).abs() < 1e-9);
        assert!(found.windows(2).all(|w| w[0].lateral_distance <= w[1].lateral_distance));
    }

    #[test]
    fn equal_distance_breaks_on_heading() {
        let index = testing::corridor_index();
        // Midway between the two driving lanes
        let found = index.nearest_lanes(Point::new(100.0, 0.0), 2.0, Some(180.0));

        assert_eq!(edge_ids(&index, &found), vec!["EW_1", "WE_1"]);
        assert_eq!(found[0].heading_delta, 0.0);
        assert_eq!(found[1].heading_delta, 180.0);
    }

    #[test]
    fn equal_distance_without_heading_breaks_on_edge_id() {
        let index = testing::corridor_index();
        let found = index.nearest_lanes(Point::new(100.0, 0.0), 2.0, None);
        assert_eq!(edge_ids(&index, &found), vec!["EW_1", "WE_1"]);
    }

    #[test]
    fn empty_when_out_of_range() {
        let index = testing::corridor_index();
        assert!(index.nearest_lanes(Point::new(100.0, 80.0), 20.0, None).is_empty());
        assert!(index.nearest_lanes(Point::new(100.0, 80.0), -1.0, None).is_empty());
    }

    #[test]
    fn infinite_radius_scans_everything() {
        let index = testing::corridor_index();
        let found = index.nearest_lanes(Point::new(-5000.0, 5000.0), f64::INFINITY, None);
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn filter_restricts_candidates() {
        let index = testing::corridor_index();
        let found = index.nearest_lanes_filtered(Point::new(100.0, -2.0), 10.0, None, |lane| {
            lane.edge_id == "EW"
        });
        assert_eq!(edge_ids(&index, &found), vec!["EW_1", "EW_0"]);
    }

    #[test]
    fn concurrent_readers_agree() {
        let index = testing::corridor_index();
        let expected = index.nearest_lanes(Point::new(150.0, 1.0), 30.0, Some(0.0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let index = Arc::clone(&index);
                let expected = expected.clone();
                scope.spawn(move || {
                    let found = index.nearest_lanes(Point::new(150.0, 1.0), 30.0, Some(0.0));
                    assert_eq!(found, expected);
                });
            }
        });
    }
}
