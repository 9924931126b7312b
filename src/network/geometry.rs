use crate::simulation::{Point, Vec2};

/// Result of projecting a point orthogonally onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Distance along the polyline, clamped to `[0, length]`.
    pub offset: f64,
    /// Distance from the point to the closest segment.
    pub lateral_distance: f64,
    /// `lateral_distance` with sign: positive left of the travel direction.
    pub signed_lateral: f64,
}

/// Immutable centerline with cumulative vertex distances.
#[derive(Debug, Clone)]
pub struct Polyline {
    points: Vec<Point>,
    cumulative: Vec<f64>,
}

impl Polyline {
    /// Builds a polyline, dropping consecutive duplicate vertices. Callers
    /// must supply at least two distinct points.
    pub fn new(points: Vec<Point>) -> Self {
        let mut deduped: Vec<Point> = Vec::with_capacity(points.len());
        for point in points {
            if deduped.last().map_or(true, |last| (point - last).norm() > 1e-9) {
                deduped.push(point);
            }
        }

        let mut cumulative = Vec::with_capacity(deduped.len());
        let mut total = 0.0;
        for (i, point) in deduped.iter().enumerate() {
            if i > 0 {
                total += (point - deduped[i - 1]).norm();
            }
            cumulative.push(total);
        }

        Self {
            points: deduped,
            cumulative,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }

    fn segment_index(&self, offset: f64) -> usize {
        let segment_count = self.points.len().saturating_sub(1).max(1);
        self.cumulative
            .partition_point(|&c| c <= offset)
            .saturating_sub(1)
            .min(segment_count - 1)
    }

    pub fn position_at(&self, offset: f64) -> Point {
        if self.points.len() < 2 {
            return self.points.first().copied().unwrap_or_else(Point::origin);
        }
        let offset = offset.clamp(0.0, self.length());
        let i = self.segment_index(offset);
        let (a, b) = (self.points[i], self.points[i + 1]);
        let segment_length = self.cumulative[i + 1] - self.cumulative[i];
        let t = (offset - self.cumulative[i]) / segment_length;
        a + (b - a) * t
    }

    /// Unit travel direction at `offset`.
    pub fn direction_at(&self, offset: f64) -> Vec2 {
        if self.points.len() < 2 {
            return Vec2::x();
        }
        let i = self.segment_index(offset.clamp(0.0, self.length()));
        (self.points[i + 1] - self.points[i]).normalize()
    }

    /// Heading in degrees at `offset`.
    pub fn heading_at(&self, offset: f64) -> f64 {
        let direction = self.direction_at(offset);
        normalize_heading(direction.y.atan2(direction.x).to_degrees())
    }

    pub fn project(&self, point: Point) -> Projection {
        let mut best = Projection {
            offset: 0.0,
            lateral_distance: f64::INFINITY,
            signed_lateral: f64::INFINITY,
        };

        for (i, (a, b)) in self.segments().enumerate() {
            let d = b - a;
            let length_sq = d.norm_squared();
            let t = ((point - a).dot(&d) / length_sq).clamp(0.0, 1.0);
            let closest = a + d * t;
            let distance = (point - closest).norm();

            if distance < best.lateral_distance {
                let cross = d.x * (point.y - a.y) - d.y * (point.x - a.x);
                best = Projection {
                    offset: self.cumulative[i] + t * length_sq.sqrt(),
                    lateral_distance: distance,
                    signed_lateral: if cross >= 0.0 { distance } else { -distance },
                };
            }
        }

        best
    }

    /// Parallel polyline shifted `distance` to the left (negative: right),
    /// using mitred vertices.
    pub fn offset_laterally(&self, distance: f64) -> Polyline {
        if distance == 0.0 || self.points.len() < 2 {
            return self.clone();
        }

        let normals: Vec<Vec2> = self
            .segments()
            .map(|(a, b)| left_normal(&(b - a).normalize()))
            .collect();
        let last = self.points.len() - 1;

        let shifted = self
            .points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let normal = if i == 0 {
                    normals[0]
                } else if i == last {
                    normals[last - 1]
                } else {
                    let sum = normals[i - 1] + normals[i];
                    if sum.norm() < 1e-9 {
                        normals[i]
                    } else {
                        // Miter length is capped for very sharp corners
                        let bisector = sum.normalize();
                        bisector / bisector.dot(&normals[i]).max(0.25)
                    }
                };
                point + normal * distance
            })
            .collect();

        Polyline::new(shifted)
    }
}

pub fn left_normal(direction: &Vec2) -> Vec2 {
    Vec2::new(-direction.y, direction.x)
}

/// Maps any angle in degrees into `[0, 360)`.
pub fn normalize_heading(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Absolute difference between two headings, in `[0, 180]`.
pub fn heading_delta(a: f64, b: f64) -> f64 {
    let diff = normalize_heading(a - b);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l_shape() -> Polyline {
        Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 50.0),
        ])
    }

    #[test]
    fn length_and_position() {
        let line = l_shape();
        assert_eq!(line.length(), 150.0);
        assert_eq!(line.position_at(40.0), Point::new(40.0, 0.0));
        assert_eq!(line.position_at(120.0), Point::new(100.0, 20.0));
        assert_eq!(line.position_at(-5.0), Point::new(0.0, 0.0));
        assert_eq!(line.position_at(500.0), Point::new(100.0, 50.0));
    }

    #[test]
    fn projection_of_point_on_centerline() {
        let line = l_shape();
        for d in [0.0, 12.5, 99.0, 130.0, 150.0] {
            let projection = line.project(line.position_at(d));
            assert!((projection.offset - d).abs() < 1e-9, "offset {} for {}", projection.offset, d);
            assert!(projection.lateral_distance < 1e-9);
        }
    }

    #[test]
    fn projection_side_and_clamping() {
        let line = l_shape();

        let left = line.project(Point::new(30.0, 4.0));
        assert!((left.offset - 30.0).abs() < 1e-9);
        assert!((left.signed_lateral - 4.0).abs() < 1e-9);

        let right = line.project(Point::new(30.0, -4.0));
        assert!((right.signed_lateral + 4.0).abs() < 1e-9);

        let before = line.project(Point::new(-3.0, 4.0));
        assert_eq!(before.offset, 0.0);
        assert!((before.lateral_distance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn headings_follow_segments() {
        let line = l_shape();
        assert_eq!(line.heading_at(10.0), 0.0);
        assert!((line.heading_at(140.0) - 90.0).abs() < 1e-9);
        assert_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_eq!(heading_delta(90.0, 270.0), 180.0);
        assert_eq!(normalize_heading(-90.0), 270.0);
    }

    #[test]
    fn lateral_offset_keeps_parallel_distance() {
        let line = l_shape();
        let shifted = line.offset_laterally(-2.0);
        assert_eq!(shifted.points()[0], Point::new(0.0, -2.0));
        assert!((shifted.points()[1] - Point::new(102.0, -2.0)).norm() < 1e-9);
        assert!((shifted.points()[2] - Point::new(102.0, 50.0)).norm() < 1e-9);
    }
}
