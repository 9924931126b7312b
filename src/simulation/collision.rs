use std::collections::HashSet;
use std::sync::Arc;

use super::{Collision, EntityKind, Point};
use crate::config::MotionParams;
use crate::network::{Junction, Network};

/// Position of one entity as seen by the collision check.
#[derive(Debug, Clone)]
pub struct Occupant<'a> {
    pub id: &'a str,
    pub kind: EntityKind,
    /// End-of-tick position.
    pub position: Point,
    /// Junctions driven through during the tick.
    pub crossed: &'a [String],
}

impl Occupant<'_> {
    fn occupies(&self, junction: &Junction) -> bool {
        junction.contains(&self.position) || self.crossed.iter().any(|j| *j == junction.id)
    }
}

/// Evaluates junction occupancy for a whole tick at once.
pub struct CollisionDetector {
    network: Arc<Network>,
    params: MotionParams,
}

impl CollisionDetector {
    pub fn new(network: Arc<Network>, params: MotionParams) -> Self {
        Self { network, params }
    }

    /// Pairs of occupants sharing a junction closer than half their summed
    /// lengths. An occupant shares a junction when it ends the tick inside
    /// it or crossed it during the tick. Pedestrians do not collide with
    /// each other. Each pair is reported once, in the order occupants were
    /// given.
    pub fn detect(&self, occupants: &[Occupant<'_>]) -> Vec<Collision> {
        let mut collisions = Vec::new();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();

        for junction in self.network.junctions() {
            let inside: Vec<&Occupant> = occupants
                .iter()
                .filter(|o| o.occupies(junction))
                .collect();

            for (i, a) in inside.iter().enumerate() {
                for b in &inside[i + 1..] {
                    if a.kind == EntityKind::Person && b.kind == EntityKind::Person {
                        continue;
                    }

                    let gap = (self.params.profile(a.kind).length + self.params.profile(b.kind).length) / 2.0;
                    let distance = (a.position - b.position).norm();
                    if distance >= gap || !seen.insert((a.id, b.id)) {
                        continue;
                    }

                    log::debug!(
                        "Entities '{}' and '{}' {:.2}m apart in junction '{}' (gap {:.2}m)",
                        a.id, b.id, distance, junction.id, gap
                    );
                    collisions.push(Collision {
                        entity_a: a.id.to_string(),
                        entity_b: b.id.to_string(),
                        junction_id: junction.id.clone(),
                    });
                }
            }
        }

        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn detector() -> CollisionDetector {
        CollisionDetector::new(Arc::new(testing::corridor()), MotionParams::default())
    }

    fn occupant(id: &str, kind: EntityKind, x: f64, y: f64) -> Occupant<'_> {
        Occupant { id, kind, position: Point::new(x, y), crossed: &[] }
    }

    #[test]
    fn vehicles_overlapping_in_junction_collide() {
        let collisions = detector().detect(&[
            occupant("a", EntityKind::Vehicle, 200.0, 0.0),
            occupant("b", EntityKind::Vehicle, 202.0, 1.0),
        ]);
        assert_eq!(
            collisions,
            vec![Collision {
                entity_a: "a".into(),
                entity_b: "b".into(),
                junction_id: "E".into(),
            }]
        );
    }

    #[test]
    fn distant_or_outside_pairs_do_not_collide() {
        let detector = detector();
        assert!(detector
            .detect(&[
                occupant("a", EntityKind::Vehicle, 195.0, 0.0),
                occupant("b", EntityKind::Vehicle, 205.0, 0.0),
            ])
            .is_empty());
        assert!(detector
            .detect(&[
                occupant("a", EntityKind::Vehicle, 100.0, 0.0),
                occupant("b", EntityKind::Vehicle, 100.0, 0.0),
            ])
            .is_empty());
    }

    #[test]
    fn pedestrians_only_collide_with_vehicles() {
        let detector = detector();
        assert!(detector
            .detect(&[
                occupant("p0", EntityKind::Person, 0.0, 0.0),
                occupant("p1", EntityKind::Person, 0.1, 0.0),
            ])
            .is_empty());
        assert_eq!(
            detector
                .detect(&[
                    occupant("p0", EntityKind::Person, 0.0, 0.0),
                    occupant("v", EntityKind::Vehicle, 1.0, 0.0),
                ])
                .len(),
            1
        );
    }

    #[test]
    fn crossing_a_junction_counts_as_occupying_it() {
        let detector = detector();
        let through_e = vec!["E".to_string()];

        let mut lead = occupant("a", EntityKind::Vehicle, 201.6, 13.0);
        let mut follower = occupant("b", EntityKind::Vehicle, 201.6, 12.0);
        assert!(detector.detect(&[lead.clone(), follower.clone()]).is_empty());

        lead.crossed = &through_e;
        follower.crossed = &through_e;
        let collisions = detector.detect(&[lead, follower]);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].junction_id, "E");
    }
}
