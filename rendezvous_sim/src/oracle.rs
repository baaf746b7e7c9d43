//! Ground truth oracle for simulation.
//!
//! The Oracle answers the join question the slow, obviously correct way:
//! expand every trajectory, sort the points by time and compare each point
//! with every later point inside the time window using the precise distance
//! only. No grid, no cheap bound, no batches.

use rendezvous_core::{expand_record, precise_distance, PairSet, PointEvent, VehiclePair};
use rendezvous_env::{TrajectoryRecord, TrajectorySource};

/// Brute-force reference join.
#[derive(Debug, Clone, Copy)]
pub struct Oracle {
    /// Maximum distance for a match (meters, inclusive)
    distance_m: f64,

    /// Maximum time difference for a match (seconds, inclusive)
    time_s: i64,
}

impl Oracle {
    /// Creates an oracle for the given thresholds.
    pub fn new(distance_m: f64, time_s: i64) -> Self {
        Self { distance_m, time_s }
    }

    /// Computes every matching pair over well-formed records.
    pub fn pairs(&self, records: &[TrajectoryRecord]) -> PairSet {
        let points: Vec<PointEvent> = records.iter().flat_map(expand_record).collect();
        self.pairs_of_points(points)
    }

    /// Computes every matching pair over a source, skipping malformed trips.
    pub fn pairs_from_source(&self, source: &dyn TrajectorySource) -> PairSet {
        let points: Vec<PointEvent> = source
            .trajectories()
            .filter_map(|entry| entry.ok())
            .flat_map(|record| expand_record(&record).collect::<Vec<_>>())
            .collect();
        self.pairs_of_points(points)
    }

    fn pairs_of_points(&self, mut points: Vec<PointEvent>) -> PairSet {
        points.sort_by_key(|p| p.timestamp);

        let mut pairs = PairSet::new();
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                if b.timestamp - a.timestamp > self.time_s {
                    break;
                }
                if a.vehicle_id == b.vehicle_id {
                    continue;
                }
                if precise_distance(a.lat, a.lon, b.lat, b.lon) <= self.distance_m {
                    pairs.extend(VehiclePair::new(&a.vehicle_id, &b.vehicle_id));
                }
            }
        }
        pairs
    }
}
