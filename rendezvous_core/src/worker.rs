//! Per-partition matching performed by the worker pool.

use crate::controller::RunController;
use crate::geodesic::{precise_distance, CheapBound};
use crate::grid_index::GridIndex;
use crate::types::{PairSet, PointEvent, VehiclePair};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tracing::trace;

/// Thresholds a candidate must satisfy, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCriteria {
    pub distance_m: f64,
    pub time_s: i64,
}

/// Counters for how candidates were filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    /// Candidates returned by the grid (neighborhood and time window)
    pub candidates_examined: u64,

    /// Candidates dropped by the cheap bound
    pub cheap_rejections: u64,

    /// Candidates that needed a haversine evaluation
    pub precise_checks: u64,

    /// Candidates within both thresholds (before pair de-duplication)
    pub matches: u64,
}

impl AddAssign for JoinStats {
    fn add_assign(&mut self, other: Self) {
        self.candidates_examined += other.candidates_examined;
        self.cheap_rejections += other.cheap_rejections;
        self.precise_checks += other.precise_checks;
        self.matches += other.matches;
    }
}

/// What a worker hands back for one partition.
#[derive(Debug, Default)]
pub struct PartitionOutcome {
    pub pairs: PairSet,

    /// Points queried and inserted before the worker stopped
    pub processed: usize,

    /// False if cancellation cut the partition short
    pub completed: bool,

    pub stats: JoinStats,
}

/// Matches one partition of a batch against the shared index.
pub struct Worker<'a> {
    index: &'a GridIndex,
    criteria: MatchCriteria,
    bound: CheapBound,
    controller: &'a RunController,
}

impl<'a> Worker<'a> {
    pub fn new(
        index: &'a GridIndex,
        criteria: MatchCriteria,
        bound: CheapBound,
        controller: &'a RunController,
    ) -> Self {
        Self {
            index,
            criteria,
            bound,
            controller,
        }
    }

    /// Processes `points` in order. Each point is compared against the index
    /// and then inserted into it.
    ///
    /// Honors pause between points and stops early on cancellation.
    pub fn process_partition(&self, points: &[PointEvent]) -> PartitionOutcome {
        let mut outcome = PartitionOutcome::default();

        for point in points {
            if !self.controller.wait_while_paused() {
                return outcome;
            }
            self.match_point(point, &mut outcome);
            outcome.processed += 1;
        }

        outcome.completed = true;
        outcome
    }

    fn match_point(&self, point: &PointEvent, outcome: &mut PartitionOutcome) {
        let candidates = self.index.query_then_insert(point, self.criteria.time_s);
        outcome.stats.candidates_examined += candidates.len() as u64;

        for other in &candidates {
            if other.vehicle_id == point.vehicle_id {
                continue;
            }
            if !self.bound.may_be_within(
                point.lat,
                point.lon,
                other.lat,
                other.lon,
                self.criteria.distance_m,
            ) {
                outcome.stats.cheap_rejections += 1;
                continue;
            }

            outcome.stats.precise_checks += 1;
            let distance = precise_distance(point.lat, point.lon, other.lat, other.lon);
            if distance <= self.criteria.distance_m {
                outcome.stats.matches += 1;
                if let Some(pair) = VehiclePair::new(&point.vehicle_id, &other.vehicle_id) {
                    trace!(
                        "Match {} at t={} ({:.2}m, dt={}s)",
                        pair,
                        point.timestamp,
                        distance,
                        (point.timestamp - other.timestamp).abs()
                    );
                    outcome.pairs.insert(pair);
                }
            }
        }
    }
}
