//! Batch scheduler: streams trajectories, fans batches out to the worker
//! pool and owns every piece of run-level bookkeeping.
//!
//! One run goes through these phases:
//!
//! ```text
//! load checkpoint ──> warm-up (replay processed prefix into the index)
//!        │
//!        v
//! accumulate trips ──> batch full? ──> dispatch to workers ──> merge
//!        ^                                                      │
//!        └──────── evict / save / report (batch boundary) <─────┘
//!
//! source exhausted or cancelled ──> final batch ──> final save ──> verify
//! ```
//!
//! Counters only move for batches that every worker finished, so a saved
//! `trips_processed` always names a prefix whose comparisons are complete.

use crate::checkpoint::{CheckpointManager, RunProgress};
use crate::config::RunConfig;
use crate::controller::{RunController, RunState, RunStatus};
use crate::error::{EngineError, Result};
use crate::expander::expand_record;
use crate::geodesic::CheapBound;
use crate::grid_index::GridIndex;
use crate::types::{PairSet, PointEvent};
use crate::worker::{JoinStats, MatchCriteria, PartitionOutcome, Worker};
use rayon::prelude::*;
use rendezvous_env::{RunContext, SourceTotals, SystemContext, TrajectorySource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Share of the input below which a finished run is reported as incomplete
const COMPLETION_WARNING_RATIO: f64 = 0.995;

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Every distinct pair found, resumed pairs included
    pub pairs: PairSet,

    /// Points whose comparisons completed
    pub points_processed: u64,

    /// Usable points in the input
    pub points_total: u64,

    /// Leading trajectories fully processed
    pub trips_processed: u64,

    /// Trajectories in the input, malformed ones included
    pub trips_total: u64,

    /// Time spent in this invocation
    pub elapsed_seconds: f64,

    /// True if the run stopped on a cancellation request
    pub cancelled: bool,

    /// True if the run continued from a checkpoint
    pub resumed: bool,

    /// Points removed from the index by eviction
    pub points_evicted: u64,

    /// Points outside the operating band, matched without the cheap filter
    pub points_outside_band: u64,

    /// Candidate filtering counters for this invocation
    pub stats: JoinStats,
}

impl RunResult {
    /// Fraction of points processed, in `[0, 1]`.
    pub fn completion(&self) -> f64 {
        if self.points_total == 0 {
            1.0
        } else {
            self.points_processed as f64 / self.points_total as f64
        }
    }

    /// Returns true if every trajectory was processed.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.trips_processed == self.trips_total
    }
}

/// Progress carried between batches.
#[derive(Debug, Default)]
struct Ledger {
    pairs: PairSet,
    points_processed: u64,
    trips_processed: u64,
    points_evicted: u64,
    points_outside_band: u64,
    stats: JoinStats,
}

impl Ledger {
    fn from_progress(progress: RunProgress) -> Self {
        Self {
            pairs: progress.pairs_found,
            points_processed: progress.points_processed,
            trips_processed: progress.trips_processed,
            ..Self::default()
        }
    }
}

/// Trajectories accumulated but not yet dispatched.
#[derive(Debug, Default)]
struct PendingBatch {
    points: Vec<PointEvent>,
    trips: u64,
}

impl PendingBatch {
    fn is_empty(&self) -> bool {
        self.trips == 0
    }
}

/// Drives a join run over a [`TrajectorySource`].
pub struct BatchScheduler<C: RunContext> {
    config: RunConfig,
    context: Arc<C>,
    controller: Arc<RunController>,
    checkpoints: CheckpointManager,
    pool: rayon::ThreadPool,
    bound: CheapBound,
    criteria: MatchCriteria,
}

impl<C: RunContext> BatchScheduler<C> {
    /// Validates `config` and builds the worker pool and checkpoint store.
    pub fn new(config: RunConfig, context: Arc<C>, controller: Arc<RunController>) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|i| format!("rendezvous-worker-{}", i))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        let checkpoints = CheckpointManager::from_config(&config);
        let bound = config.cheap_bound();
        let criteria = MatchCriteria {
            distance_m: config.distance_threshold_meters,
            time_s: config.time_threshold_seconds,
        };

        Ok(Self {
            config,
            context,
            controller,
            checkpoints,
            pool,
            bound,
            criteria,
        })
    }

    /// Replaces the checkpoint manager built from the configuration.
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Runs the join to completion or cancellation.
    pub fn run(&self, source: &dyn TrajectorySource) -> RunResult {
        let started = self.context.now();
        let totals = source.totals();
        let cell_size = self.config.cell_size_for(totals.latitude_range);
        let index = GridIndex::new(cell_size);
        self.check_band(totals, cell_size);

        info!(
            "Starting join: {} trips, {} points, {}m / {}s, cell {:.7}°, {} workers, batch {}",
            totals.trips,
            totals.points,
            self.criteria.distance_m,
            self.criteria.time_s,
            cell_size,
            self.config.worker_count,
            self.config.batch_size
        );

        let (mut ledger, resumed) = self.restore(totals, cell_size);
        if resumed && ledger.trips_processed >= totals.trips as u64 {
            info!("Checkpoint already covers the whole input, nothing to do");
            return self.finish(ledger, totals, started, resumed, false);
        }

        let skip = ledger.trips_processed;
        let mut pending = PendingBatch::default();
        let mut watermark: Option<i64> = None;
        let mut last_save = started;
        let mut last_cleanup = started;
        let mut last_report = ledger.trips_processed;
        let mut cancelled = false;

        for (position, entry) in source.trajectories().enumerate() {
            let position = position as u64;

            if position < skip {
                // Warm-up: rebuild index state for the processed prefix
                if let Ok(record) = entry {
                    self.advance_watermark(&mut watermark, record.start_time, position);
                    index.insert_batch(expand_record(&record));
                }
                if position + 1 == skip || (position + 1) % self.config.batch_size as u64 == 0 {
                    ledger.points_evicted += self.evict(&index, watermark) as u64;
                }
                continue;
            }

            if !self.controller.wait_while_paused() {
                cancelled = true;
                break;
            }

            match entry {
                Ok(record) => {
                    self.advance_watermark(&mut watermark, record.start_time, position);
                    let first = pending.points.len();
                    pending.points.extend(expand_record(&record));
                    ledger.points_outside_band += pending.points[first..]
                        .iter()
                        .filter(|p| !self.bound.covers(p.lat))
                        .count() as u64;
                }
                Err(e) => warn!("Skipping trajectory: {}", e),
            }
            pending.trips += 1;

            if pending.points.len() < self.config.batch_size {
                continue;
            }

            if !self.dispatch(&index, &mut pending, &mut ledger) {
                cancelled = true;
                break;
            }

            let now = self.context.now();
            if elapsed_at_least(now, last_cleanup, self.config.cleanup_interval_seconds) {
                ledger.points_evicted += self.evict(&index, watermark) as u64;
                last_cleanup = now;
            }
            if elapsed_at_least(now, last_save, self.config.save_interval_seconds) {
                self.checkpoints.save(&self.progress(&ledger, totals, cell_size));
                last_save = now;
            }
            if ledger.trips_processed - last_report >= self.config.report_every_trips {
                self.log_progress(&ledger, totals, started, &index);
                last_report = ledger.trips_processed;
            }
            self.publish(&ledger, totals, started, RunState::Running);
        }

        if !cancelled && !pending.is_empty() && !self.dispatch(&index, &mut pending, &mut ledger) {
            cancelled = true;
        }
        if cancelled {
            info!(
                "Run cancelled after {} trips; {} pairs kept",
                ledger.trips_processed,
                ledger.pairs.len()
            );
        }

        self.checkpoints.save(&self.progress(&ledger, totals, cell_size));
        self.finish(ledger, totals, started, resumed, cancelled)
    }

    /// Warns when the input leaves the operating band.
    fn check_band(&self, totals: SourceTotals, cell_size: f64) {
        let Some((lo, hi)) = totals.latitude_range else {
            return;
        };
        if self.bound.covers(lo) && self.bound.covers(hi) {
            return;
        }
        let (min_lat, max_lat) = self.bound.band();
        let needed = self.bound.widened(lo, hi).min_cell_size(self.criteria.distance_m);
        if cell_size < needed {
            warn!(
                "Input spans latitudes {:.4}..{:.4} beyond the band {:.2}..{:.2}; cell {:.7}° is below the {:.7}° needed there, matches across cell edges can be missed",
                lo, hi, min_lat, max_lat, cell_size, needed
            );
        } else {
            warn!(
                "Input spans latitudes {:.4}..{:.4} beyond the band {:.2}..{:.2}; cells sized for the full extent, cheap filter skipped outside the band",
                lo, hi, min_lat, max_lat
            );
        }
    }

    /// Loads a checkpoint that matches the input and the match settings, if
    /// resuming is enabled.
    fn restore(&self, totals: SourceTotals, cell_size: f64) -> (Ledger, bool) {
        if !self.config.resume {
            return (Ledger::default(), false);
        }
        match self.checkpoints.load() {
            Some(progress)
                if !progress.matches_settings(self.criteria.distance_m, self.criteria.time_s, cell_size) =>
            {
                warn!(
                    "Checkpoint was taken with {}m / {}s / cell {:.7}°, this run uses {}m / {}s / cell {:.7}°, starting fresh",
                    progress.distance_threshold_meters,
                    progress.time_threshold_seconds,
                    progress.cell_size_degrees,
                    self.criteria.distance_m,
                    self.criteria.time_s,
                    cell_size
                );
                (Ledger::default(), false)
            }
            Some(progress) if progress.is_consistent_with(totals) => {
                info!(
                    "Resuming: {} trips, {}/{} points ({:.1}%), {} pairs",
                    progress.trips_processed,
                    progress.points_processed,
                    progress.points_total,
                    progress.completion() * 100.0,
                    progress.pairs_found.len()
                );
                (Ledger::from_progress(progress), true)
            }
            Some(progress) => {
                warn!(
                    "Checkpoint does not match the input ({} points saved, {} in source), starting fresh",
                    progress.points_total, totals.points
                );
                (Ledger::default(), false)
            }
            None => (Ledger::default(), false),
        }
    }

    /// Runs one batch across the pool and merges the partition outcomes.
    ///
    /// Returns false if the batch was cut short by cancellation. Pairs found
    /// before the cut are kept but the counters do not advance.
    fn dispatch(&self, index: &GridIndex, pending: &mut PendingBatch, ledger: &mut Ledger) -> bool {
        let worker = Worker::new(index, self.criteria, self.bound, &self.controller);
        let chunk = pending
            .points
            .len()
            .div_ceil(self.config.worker_count)
            .max(1);

        let outcomes: Vec<PartitionOutcome> = self.pool.install(|| {
            pending
                .points
                .par_chunks(chunk)
                .map(|partition| worker.process_partition(partition))
                .collect()
        });

        let mut completed = true;
        let mut batch_pairs = 0;
        for outcome in outcomes {
            completed &= outcome.completed;
            ledger.stats += outcome.stats;
            for pair in outcome.pairs {
                if ledger.pairs.insert(pair) {
                    batch_pairs += 1;
                }
            }
        }

        if completed {
            ledger.points_processed += pending.points.len() as u64;
            ledger.trips_processed += pending.trips;
            debug!(
                "Batch done: {} points from {} trips, {} new pairs",
                pending.points.len(),
                pending.trips,
                batch_pairs
            );
        }

        pending.points.clear();
        pending.trips = 0;
        completed
    }

    fn advance_watermark(&self, watermark: &mut Option<i64>, start_time: i64, position: u64) {
        match *watermark {
            Some(current) if start_time < current => warn!(
                "Trajectory at position {} starts at {} before {}; input is not ordered by start time",
                position, start_time, current
            ),
            _ => *watermark = Some(start_time),
        }
    }

    /// Drops index points too old to match any trajectory not yet dispatched.
    /// Only valid between batches.
    fn evict(&self, index: &GridIndex, watermark: Option<i64>) -> usize {
        let Some(watermark) = watermark else {
            return 0;
        };
        let cutoff = watermark - self.config.time_threshold_seconds - self.config.eviction_margin_seconds;
        index.evict_before(cutoff)
    }

    fn progress(&self, ledger: &Ledger, totals: SourceTotals, cell_size: f64) -> RunProgress {
        RunProgress {
            pairs_found: ledger.pairs.clone(),
            points_processed: ledger.points_processed,
            points_total: totals.points as u64,
            trips_processed: ledger.trips_processed,
            timestamp: self.context.unix_seconds(),
            distance_threshold_meters: self.criteria.distance_m,
            time_threshold_seconds: self.criteria.time_s,
            cell_size_degrees: cell_size,
        }
    }

    fn log_progress(&self, ledger: &Ledger, totals: SourceTotals, started: Duration, index: &GridIndex) {
        let elapsed = self.context.now().saturating_sub(started).as_secs_f64();
        let per_second = |count: u64| if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };
        let completion = if totals.points == 0 {
            0.0
        } else {
            ledger.points_processed as f64 / totals.points as f64
        };
        let projected = if completion > 0.0 {
            (ledger.pairs.len() as f64 / completion).round() as u64
        } else {
            0
        };
        let stats = index.stats();

        info!(
            "Progress: {}/{} trips, {}/{} points ({:.1}%), {} pairs (~{} projected), {:.1} trips/s, {:.0} points/s, index {} points in {} cells",
            ledger.trips_processed,
            totals.trips,
            ledger.points_processed,
            totals.points,
            completion * 100.0,
            ledger.pairs.len(),
            projected,
            per_second(ledger.trips_processed),
            per_second(ledger.points_processed),
            stats.total_points,
            stats.total_cells
        );
    }

    fn publish(&self, ledger: &Ledger, totals: SourceTotals, started: Duration, state: RunState) {
        let pairs = if self.controller.take_report_request() {
            info!("Report: {} pairs so far", ledger.pairs.len());
            for pair in &ledger.pairs {
                info!("  {}", pair);
            }
            Some(ledger.pairs.iter().cloned().collect())
        } else {
            None
        };

        self.controller.publish(RunStatus {
            state,
            points_processed: ledger.points_processed,
            points_total: totals.points as u64,
            trips_processed: ledger.trips_processed,
            trips_total: totals.trips as u64,
            pairs_found: ledger.pairs.len(),
            elapsed_seconds: self.context.now().saturating_sub(started).as_secs_f64(),
            pairs,
        });
    }

    fn finish(
        &self,
        ledger: Ledger,
        totals: SourceTotals,
        started: Duration,
        resumed: bool,
        cancelled: bool,
    ) -> RunResult {
        self.publish(&ledger, totals, started, RunState::Finished);

        let result = RunResult {
            pairs: ledger.pairs,
            points_processed: ledger.points_processed,
            points_total: totals.points as u64,
            trips_processed: ledger.trips_processed,
            trips_total: totals.trips as u64,
            elapsed_seconds: self.context.now().saturating_sub(started).as_secs_f64(),
            cancelled,
            resumed,
            points_evicted: ledger.points_evicted,
            points_outside_band: ledger.points_outside_band,
            stats: ledger.stats,
        };

        if !cancelled && result.completion() < COMPLETION_WARNING_RATIO {
            warn!(
                "Only {}/{} points processed ({:.2}%)",
                result.points_processed,
                result.points_total,
                result.completion() * 100.0
            );
        }
        info!(
            "Join finished in {:.1}s: {} pairs, {}/{} trips, {} candidates, {} precise checks",
            result.elapsed_seconds,
            result.pairs.len(),
            result.trips_processed,
            result.trips_total,
            result.stats.candidates_examined,
            result.stats.precise_checks
        );
        result
    }
}

fn elapsed_at_least(now: Duration, since: Duration, interval_seconds: u64) -> bool {
    now.saturating_sub(since) >= Duration::from_secs(interval_seconds)
}

/// Runs a join with the system clock and a private controller.
pub fn run(config: RunConfig, source: &dyn TrajectorySource) -> Result<RunResult> {
    run_with_controller(config, source, RunController::shared())
}

/// Runs a join that can be paused, cancelled and inspected via `controller`.
pub fn run_with_controller(
    config: RunConfig,
    source: &dyn TrajectorySource,
    controller: Arc<RunController>,
) -> Result<RunResult> {
    let scheduler = BatchScheduler::new(config, SystemContext::shared(), controller)?;
    Ok(scheduler.run(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesic::precise_distance;
    use crate::types::VehiclePair;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rendezvous_env::{TrajectoryRecord, VecSource};
    use std::path::PathBuf;

    fn config() -> RunConfig {
        RunConfig::default()
            .with_checkpoint_path(None)
            .with_workers(3)
            .with_batch_size(64)
    }

    fn temp_checkpoint() -> PathBuf {
        std::env::temp_dir().join(format!("rendezvous-scheduler-{}.json", uuid::Uuid::new_v4()))
    }

    /// Vehicles wandering around a ~100m square over a 10 minute window.
    fn random_fleet(seed: u64, vehicles: usize) -> Vec<TrajectoryRecord> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut records = Vec::new();
        for v in 0..vehicles {
            let start = 1_000 + rng.gen_range(0..600);
            let interval = rng.gen_range(2..6);
            let mut lat = 41.15 + rng.gen_range(0.0..0.001);
            let mut lon = -8.61 + rng.gen_range(0.0..0.001);
            let mut coords = Vec::new();
            for _ in 0..rng.gen_range(5..30) {
                coords.push((lon, lat));
                lat += rng.gen_range(-0.00004..0.00004);
                lon += rng.gen_range(-0.00004..0.00004);
            }
            records.push(TrajectoryRecord::new(format!("V{:03}", v), start, interval, &coords));
        }
        records
    }

    fn brute_force(records: &[TrajectoryRecord], distance_m: f64, time_s: i64) -> PairSet {
        let points: Vec<PointEvent> = records.iter().flat_map(expand_record).collect();
        let mut pairs = PairSet::new();
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                if a.vehicle_id == b.vehicle_id || (a.timestamp - b.timestamp).abs() > time_s {
                    continue;
                }
                if precise_distance(a.lat, a.lon, b.lat, b.lon) <= distance_m {
                    pairs.extend(VehiclePair::new(&a.vehicle_id, &b.vehicle_id));
                }
            }
        }
        pairs
    }

    /// Cancels the controller when the enumeration reaches `at`.
    struct CancellingSource {
        inner: VecSource,
        controller: Arc<RunController>,
        at: usize,
    }

    impl TrajectorySource for CancellingSource {
        fn trajectories(
            &self,
        ) -> Box<dyn Iterator<Item = rendezvous_env::Result<TrajectoryRecord>> + '_> {
            Box::new(self.inner.trajectories().enumerate().map(move |(i, entry)| {
                if i == self.at {
                    self.controller.cancel();
                }
                entry
            }))
        }

        fn totals(&self) -> SourceTotals {
            self.inner.totals()
        }
    }

    #[test]
    fn test_concrete_scenario() {
        let source = VecSource::from_records(vec![
            TrajectoryRecord::new("A", 1000, 15, &[(-8.6000, 41.1500)]),
            TrajectoryRecord::new("B", 1002, 15, &[(-8.60001, 41.15001)]),
        ]);

        let result = run(config(), &source).unwrap();
        let expected: PairSet = VehiclePair::new("A", "B").into_iter().collect();
        assert_eq!(result.pairs, expected);
        assert_eq!(result.points_processed, 2);
        assert!(result.is_complete());

        let result = run(config().with_distance_threshold(1.0), &source).unwrap();
        assert!(result.pairs.is_empty());
    }

    #[test]
    fn test_matches_brute_force() {
        let records = random_fleet(7, 40);
        let expected = brute_force(&records, 5.0, 5);
        assert!(!expected.is_empty());

        let source = VecSource::from_records(records);
        for (batch, workers) in [(1, 1), (50, 3), (100_000, 4)] {
            let config = config()
                .with_batch_size(batch)
                .with_workers(workers)
                .with_cleanup_interval(0);
            let result = run(config, &source).unwrap();
            assert_eq!(result.pairs, expected, "batch {} workers {}", batch, workers);
            assert_eq!(result.points_processed, result.points_total);
        }
    }

    #[test]
    fn test_wider_thresholds_match_brute_force() {
        let records = random_fleet(11, 30);
        let expected = brute_force(&records, 25.0, 20);
        let result = run(
            config()
                .with_distance_threshold(25.0)
                .with_time_threshold(20)
                .with_cleanup_interval(0),
            &VecSource::from_records(records),
        )
        .unwrap();
        assert_eq!(result.pairs, expected);
    }

    #[test]
    fn test_single_vehicle_has_no_pairs() {
        let source = VecSource::from_records(vec![
            TrajectoryRecord::new("A", 1000, 15, &[(-8.61, 41.15), (-8.61, 41.15)]),
            TrajectoryRecord::new("A", 1010, 15, &[(-8.61, 41.15)]),
        ]);
        let result = run(config(), &source).unwrap();
        assert!(result.pairs.is_empty());
        assert_eq!(result.points_processed, 3);
        assert_eq!(result.points_outside_band, 0);
    }

    #[test]
    fn test_run_is_idempotent() {
        let source = VecSource::from_records(random_fleet(3, 25));
        let first = run(config(), &source).unwrap();
        let second = run(config(), &source).unwrap();
        assert_eq!(first.pairs, second.pairs);
    }

    #[test]
    fn test_malformed_trajectories_are_skipped() {
        let mut source = VecSource::new();
        source.push(TrajectoryRecord::new("A", 1000, 15, &[(-8.61, 41.15)]));
        source.push_malformed("POLYLINE is not a JSON array");
        source.push(TrajectoryRecord::from_raw(
            "B",
            1001,
            15,
            vec![vec![-8.61, 41.15], vec![-8.61]],
        ));

        let result = run(config(), &source).unwrap();
        assert_eq!(result.trips_total, 3);
        assert_eq!(result.trips_processed, 3);
        assert_eq!(result.points_total, 2);
        assert_eq!(result.points_processed, 2);
        assert_eq!(result.pairs.len(), 1);
    }

    #[test]
    fn test_eviction_keeps_results_exact() {
        let mut records = random_fleet(5, 20);
        // A second wave an hour later at the same place
        let late: Vec<TrajectoryRecord> = random_fleet(6, 20)
            .into_iter()
            .map(|mut r| {
                r.vehicle_id = format!("L{}", r.vehicle_id);
                r.start_time += 3_600;
                r
            })
            .collect();
        records.extend(late);
        let expected = brute_force(&records, 5.0, 5);

        let result = run(
            config().with_batch_size(16).with_cleanup_interval(0),
            &VecSource::from_records(records),
        )
        .unwrap();
        assert_eq!(result.pairs, expected);
        assert!(result.points_evicted > 0);
    }

    #[test]
    fn test_cancelled_run_keeps_partial_pairs() {
        let records = random_fleet(9, 40);
        let full = run(config(), &VecSource::from_records(records.clone())).unwrap();

        let controller = RunController::shared();
        let source = CancellingSource {
            inner: VecSource::from_records(records),
            controller: Arc::clone(&controller),
            at: 20,
        };
        let partial = run_with_controller(config().with_batch_size(8), &source, controller).unwrap();

        assert!(partial.cancelled);
        assert!(!partial.is_complete());
        assert!(partial.trips_processed <= 20);
        assert!(partial.points_processed < partial.points_total);
        assert!(partial.pairs.is_subset(&full.pairs));
    }

    #[test]
    fn test_resume_after_cancel_matches_full_run() {
        let records = random_fleet(13, 40);
        let full = run(config(), &VecSource::from_records(records.clone())).unwrap();
        let path = temp_checkpoint();
        let checkpointed = config()
            .with_batch_size(8)
            .with_checkpoint_path(Some(path.clone()));

        let controller = RunController::shared();
        let source = CancellingSource {
            inner: VecSource::from_records(records.clone()),
            controller: Arc::clone(&controller),
            at: 25,
        };
        let partial = run_with_controller(checkpointed.clone(), &source, controller).unwrap();
        assert!(partial.cancelled);
        assert!(partial.trips_processed > 0);

        let resumed = run(checkpointed.clone(), &VecSource::from_records(records)).unwrap();
        assert!(resumed.resumed);
        assert!(resumed.is_complete());
        assert_eq!(resumed.pairs, full.pairs);
        assert_eq!(resumed.points_processed, full.points_processed);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_completed_checkpoint_returns_saved_result() {
        let records = random_fleet(17, 15);
        let path = temp_checkpoint();
        let checkpointed = config().with_checkpoint_path(Some(path.clone()));
        let source = VecSource::from_records(records);

        let first = run(checkpointed.clone(), &source).unwrap();
        assert!(!first.resumed);

        let second = run(checkpointed.clone(), &source).unwrap();
        assert!(second.resumed);
        assert_eq!(second.pairs, first.pairs);
        assert_eq!(second.stats, JoinStats::default());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_mismatched_checkpoint_is_ignored() {
        let path = temp_checkpoint();
        let checkpointed = config().with_checkpoint_path(Some(path.clone()));
        let small = VecSource::from_records(random_fleet(19, 5));
        run(checkpointed.clone(), &small).unwrap();

        let large = VecSource::from_records(random_fleet(19, 30));
        let result = run(checkpointed, &large).unwrap();
        assert!(!result.resumed);
        assert!(result.is_complete());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_checkpoint_from_other_thresholds_is_ignored() {
        let path = temp_checkpoint();
        let checkpointed = config().with_checkpoint_path(Some(path.clone()));
        let source = VecSource::from_records(vec![
            TrajectoryRecord::new("A", 1000, 15, &[(-8.6000, 41.1500)]),
            TrajectoryRecord::new("B", 1002, 15, &[(-8.60001, 41.15001)]),
        ]);

        let wide = run(checkpointed.clone(), &source).unwrap();
        assert_eq!(wide.pairs.len(), 1);

        let narrow = run(checkpointed.clone().with_distance_threshold(1.0), &source).unwrap();
        assert!(!narrow.resumed);
        assert!(narrow.pairs.is_empty());

        let quick = run(checkpointed.clone().with_time_threshold(1), &source).unwrap();
        assert!(!quick.resumed);
        assert!(quick.pairs.is_empty());

        // The last run's own checkpoint is reusable by the same settings
        let again = run(checkpointed.with_time_threshold(1), &source).unwrap();
        assert!(again.resumed);
        assert!(again.pairs.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_points_north_of_band_still_match() {
        // ~4.8m apart in longitude at 60°N, where 0.0000715° cells are too small
        let source = VecSource::from_records(vec![
            TrajectoryRecord::new("A", 1000, 15, &[(0.000710, 60.0)]),
            TrajectoryRecord::new("B", 1000, 15, &[(0.000797, 60.0)]),
        ]);
        let result = run(config(), &source).unwrap();
        let expected: PairSet = VehiclePair::new("A", "B").into_iter().collect();
        assert_eq!(result.pairs, expected);
        assert_eq!(result.points_outside_band, 2);
    }

    #[test]
    fn test_fleet_outside_band_matches_brute_force() {
        let records: Vec<TrajectoryRecord> = random_fleet(7, 40)
            .into_iter()
            .map(|mut r| {
                for c in &mut r.coordinates {
                    c[1] += 18.85;
                }
                r
            })
            .collect();
        let expected = brute_force(&records, 5.0, 5);
        assert!(!expected.is_empty());

        let result = run(
            config().with_cleanup_interval(0),
            &VecSource::from_records(records),
        )
        .unwrap();
        assert_eq!(result.pairs, expected);
        assert_eq!(result.points_outside_band, result.points_total);
    }

    #[test]
    fn test_resume_disabled_starts_fresh() {
        let path = temp_checkpoint();
        let source = VecSource::from_records(random_fleet(23, 10));
        run(config().with_checkpoint_path(Some(path.clone())), &source).unwrap();

        let result = run(
            config()
                .with_checkpoint_path(Some(path.clone()))
                .with_resume(false),
            &source,
        )
        .unwrap();
        assert!(!result.resumed);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let source = VecSource::new();
        let err = run(config().with_cell_size(0.00001), &source).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_empty_source() {
        let result = run(config(), &VecSource::new()).unwrap();
        assert!(result.pairs.is_empty());
        assert_eq!(result.points_total, 0);
        assert!(result.is_complete());
    }

    #[test]
    fn test_status_is_published() {
        let controller = RunController::shared();
        controller.request_report();
        let source = VecSource::from_records(vec![
            TrajectoryRecord::new("A", 1000, 15, &[(-8.6000, 41.1500)]),
            TrajectoryRecord::new("B", 1002, 15, &[(-8.60001, 41.15001)]),
        ]);
        run_with_controller(config(), &source, Arc::clone(&controller)).unwrap();

        let status = controller.status();
        assert_eq!(status.state, RunState::Finished);
        assert_eq!(status.points_processed, 2);
        assert_eq!(status.pairs_found, 1);
        assert_eq!(status.pairs.map(|p| p.len()), Some(1));
    }
}
