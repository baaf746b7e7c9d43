//! Scenario runner - executes join scenarios against the oracle.

use crate::context::SimContext;
use crate::fleet::{Fleet, FleetConfig, FleetGenerator};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;

use rendezvous_core::{
    BatchScheduler, EngineError, PairSet, RunConfig, RunController, RunResult, VehiclePair,
};
use rendezvous_env::{SourceTotals, TrajectoryRecord, TrajectorySource, VecSource};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Virtual time that passes on every scheduler clock read.
const CLOCK_STEP: Duration = Duration::from_secs(60);

/// Distinguishes checkpoint files of concurrent resume scenarios
static RESUME_RUNS: AtomicUsize = AtomicUsize::new(0);

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    #[serde(serialize_with = "serialize_scenario")]
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the engine agreed with the oracle and all scenario checks held
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Pairs reported by the oracle
    pub pairs_expected: usize,

    /// Pairs reported by the engine
    pub pairs_found: usize,

    /// Usable points in the scenario input
    pub points_total: u64,

    /// Trips in the scenario input
    pub trips_total: u64,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

fn serialize_scenario<S: serde::Serializer>(id: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(id.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub candidates_examined: u64,
    pub cheap_rejections: u64,
    pub precise_checks: u64,
    pub points_evicted: u64,
    pub resumed: bool,
}

impl ScenarioMetrics {
    fn absorb(&mut self, result: &RunResult) {
        self.candidates_examined += result.stats.candidates_examined;
        self.cheap_rejections += result.stats.cheap_rejections;
        self.precise_checks += result.stats.precise_checks;
        self.points_evicted += result.points_evicted;
        self.resumed |= result.resumed;
    }
}

/// Runs join scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Worker threads per run
    workers: usize,

    /// Points per batch
    batch_size: usize,

    /// Match thresholds
    distance_m: f64,
    time_s: i64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            workers: 4,
            batch_size: 128,
            distance_m: 5.0,
            time_s: 5,
        }
    }

    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the match thresholds.
    pub fn with_thresholds(mut self, distance_m: f64, time_s: i64) -> Self {
        self.distance_m = distance_m;
        self.time_s = time_s;
        self
    }

    /// Runs a specific scenario.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let outcome = match scenario {
            ScenarioId::Convoy => self.run_convoy(),
            ScenarioId::Crossing => self.run_crossing(),
            ScenarioId::Dense => self.run_dense(),
            ScenarioId::Sparse => self.run_sparse(),
            ScenarioId::Malformed => self.run_malformed(),
            ScenarioId::Resume => self.run_resume(),
            ScenarioId::Boundary => self.run_boundary(),
        };

        match outcome {
            Ok(outcome) => self.verdict(scenario, outcome),
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                failure_reason: Some(format!("engine setup failed: {}", e)),
                pairs_expected: 0,
                pairs_found: 0,
                points_total: 0,
                trips_total: 0,
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    fn base_config(&self) -> RunConfig {
        RunConfig::default()
            .with_distance_threshold(self.distance_m)
            .with_time_threshold(self.time_s)
            .with_batch_size(self.batch_size)
            .with_workers(self.workers)
            .with_checkpoint_path(None)
            .with_cleanup_interval(CLOCK_STEP.as_secs())
            .with_save_interval(CLOCK_STEP.as_secs())
    }

    fn join(
        &self,
        config: RunConfig,
        source: &dyn TrajectorySource,
        controller: Arc<RunController>,
    ) -> Result<RunResult, EngineError> {
        let context = Arc::new(SimContext::new(self.seed).with_step(CLOCK_STEP));
        let scheduler = BatchScheduler::new(config, context, controller)?;
        Ok(scheduler.run(source))
    }

    fn fleet(&self, config: FleetConfig) -> Fleet {
        FleetGenerator::new(FleetConfig {
            seed: self.seed,
            ..config
        })
        .generate()
    }

    fn oracle(&self) -> Oracle {
        Oracle::new(self.distance_m, self.time_s)
    }

    fn run_convoy(&self) -> Result<Outcome, EngineError> {
        let fleet = self.fleet(FleetConfig {
            vehicles: 40,
            convoys: 5,
            ..Default::default()
        });
        let source = fleet.source();
        let result = self.join(self.base_config(), &source, RunController::shared())?;

        let mut outcome = Outcome::new(self.oracle().pairs(&fleet.records), result);
        let missed: Vec<&VehiclePair> = fleet
            .convoy_pairs
            .iter()
            .filter(|p| !outcome.result.pairs.contains(*p))
            .collect();
        if !missed.is_empty() {
            outcome.fail(format!("{} planted convoys not found", missed.len()));
        }
        Ok(outcome)
    }

    fn run_crossing(&self) -> Result<Outcome, EngineError> {
        let records = crossing_records(1_372_640_000);
        let source = VecSource::from_records(records.clone());
        let result = self.join(self.base_config(), &source, RunController::shared())?;

        let mut outcome = Outcome::new(self.oracle().pairs(&records), result);
        let together = VehiclePair::new("NORTH", "EAST");
        let late = VehiclePair::new("EAST", "EAST_LATE");
        if let Some(pair) = together {
            if !outcome.result.pairs.contains(&pair) {
                outcome.fail("simultaneous crossing not reported".to_string());
            }
        }
        if let Some(pair) = late {
            if outcome.result.pairs.contains(&pair) {
                outcome.fail("crossing 30s apart reported as a match".to_string());
            }
        }
        Ok(outcome)
    }

    fn run_dense(&self) -> Result<Outcome, EngineError> {
        let fleet = self.fleet(FleetConfig {
            vehicles: 80,
            trips_per_vehicle: 1,
            points_per_trip: 30,
            sampling_interval_seconds: 5,
            extent_meters: 75.0,
            time_span_seconds: 600,
            min_speed: 0.5,
            max_speed: 3.0,
            ..Default::default()
        });
        let config = self.base_config().with_batch_size(32).with_cleanup_interval(0);
        let result = self.join(config, &fleet.source(), RunController::shared())?;

        let mut outcome = Outcome::new(self.oracle().pairs(&fleet.records), result);
        if outcome.expected.is_empty() {
            outcome.fail("dense fleet produced no pairs at all".to_string());
        }
        Ok(outcome)
    }

    fn run_sparse(&self) -> Result<Outcome, EngineError> {
        let fleet = self.fleet(FleetConfig {
            vehicles: 15,
            extent_meters: 5_000.0,
            ..Default::default()
        });
        let result = self.join(self.base_config(), &fleet.source(), RunController::shared())?;
        Ok(Outcome::new(self.oracle().pairs(&fleet.records), result))
    }

    fn run_malformed(&self) -> Result<Outcome, EngineError> {
        let fleet = self.fleet(FleetConfig {
            vehicles: 30,
            extent_meters: 200.0,
            convoys: 2,
            malformed_trips: 6,
            malformed_rows: 10,
            ..Default::default()
        });
        let source = fleet.source();
        let result = self.join(self.base_config(), &source, RunController::shared())?;

        let usable: usize = fleet.records.iter().map(|r| r.usable_points()).sum();
        let mut outcome = Outcome::new(self.oracle().pairs_from_source(&source), result);
        if outcome.result.trips_processed != fleet.trip_count() as u64 {
            outcome.fail(format!(
                "{} of {} trips processed",
                outcome.result.trips_processed,
                fleet.trip_count()
            ));
        }
        if outcome.result.points_processed != usable as u64 {
            outcome.fail(format!(
                "{} points processed, {} usable",
                outcome.result.points_processed, usable
            ));
        }
        Ok(outcome)
    }

    fn run_resume(&self) -> Result<Outcome, EngineError> {
        let fleet = self.fleet(FleetConfig {
            vehicles: 40,
            extent_meters: 200.0,
            convoys: 3,
            ..Default::default()
        });
        let path = std::env::temp_dir().join(format!(
            "rendezvous-sim-resume-{}-{}-{}.json",
            self.seed,
            std::process::id(),
            RESUME_RUNS.fetch_add(1, Ordering::Relaxed)
        ));
        let config = self
            .base_config()
            .with_batch_size(64)
            .with_checkpoint_path(Some(path.clone()));

        let controller = RunController::shared();
        let interrupted = CancelAt {
            inner: fleet.source(),
            controller: Arc::clone(&controller),
            at: fleet.trip_count() / 2,
        };
        let first = self.join(config.clone(), &interrupted, controller)?;
        let second = self.join(config, &fleet.source(), RunController::shared());
        remove_checkpoint(path);
        let second = second?;

        let mut outcome = Outcome::new(self.oracle().pairs(&fleet.records), second);
        outcome.metrics.absorb(&first);

        if !first.cancelled {
            outcome.fail("first run was not cancelled".to_string());
        }
        if !outcome.result.resumed {
            outcome.fail("second run did not resume from the checkpoint".to_string());
        }
        debug!(
            "  Interrupted after {}/{} trips with {} pairs",
            first.trips_processed,
            first.trips_total,
            first.pairs.len()
        );
        Ok(outcome)
    }

    fn run_boundary(&self) -> Result<Outcome, EngineError> {
        let config = self.base_config();
        let records = boundary_records(config.effective_cell_size(), 1_372_650_000);
        let source = VecSource::from_records(records.clone());
        let result = self.join(config, &source, RunController::shared())?;

        let mut outcome = Outcome::new(self.oracle().pairs(&records), result);
        for (a, b) in [("EDGE_A", "EDGE_B"), ("SOUTH", "NORTH"), ("WEST", "EAST")] {
            if let Some(pair) = VehiclePair::new(a, b) {
                if !outcome.expected.contains(&pair) {
                    outcome.fail(format!("fixture pair {} is not a true match", pair));
                }
            }
        }
        Ok(outcome)
    }

    fn verdict(&self, scenario: ScenarioId, outcome: Outcome) -> ScenarioResult {
        let Outcome {
            expected,
            result,
            mut failures,
            mut metrics,
        } = outcome;

        let missing = expected.difference(&result.pairs).count();
        let spurious = result.pairs.difference(&expected).count();
        if missing > 0 || spurious > 0 {
            failures.insert(
                0,
                format!("{} pairs missing, {} spurious vs oracle", missing, spurious),
            );
        }
        if !result.is_complete() {
            failures.push(format!(
                "run incomplete: {}/{} trips",
                result.trips_processed, result.trips_total
            ));
        }
        metrics.absorb(&result);

        let passed = failures.is_empty();
        if passed {
            info!(
                "✓ {} complete: {} pairs, {} candidates, {} precise checks",
                scenario.name(),
                result.pairs.len(),
                metrics.candidates_examined,
                metrics.precise_checks
            );
        } else {
            warn!("✗ {} failed: {}", scenario.name(), failures.join("; "));
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| failures.join("; ")),
            pairs_expected: expected.len(),
            pairs_found: result.pairs.len(),
            points_total: result.points_total,
            trips_total: result.trips_total,
            metrics,
        }
    }
}

/// Engine result plus everything needed to judge it.
struct Outcome {
    expected: PairSet,
    result: RunResult,
    failures: Vec<String>,
    metrics: ScenarioMetrics,
}

impl Outcome {
    fn new(expected: PairSet, result: RunResult) -> Self {
        Self {
            expected,
            result,
            failures: Vec::new(),
            metrics: ScenarioMetrics::default(),
        }
    }

    fn fail(&mut self, reason: String) {
        self.failures.push(reason);
    }
}

/// Cancels the run when the enumeration reaches position `at`.
struct CancelAt {
    inner: VecSource,
    controller: Arc<RunController>,
    at: usize,
}

impl TrajectorySource for CancelAt {
    fn trajectories(&self) -> Box<dyn Iterator<Item = rendezvous_env::Result<TrajectoryRecord>> + '_> {
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

fn remove_checkpoint(path: PathBuf) {
    if let Err(e) = std::fs::remove_file(&path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

/// Three vehicles driving through one intersection at 10 m/s, sampled every
/// second. NORTH and EAST reach it together, EAST_LATE 30s after EAST.
fn crossing_records(start: i64) -> Vec<TrajectoryRecord> {
    let (lat, lon) = (41.15, -8.61);
    let lon_scale = rendezvous_core::geodesic::meters_per_degree_lon(lat);
    let lat_scale = rendezvous_core::geodesic::METERS_PER_DEGREE;
    let offsets: Vec<f64> = (0..21).map(|i| (i as f64 - 10.0) * 10.0).collect();

    let north: Vec<(f64, f64)> = offsets.iter().map(|d| (lon, lat + d / lat_scale)).collect();
    let east: Vec<(f64, f64)> = offsets.iter().map(|d| (lon + d / lon_scale, lat)).collect();

    vec![
        TrajectoryRecord::new("NORTH", start, 1, &north),
        TrajectoryRecord::new("EAST", start, 1, &east),
        TrajectoryRecord::new("EAST_LATE", start + 30, 1, &east),
    ]
}

/// Close pairs split by a grid cell corner, the equator and the prime
/// meridian, plus a pair 6m apart across a cell edge that must not match.
fn boundary_records(cell_size: f64, start: i64) -> Vec<TrajectoryRecord> {
    let edge_lat = (41.15 / cell_size).round() * cell_size;
    let edge_lon = (-8.61 / cell_size).round() * cell_size;
    let nudge = cell_size / 20.0;
    let six_meters = 6.0 / rendezvous_core::geodesic::METERS_PER_DEGREE;

    vec![
        TrajectoryRecord::new("EDGE_A", start, 15, &[(edge_lon - nudge, edge_lat - nudge)]),
        TrajectoryRecord::new("EDGE_B", start + 1, 15, &[(edge_lon + nudge, edge_lat + nudge)]),
        TrajectoryRecord::new(
            "FAR_A",
            start + 2,
            15,
            &[(edge_lon + 0.5, edge_lat - six_meters / 2.0)],
        ),
        TrajectoryRecord::new(
            "FAR_B",
            start + 2,
            15,
            &[(edge_lon + 0.5, edge_lat + six_meters / 2.0)],
        ),
        TrajectoryRecord::new("SOUTH", start + 3, 15, &[(10.0, -0.00001)]),
        TrajectoryRecord::new("NORTH", start + 4, 15, &[(10.0, 0.00001)]),
        TrajectoryRecord::new("WEST", start + 5, 15, &[(-0.00001, 42.0)]),
        TrajectoryRecord::new("EAST", start + 5, 15, &[(0.00001, 42.0)]),
    ]
}
