//! Rendezvous simulator and join CLI
//!
//! Run deterministic join scenarios against the brute-force oracle, join a
//! JSON-lines trajectory file, or generate a synthetic fleet to join.

use clap::{Args, Parser, Subcommand};
use rendezvous_core::{run_with_controller, CheckpointBackend, RunConfig, RunController};
use rendezvous_env::{RunContext, SystemContext, TrajectorySource};
use rendezvous_sim::scenarios::ScenarioId;
use rendezvous_sim::{
    write_json_lines, FleetConfig, FleetGenerator, JsonLinesSource, ResultsExport, ScenarioResult,
    ScenarioRunner, SimError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Rendezvous spatio-temporal join CLI
#[derive(Parser, Debug)]
#[command(name = "rendezvous-sim")]
#[command(about = "Find vehicles that met, and test the engine that finds them", long_about = None)]
struct Cli {
    /// Verbose output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run deterministic scenarios against the oracle
    Scenario(ScenarioArgs),

    /// Join a JSON-lines trajectory file
    Join(JoinArgs),

    /// Write a synthetic fleet as JSON lines
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct ScenarioArgs {
    /// Scenario to run (convoy, crossing, dense, sparse, malformed, resume, boundary, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Worker threads per run
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Points per batch
    #[arg(short, long, default_value = "128")]
    batch_size: usize,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// JSON-lines trajectory file, ordered by start time
    #[arg(short, long)]
    input: PathBuf,

    /// Base configuration file (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Distance threshold in meters
    #[arg(short, long)]
    distance: Option<f64>,

    /// Time threshold in seconds
    #[arg(short, long)]
    time: Option<i64>,

    /// Points per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Center of the operating latitude band in degrees
    #[arg(long, allow_negative_numbers = true)]
    reference_latitude: Option<f64>,

    /// Half-width of the operating latitude band in degrees
    #[arg(long)]
    latitude_band: Option<f64>,

    /// Grid cell size in degrees (derived from the distance when absent)
    #[arg(long)]
    cell_size: Option<f64>,

    /// Checkpoint location
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Checkpoint backend (file or sled)
    #[arg(long)]
    backend: Option<CheckpointBackend>,

    /// Disable checkpointing
    #[arg(long)]
    no_checkpoint: bool,

    /// Ignore an existing checkpoint
    #[arg(long)]
    fresh: bool,

    /// Results file
    #[arg(short, long, default_value = "close_pairs_results.json")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// Master seed
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Background vehicles
    #[arg(long, default_value = "200")]
    vehicles: usize,

    /// Trips per vehicle
    #[arg(long, default_value = "5")]
    trips: usize,

    /// Coordinates per trip
    #[arg(long, default_value = "40")]
    points: usize,

    /// Planted convoys
    #[arg(long, default_value = "10")]
    convoys: usize,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Scenario(args) => run_scenarios(args),
        Command::Join(args) => match run_join(args) {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                1
            }
        },
        Command::Generate(args) => match generate(args) {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                1
            }
        },
    };

    // Exit with proper code for CI
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

fn run_scenarios(args: ScenarioArgs) -> i32 {
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: convoy, crossing, dense, sparse, malformed, resume, boundary, all");
                return 1;
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if !args.json {
        info!("Rendezvous simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_workers(args.workers)
            .with_batch_size(args.batch_size);

        for scenario in &scenarios {
            all_results.push(runner.run(*scenario));
        }
    }

    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed.is_empty() {
        0
    } else {
        1
    }
}

fn join_config(args: &JoinArgs) -> Result<RunConfig, SimError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };

    if let Some(distance) = args.distance {
        config = config.with_distance_threshold(distance);
    }
    if let Some(time) = args.time {
        config = config.with_time_threshold(time);
    }
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.reference_latitude.is_some() || args.latitude_band.is_some() {
        let reference = args.reference_latitude.unwrap_or(config.reference_latitude);
        let half_width = args.latitude_band.unwrap_or(config.latitude_band_degrees);
        config = config.with_latitude_band(reference, half_width);
    }
    if let Some(cell) = args.cell_size {
        config = config.with_cell_size(cell);
    }
    if let Some(path) = &args.checkpoint {
        config = config.with_checkpoint_path(Some(path.clone()));
    }
    if let Some(backend) = args.backend {
        config = config.with_checkpoint_backend(backend);
    }
    if args.no_checkpoint {
        config = config.with_checkpoint_path(None);
    }
    if args.fresh {
        config = config.with_resume(false);
    }
    Ok(config)
}

#[tokio::main]
async fn run_join(args: JoinArgs) -> Result<(), SimError> {
    let config = join_config(&args)?;
    let source = JsonLinesSource::open(&args.input)?;
    info!("Joining {}", source.path().display());

    let controller = RunController::shared();
    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run (progress is kept)");
                controller.cancel();
            }
        });
    }

    let run_config = config.clone();
    let result = tokio::task::spawn_blocking(move || {
        run_with_controller(run_config, &source as &dyn TrajectorySource, controller)
    })
    .await
    .map_err(|e| SimError::Task(e.to_string()))??;

    let export = ResultsExport::new(&result, &config, SystemContext::new().unix_seconds());
    export.write_to_file(&args.output)?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "  Pairs: {} | Points: {}/{} ({:.2}%) | {:.1}s",
        result.pairs.len(),
        result.points_processed,
        result.points_total,
        result.completion() * 100.0,
        result.elapsed_seconds
    );
    for pair in result.pairs.iter().take(10) {
        info!("    {}", pair);
    }
    if result.pairs.len() > 10 {
        info!("    ... and {} more", result.pairs.len() - 10);
    }
    if result.points_outside_band > 0 {
        warn!(
            "  {} points fell outside the operating band; see --reference-latitude",
            result.points_outside_band
        );
    }
    info!("  Results written to {}", args.output.display());
    if result.cancelled {
        warn!("Run was cancelled; rerun the same command to resume");
    }
    Ok(())
}

fn generate(args: GenerateArgs) -> Result<(), SimError> {
    let fleet = FleetGenerator::new(FleetConfig {
        seed: args.seed,
        vehicles: args.vehicles,
        trips_per_vehicle: args.trips,
        points_per_trip: args.points,
        convoys: args.convoys,
        extent_meters: 3_000.0,
        time_span_seconds: 86_400,
        ..Default::default()
    })
    .generate();

    write_json_lines(&args.output, &fleet.records)?;
    info!(
        "Wrote {} trips ({} planted convoys) to {}",
        fleet.records.len(),
        fleet.convoy_pairs.len(),
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_args(extra: &[&str]) -> JoinArgs {
        let mut argv = vec!["rendezvous-sim", "join", "--input", "trips.jsonl"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Join(args) => args,
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_band_flags_move_the_band() {
        let config = join_config(&join_args(&["--reference-latitude", "-33.9"])).unwrap();
        assert_eq!(config.reference_latitude, -33.9);
        assert_eq!(config.latitude_band_degrees, RunConfig::default().latitude_band_degrees);

        let config = join_config(&join_args(&["--reference-latitude", "60", "--latitude-band", "2"])).unwrap();
        assert!(config.cheap_bound().covers(61.5));
        assert!(!config.cheap_bound().covers(41.15));
    }

    #[test]
    fn test_join_defaults_keep_config() {
        let config = join_config(&join_args(&["--distance", "10", "--no-checkpoint"])).unwrap();
        assert_eq!(config.distance_threshold_meters, 10.0);
        assert_eq!(config.checkpoint_path, None);
        assert_eq!(config.reference_latitude, RunConfig::default().reference_latitude);
    }
}
