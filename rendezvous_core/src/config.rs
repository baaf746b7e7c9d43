//! Run configuration.

use crate::error::{EngineError, Result};
use crate::geodesic::{CheapBound, DEFAULT_BAND_HALF_WIDTH, DEFAULT_REFERENCE_LATITUDE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where checkpoints are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// JSON document written to a temp file and renamed over the target
    #[default]
    File,

    /// Embedded sled key-value database at the checkpoint path
    Sled,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "sled" => Ok(Self::Sled),
            _ => Err(format!("Unknown checkpoint backend: {}", s)),
        }
    }
}

/// Configuration for a join run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum distance for a match in meters, inclusive (default: 5.0)
    pub distance_threshold_meters: f64,

    /// Maximum time difference for a match in seconds, inclusive (default: 5)
    pub time_threshold_seconds: i64,

    /// Points accumulated before a batch is dispatched (default: 2000)
    pub batch_size: usize,

    /// Worker threads in the pool (default: cores - 2, clamped to 2..=6)
    pub worker_count: usize,

    /// Checkpoint location; `None` disables checkpointing
    pub checkpoint_path: Option<PathBuf>,

    /// Checkpoint storage format (default: file)
    pub checkpoint_backend: CheckpointBackend,

    /// Wall-clock seconds between checkpoint saves (default: 900)
    pub save_interval_seconds: u64,

    /// Wall-clock seconds between index evictions (default: 300)
    pub cleanup_interval_seconds: u64,

    /// Grid cell size in degrees; `None` derives a safe size
    pub cell_size_degrees: Option<f64>,

    /// Center of the operating latitude band (default: 41.15)
    pub reference_latitude: f64,

    /// Half-width of the operating latitude band in degrees (default: 5.0)
    pub latitude_band_degrees: f64,

    /// Extra seconds kept behind the eviction cutoff (default: 60)
    pub eviction_margin_seconds: i64,

    /// Trips between progress log lines (default: 3000)
    pub report_every_trips: u64,

    /// Continue from a valid checkpoint if one exists (default: true)
    pub resume: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            distance_threshold_meters: 5.0,
            time_threshold_seconds: 5,
            batch_size: 2000,
            worker_count: default_worker_count(),
            checkpoint_path: Some(PathBuf::from("rendezvous_progress.json")),
            checkpoint_backend: CheckpointBackend::File,
            save_interval_seconds: 15 * 60,
            cleanup_interval_seconds: 5 * 60,
            cell_size_degrees: None,
            reference_latitude: DEFAULT_REFERENCE_LATITUDE,
            latitude_band_degrees: DEFAULT_BAND_HALF_WIDTH,
            eviction_margin_seconds: 60,
            report_every_trips: 3000,
            resume: true,
        }
    }
}

/// Leaves two cores for I/O and the control loop, never fewer than two
/// workers nor more than six.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(2).clamp(2, 6)
}

impl RunConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the distance threshold in meters.
    pub fn with_distance_threshold(mut self, meters: f64) -> Self {
        self.distance_threshold_meters = meters;
        self
    }

    /// Sets the time threshold in seconds.
    pub fn with_time_threshold(mut self, seconds: i64) -> Self {
        self.time_threshold_seconds = seconds;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, points: usize) -> Self {
        self.batch_size = points;
        self
    }

    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Sets the checkpoint path (`None` disables checkpoints).
    pub fn with_checkpoint_path(mut self, path: Option<PathBuf>) -> Self {
        self.checkpoint_path = path;
        self
    }

    /// Sets the checkpoint backend.
    pub fn with_checkpoint_backend(mut self, backend: CheckpointBackend) -> Self {
        self.checkpoint_backend = backend;
        self
    }

    /// Sets the save interval.
    pub fn with_save_interval(mut self, seconds: u64) -> Self {
        self.save_interval_seconds = seconds;
        self
    }

    /// Sets the cleanup interval.
    pub fn with_cleanup_interval(mut self, seconds: u64) -> Self {
        self.cleanup_interval_seconds = seconds;
        self
    }

    /// Forces a grid cell size in degrees.
    pub fn with_cell_size(mut self, degrees: f64) -> Self {
        self.cell_size_degrees = Some(degrees);
        self
    }

    /// Sets the operating latitude band.
    pub fn with_latitude_band(mut self, reference_latitude: f64, half_width: f64) -> Self {
        self.reference_latitude = reference_latitude;
        self.latitude_band_degrees = half_width;
        self
    }

    /// Sets the progress report cadence.
    pub fn with_report_every(mut self, trips: u64) -> Self {
        self.report_every_trips = trips;
        self
    }

    /// Enables or disables resuming from a checkpoint.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Cheap-bound filter for the configured operating band.
    pub fn cheap_bound(&self) -> CheapBound {
        CheapBound::for_latitude(self.reference_latitude, self.latitude_band_degrees)
    }

    /// Grid cell size for an input inside the operating band.
    pub fn effective_cell_size(&self) -> f64 {
        self.cell_size_for(None)
    }

    /// Grid cell size for an input spanning `latitude_range`.
    ///
    /// A derived size covers the band widened to the input's extent, so the
    /// 3×3 neighborhood still spans the radius at the most poleward point.
    /// An explicit size is returned unchanged.
    pub fn cell_size_for(&self, latitude_range: Option<(f64, f64)>) -> f64 {
        if let Some(cell) = self.cell_size_degrees {
            return cell;
        }
        let bound = match latitude_range {
            Some((lo, hi)) => self.cheap_bound().widened(lo, hi),
            None => self.cheap_bound(),
        };
        bound.safe_cell_size(self.distance_threshold_meters)
    }

    /// Checks invariants that would otherwise produce wrong results.
    pub fn validate(&self) -> Result<()> {
        if !(self.distance_threshold_meters.is_finite() && self.distance_threshold_meters > 0.0) {
            return Err(EngineError::config(format!(
                "distance threshold must be positive, got {}",
                self.distance_threshold_meters
            )));
        }
        if self.time_threshold_seconds < 0 {
            return Err(EngineError::config(format!(
                "time threshold must not be negative, got {}",
                self.time_threshold_seconds
            )));
        }
        if self.batch_size == 0 {
            return Err(EngineError::config("batch size must be at least 1"));
        }
        if self.worker_count == 0 {
            return Err(EngineError::config("worker count must be at least 1"));
        }
        if !(self.latitude_band_degrees.is_finite() && self.latitude_band_degrees >= 0.0) {
            return Err(EngineError::config("latitude band must be a non-negative width"));
        }
        if self.eviction_margin_seconds < 0 {
            return Err(EngineError::config("eviction margin must not be negative"));
        }

        if let Some(cell) = self.cell_size_degrees {
            let min = self.cheap_bound().min_cell_size(self.distance_threshold_meters);
            if !(cell.is_finite() && cell >= min) {
                return Err(EngineError::config(format!(
                    "cell size {}° is smaller than {:.7}°: the 3x3 neighborhood would not cover {}m",
                    cell, min, self.distance_threshold_meters
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.distance_threshold_meters, 5.0);
        assert_eq!(config.time_threshold_seconds, 5);
        assert_eq!(config.batch_size, 2000);
        assert!((2..=6).contains(&config.worker_count));
        assert_eq!(config.save_interval_seconds, 900);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_undersized_cell_is_rejected() {
        // 0.00005° is ~4.2m of longitude at 41°N, too small for 5m
        let config = RunConfig::default().with_cell_size(0.00005);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = RunConfig::default().with_cell_size(0.0001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds_are_rejected() {
        assert!(RunConfig::default().with_distance_threshold(0.0).validate().is_err());
        assert!(RunConfig::default().with_time_threshold(-1).validate().is_err());
        assert!(RunConfig::default().with_batch_size(0).validate().is_err());
        assert!(RunConfig::default().with_workers(0).validate().is_err());
    }

    #[test]
    fn test_derived_cell_size_is_valid() {
        let config = RunConfig::default().with_distance_threshold(50.0);
        let with_cell = config.clone().with_cell_size(config.effective_cell_size());
        assert!(with_cell.validate().is_ok());
    }

    #[test]
    fn test_cell_size_follows_input_extent() {
        let config = RunConfig::default();
        let inside = config.cell_size_for(Some((41.1, 41.2)));
        assert_eq!(inside, config.effective_cell_size());

        // Cells must grow in degrees where longitude degrees shrink
        let north = config.cell_size_for(Some((41.1, 60.0)));
        assert!(north > inside);
        assert!(north * crate::geodesic::meters_per_degree_lon(60.0) >= 5.0);

        let forced = config.with_cell_size(0.001);
        assert_eq!(forced.cell_size_for(Some((41.1, 60.0))), 0.001);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"distance_threshold_meters": 10.0, "checkpoint_backend": "sled"}"#)
                .unwrap();
        assert_eq!(config.distance_threshold_meters, 10.0);
        assert_eq!(config.checkpoint_backend, CheckpointBackend::Sled);
        assert_eq!(config.batch_size, 2000);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SLED".parse::<CheckpointBackend>(), Ok(CheckpointBackend::Sled));
        assert_eq!("json".parse::<CheckpointBackend>(), Ok(CheckpointBackend::File));
        assert!("postgres".parse::<CheckpointBackend>().is_err());
    }
}
