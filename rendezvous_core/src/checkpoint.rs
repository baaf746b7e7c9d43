//! Checkpointing of run progress.
//!
//! A checkpoint stores results and counters, not index contents: the index
//! is rebuilt on resume by replaying the already-processed prefix of the
//! input. Two stores are provided:
//! - [`JsonFileStore`]: JSON written to a sibling temp file, fsynced, then
//!   renamed over the target, so a crash mid-write leaves the previous
//!   checkpoint intact.
//! - [`SledStore`]: a single key in an embedded sled database, flushed after
//!   each write.

use crate::config::{CheckpointBackend, RunConfig};
use crate::error::{EngineError, Result};
use crate::types::PairSet;
use rendezvous_env::SourceTotals;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Durable snapshot of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Every pair discovered so far
    pub pairs_found: PairSet,

    /// Points whose comparisons are complete
    pub points_processed: u64,

    /// Usable points in the whole input
    pub points_total: u64,

    /// Leading trajectories (by source position) fully processed
    pub trips_processed: u64,

    /// Wall-clock time of the snapshot (Unix seconds)
    pub timestamp: u64,

    /// Distance threshold the pairs were found with
    #[serde(default)]
    pub distance_threshold_meters: f64,

    /// Time threshold the pairs were found with
    #[serde(default)]
    pub time_threshold_seconds: i64,

    /// Grid cell size of the index that produced the pairs
    #[serde(default)]
    pub cell_size_degrees: f64,
}

impl RunProgress {
    /// Fraction of points processed, in `[0, 1]`.
    pub fn completion(&self) -> f64 {
        if self.points_total == 0 {
            0.0
        } else {
            self.points_processed as f64 / self.points_total as f64
        }
    }

    /// Returns true if this snapshot can describe a run over `totals`.
    pub fn is_consistent_with(&self, totals: SourceTotals) -> bool {
        self.points_total == totals.points as u64
            && self.points_processed <= self.points_total
            && self.trips_processed <= totals.trips as u64
    }

    /// Returns true if this snapshot was taken by a run with the same
    /// thresholds and grid. Pairs found under other settings are not reusable.
    pub fn matches_settings(&self, distance_m: f64, time_s: i64, cell_size: f64) -> bool {
        self.time_threshold_seconds == time_s
            && nearly_equal(self.distance_threshold_meters, distance_m)
            && nearly_equal(self.cell_size_degrees, cell_size)
    }
}

/// JSON does not always round-trip the last bit of an `f64`.
fn nearly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Persistent storage for one checkpoint.
pub trait CheckpointStore: Send + Sync {
    /// Durably replaces the stored checkpoint.
    fn save(&self, progress: &RunProgress) -> Result<()>;

    /// Reads the stored checkpoint, `Ok(None)` if there is none.
    fn load(&self) -> Result<Option<RunProgress>>;

    /// Deletes the stored checkpoint.
    fn clear(&self) -> Result<()>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// JSON file store with temp-file-then-rename writes.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store targeting `path`. Nothing is touched until `save`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for JsonFileStore {
    fn save(&self, progress: &RunProgress) -> Result<()> {
        let json = serde_json::to_vec(progress)?;
        let temp = self.temp_path();

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&temp, &self.path)
        };

        write().map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            EngineError::checkpoint(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    fn load(&self) -> Result<Option<RunProgress>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::checkpoint(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            EngineError::checkpoint(format!("Corrupt checkpoint {}: {}", self.path.display(), e))
        })
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::checkpoint(format!(
                "Failed to delete {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Sled-based checkpoint store.
///
/// Uses an embedded key-value database for durability.
pub struct SledStore {
    db: sled::Db,
    location: String,
}

const PROGRESS_KEY: &[u8] = b"run_progress";

impl SledStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| EngineError::checkpoint(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self {
            db,
            location: path.as_ref().display().to_string(),
        })
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| EngineError::checkpoint(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self {
            db,
            location: "<temporary>".to_string(),
        })
    }
}

impl CheckpointStore for SledStore {
    fn save(&self, progress: &RunProgress) -> Result<()> {
        let json = serde_json::to_vec(progress)?;
        self.db
            .insert(PROGRESS_KEY, json)
            .map_err(|e| EngineError::checkpoint(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| EngineError::checkpoint(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<RunProgress>> {
        let value = self
            .db
            .get(PROGRESS_KEY)
            .map_err(|e| EngineError::checkpoint(format!("Read failed: {}", e)))?;
        match value {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EngineError::checkpoint(format!("Corrupt checkpoint: {}", e))),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<()> {
        self.db
            .remove(PROGRESS_KEY)
            .map_err(|e| EngineError::checkpoint(format!("Remove failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| EngineError::checkpoint(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sled:{}", self.location)
    }
}

/// Front for a checkpoint store that never lets I/O problems escape.
///
/// Failures are logged and reported as `false` / `None`; the run keeps its
/// in-memory progress and tries again at the next interval.
pub struct CheckpointManager {
    store: Option<Box<dyn CheckpointStore>>,
}

impl CheckpointManager {
    /// Wraps a store.
    pub fn new(store: Box<dyn CheckpointStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A manager that never saves and never loads.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Builds the store named by the configuration. A store that cannot be
    /// opened disables checkpointing for the run instead of aborting it.
    pub fn from_config(config: &RunConfig) -> Self {
        let Some(path) = &config.checkpoint_path else {
            return Self::disabled();
        };
        match config.checkpoint_backend {
            CheckpointBackend::File => Self::new(Box::new(JsonFileStore::new(path))),
            CheckpointBackend::Sled => match SledStore::open(path) {
                Ok(store) => Self::new(Box::new(store)),
                Err(e) => {
                    warn!("Checkpointing disabled for this run: {}", e);
                    Self::disabled()
                }
            },
        }
    }

    /// Returns true if a store is attached.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Persists `progress`. Returns whether the write succeeded.
    pub fn save(&self, progress: &RunProgress) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.save(progress) {
            Ok(()) => {
                info!(
                    "Progress saved to {} ({} pairs, {}/{} points)",
                    store.describe(),
                    progress.pairs_found.len(),
                    progress.points_processed,
                    progress.points_total
                );
                true
            }
            Err(e) => {
                warn!("Checkpoint save failed, continuing without it: {}", e);
                false
            }
        }
    }

    /// Loads the latest checkpoint. Missing, unreadable and corrupt
    /// checkpoints all yield `None`.
    pub fn load(&self) -> Option<RunProgress> {
        let store = self.store.as_ref()?;
        match store.load() {
            Ok(Some(progress)) => {
                info!("Loaded progress from {}", store.describe());
                Some(progress)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unusable checkpoint: {}", e);
                None
            }
        }
    }

    /// Deletes the stored checkpoint, logging failures.
    pub fn clear(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.clear() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to clear checkpoint: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VehiclePair;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rendezvous-{}-{}", name, uuid::Uuid::new_v4()))
    }

    fn sample_progress() -> RunProgress {
        let mut pairs = PairSet::new();
        pairs.insert(VehiclePair::new("20000589", "20000021").unwrap());
        pairs.insert(VehiclePair::new("A", "B").unwrap());
        RunProgress {
            pairs_found: pairs,
            points_processed: 4_000,
            points_total: 10_000,
            trips_processed: 120,
            timestamp: 1_700_000_000,
            distance_threshold_meters: 5.0,
            time_threshold_seconds: 5,
            cell_size_degrees: 0.0001,
        }
    }

    #[test]
    fn test_file_round_trip() {
        let path = temp_path("roundtrip.json");
        let store = JsonFileStore::new(&path);
        let progress = sample_progress();

        store.save(&progress).unwrap();
        assert_eq!(store.load().unwrap(), Some(progress));
        assert!(!store.temp_path().exists());

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_no_checkpoint() {
        let store = JsonFileStore::new(temp_path("missing.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_reported_not_fatal() {
        let path = temp_path("corrupt.json");
        std::fs::write(&path, b"{\"pairs_found\": [[\"A\"").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(EngineError::Checkpoint(_))));

        let manager = CheckpointManager::new(Box::new(store));
        assert_eq!(manager.load(), None);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_save_overwrites_previous_checkpoint() {
        let path = temp_path("overwrite.json");
        let manager = CheckpointManager::new(Box::new(JsonFileStore::new(&path)));

        let mut progress = sample_progress();
        assert!(manager.save(&progress));
        progress.points_processed = 9_000;
        progress.trips_processed = 300;
        assert!(manager.save(&progress));

        assert_eq!(manager.load(), Some(progress));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_location_fails_softly() {
        let path = temp_path("no-such-dir").join("progress.json");
        let manager = CheckpointManager::new(Box::new(JsonFileStore::new(&path)));
        assert!(!manager.save(&sample_progress()));
        assert_eq!(manager.load(), None);
    }

    #[test]
    fn test_sled_round_trip() {
        let store = SledStore::open_temp().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let progress = sample_progress();
        store.save(&progress).unwrap();
        assert_eq!(store.load().unwrap(), Some(progress));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_disabled_manager() {
        let manager = CheckpointManager::disabled();
        assert!(!manager.is_enabled());
        assert!(!manager.save(&sample_progress()));
        assert_eq!(manager.load(), None);
    }

    #[test]
    fn test_consistency_with_source_totals() {
        let progress = sample_progress();
        let totals = SourceTotals {
            trips: 500,
            points: 10_000,
            ..SourceTotals::default()
        };
        assert!(progress.is_consistent_with(totals));
        assert!(!progress.is_consistent_with(SourceTotals {
            points: 12_000,
            ..totals
        }));
        assert!(!progress.is_consistent_with(SourceTotals {
            trips: 100,
            ..totals
        }));
        assert_eq!(progress.completion(), 0.4);
    }

    #[test]
    fn test_settings_must_match() {
        let progress = sample_progress();
        assert!(progress.matches_settings(5.0, 5, 0.0001));
        assert!(progress.matches_settings(5.0 + 1e-15, 5, 0.0001 * (1.0 + 1e-13)));
        assert!(!progress.matches_settings(1.0, 5, 0.0001));
        assert!(!progress.matches_settings(5.0, 10, 0.0001));
        assert!(!progress.matches_settings(5.0, 5, 0.0002));
    }

    #[test]
    fn test_checkpoint_without_settings_matches_nothing() {
        let json = br#"{"pairs_found":[],"points_processed":2,"points_total":4,"trips_processed":1,"timestamp":0}"#;
        let progress: RunProgress = serde_json::from_slice(json).unwrap();
        assert_eq!(progress.distance_threshold_meters, 0.0);
        assert!(!progress.matches_settings(5.0, 5, 0.0001));
    }
}
