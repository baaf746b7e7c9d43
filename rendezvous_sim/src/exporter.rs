//! JSON results export.
//!
//! Writes the outcome of a join run as one JSON document for downstream
//! reporting.

use rendezvous_core::{JoinStats, RunConfig, RunResult, VehiclePair};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Thresholds the run was executed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportThresholds {
    pub distance_meters: f64,
    pub time_seconds: i64,
}

/// Complete results export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsExport {
    /// Unix seconds at which the export was produced
    pub generated_at: u64,

    pub thresholds: ExportThresholds,

    /// Number of distinct pairs
    pub pair_count: usize,

    /// Pairs ordered by vehicle id
    pub pairs: Vec<VehiclePair>,

    pub points_processed: u64,
    pub points_total: u64,
    pub trips_processed: u64,
    pub trips_total: u64,

    /// Processed share of the input, in percent
    pub completion_percent: f64,

    /// Runtime of the invocation that produced the export
    pub elapsed_seconds: f64,

    pub cancelled: bool,
    pub resumed: bool,
    pub stats: JoinStats,
}

impl ResultsExport {
    /// Creates an export from a finished run.
    pub fn new(result: &RunResult, config: &RunConfig, generated_at: u64) -> Self {
        Self {
            generated_at,
            thresholds: ExportThresholds {
                distance_meters: config.distance_threshold_meters,
                time_seconds: config.time_threshold_seconds,
            },
            pair_count: result.pairs.len(),
            pairs: result.pairs.iter().cloned().collect(),
            points_processed: result.points_processed,
            points_total: result.points_total,
            trips_processed: result.trips_processed,
            trips_total: result.trips_total,
            completion_percent: result.completion() * 100.0,
            elapsed_seconds: result.elapsed_seconds,
            cancelled: result.cancelled,
            resumed: result.resumed,
            stats: result.stats,
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::PairSet;

    #[test]
    fn test_export_contents() {
        let mut pairs = PairSet::new();
        pairs.insert(VehiclePair::new("B", "A").unwrap());
        let result = RunResult {
            pairs,
            points_processed: 50,
            points_total: 100,
            trips_processed: 2,
            trips_total: 4,
            ..Default::default()
        };

        let export = ResultsExport::new(&result, &RunConfig::default(), 1_700_000_000);
        assert_eq!(export.pair_count, 1);
        assert_eq!(export.completion_percent, 50.0);
        assert_eq!(export.thresholds.distance_meters, 5.0);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["pairs"][0], serde_json::json!(["A", "B"]));
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("rendezvous-export-{}.json", uuid::Uuid::new_v4()));
        let export = ResultsExport::new(&RunResult::default(), &RunConfig::default(), 0);
        export.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: ResultsExport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.pair_count, 0);
        let _ = std::fs::remove_file(&path);
    }
}
