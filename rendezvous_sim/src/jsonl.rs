//! JSON-lines trajectory files.
//!
//! One trip per line:
//!
//! ```text
//! {"vehicle_id": "20000589", "start_time": 1372636858, "polyline": [[-8.618643, 41.141412], ...]}
//! {"TAXI_ID": 20000596, "TIMESTAMP": 1372637303, "POLYLINE": "[[-8.639847,41.159826]]"}
//! ```
//!
//! The polyline may be an array or a JSON-encoded string of `[lon, lat]`
//! pairs. `sampling_interval_seconds` is optional. Lines must be ordered by
//! start time.

use rendezvous_env::{
    EnvError, TrajectoryRecord, TrajectorySource, DEFAULT_SAMPLING_INTERVAL_SECONDS,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VehicleId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Polyline {
    Rows(Vec<Vec<f64>>),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct Line {
    #[serde(alias = "TAXI_ID", alias = "taxi_id")]
    vehicle_id: VehicleId,

    #[serde(alias = "TIMESTAMP", alias = "timestamp")]
    start_time: i64,

    #[serde(default)]
    sampling_interval_seconds: Option<i64>,

    #[serde(alias = "POLYLINE")]
    polyline: Polyline,
}

impl Line {
    fn into_record(self) -> Result<TrajectoryRecord, String> {
        let vehicle_id = match self.vehicle_id {
            VehicleId::Text(id) => id,
            VehicleId::Number(id) => id.to_string(),
        };
        let coordinates = match self.polyline {
            Polyline::Rows(rows) => rows,
            Polyline::Encoded(text) => serde_json::from_str(&text)
                .map_err(|e| format!("polyline is not a coordinate list: {}", e))?,
        };
        Ok(TrajectoryRecord::from_raw(
            vehicle_id,
            self.start_time,
            self.sampling_interval_seconds
                .unwrap_or(DEFAULT_SAMPLING_INTERVAL_SECONDS),
            coordinates,
        ))
    }
}

/// Parses one line into a record.
pub fn parse_line(line: &str) -> Result<TrajectoryRecord, String> {
    serde_json::from_str::<Line>(line)
        .map_err(|e| e.to_string())?
        .into_record()
}

/// File-backed trajectory source.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    /// Opens a source, checking that the file is readable.
    pub fn open<P: AsRef<Path>>(path: P) -> rendezvous_env::Result<Self> {
        File::open(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrajectorySource for JsonLinesSource {
    fn trajectories(&self) -> Box<dyn Iterator<Item = rendezvous_env::Result<TrajectoryRecord>> + '_> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => return Box::new(std::iter::once(Err(EnvError::from(e)))),
        };

        let lines = BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(text) if text.trim().is_empty()));

        Box::new(lines.enumerate().map(|(position, line)| {
            let line = line?;
            parse_line(&line).map_err(|reason| EnvError::malformed(position, reason))
        }))
    }
}

/// Writes records as JSON lines, polyline as an array.
pub fn write_json_lines<P: AsRef<Path>>(path: P, records: &[TrajectoryRecord]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        let line = serde_json::json!({
            "vehicle_id": record.vehicle_id,
            "start_time": record.start_time,
            "sampling_interval_seconds": record.sampling_interval_seconds,
            "polyline": record.coordinates,
        });
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
