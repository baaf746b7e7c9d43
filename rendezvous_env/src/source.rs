//! Trajectory source abstraction for Rendezvous runs.

use crate::error::{EnvError, Result};
use crate::types::TrajectoryRecord;

/// Aggregate size of a source, used for progress reporting and for checking
/// that a checkpoint still describes the same input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceTotals {
    /// Number of enumerated trajectories (malformed ones included)
    pub trips: usize,

    /// Number of usable coordinates across all well-formed trajectories
    pub points: usize,

    /// Southernmost and northernmost usable latitude, `None` without points
    pub latitude_range: Option<(f64, f64)>,
}

impl SourceTotals {
    /// Folds one record into the totals.
    pub fn add_record(&mut self, record: &TrajectoryRecord) {
        self.points += record.usable_points();
        if let Some((lo, hi)) = record.latitude_range() {
            self.latitude_range = Some(match self.latitude_range {
                Some((min, max)) => (min.min(lo), max.max(hi)),
                None => (lo, hi),
            });
        }
    }
}

/// Abstraction for the external store that owns the trajectory corpus.
///
/// # Contract
///
/// - [`trajectories`](Self::trajectories) yields records ordered by
///   `start_time` (non-decreasing). The engine relies on this ordering to
///   bound memory through eviction.
/// - Every call restarts the enumeration from the beginning and yields the
///   same sequence. Resuming a run skips already-processed positions of a
///   fresh enumeration.
/// - A record that cannot be parsed is yielded as `Err(EnvError::Malformed)`
///   in its position; the enumeration continues after it.
///
/// ```text
/// Store                      Source                       Engine
///   |-- rows ------------------>|                            |
///   |                           |-- Ok(record) / Err(..) --->|-- expand / skip
/// ```
pub trait TrajectorySource: Send + Sync {
    /// Starts a fresh ordered enumeration.
    fn trajectories(&self) -> Box<dyn Iterator<Item = Result<TrajectoryRecord>> + '_>;

    /// Counts trips and usable points and measures the latitude extent.
    ///
    /// The default implementation scans one full enumeration.
    fn totals(&self) -> SourceTotals {
        let mut totals = SourceTotals::default();
        for entry in self.trajectories() {
            totals.trips += 1;
            if let Ok(record) = entry {
                totals.add_record(&record);
            }
        }
        totals
    }
}

/// In-memory source, mostly for tests and for callers that already loaded
/// their corpus.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    entries: Vec<std::result::Result<TrajectoryRecord, String>>,
}

impl VecSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source from well-formed records.
    ///
    /// Records are sorted by `start_time` (stable, so ties keep their order).
    pub fn from_records(mut records: Vec<TrajectoryRecord>) -> Self {
        records.sort_by_key(|r| r.start_time);
        Self {
            entries: records.into_iter().map(Ok).collect(),
        }
    }

    /// Appends a record at the end of the enumeration.
    pub fn push(&mut self, record: TrajectoryRecord) {
        self.entries.push(Ok(record));
    }

    /// Appends an entry that will be reported as malformed.
    pub fn push_malformed(&mut self, reason: impl Into<String>) {
        self.entries.push(Err(reason.into()));
    }

    /// Returns a source holding only the first `n` entries.
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            entries: self.entries.iter().take(n).cloned().collect(),
        }
    }

    /// Number of entries, malformed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the source holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TrajectorySource for VecSource {
    fn trajectories(&self) -> Box<dyn Iterator<Item = Result<TrajectoryRecord>> + '_> {
        Box::new(self.entries.iter().enumerate().map(|(position, entry)| {
            entry
                .clone()
                .map_err(|reason| EnvError::malformed(position, reason))
        }))
    }
}
