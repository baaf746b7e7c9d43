//! Common types for the Rendezvous environment abstraction.

use serde::{Deserialize, Serialize};

/// Sampling interval used by the taxi corpus when a record does not carry one.
pub const DEFAULT_SAMPLING_INTERVAL_SECONDS: i64 = 15;

/// One trajectory as delivered by a data source.
///
/// Coordinates are `[lon, lat]` in degrees, sampled every
/// `sampling_interval_seconds` starting at `start_time`. Entries with fewer
/// than two components are kept as-is so that the expander can skip them
/// individually instead of rejecting the whole trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    /// Vehicle that produced the trajectory
    pub vehicle_id: String,

    /// Unix timestamp (seconds) of the first coordinate
    pub start_time: i64,

    /// Seconds between consecutive coordinates
    pub sampling_interval_seconds: i64,

    /// Ordered `[lon, lat]` samples
    pub coordinates: Vec<Vec<f64>>,
}

impl TrajectoryRecord {
    /// Creates a record from well-formed `(lon, lat)` tuples.
    pub fn new(
        vehicle_id: impl Into<String>,
        start_time: i64,
        sampling_interval_seconds: i64,
        coordinates: &[(f64, f64)],
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            start_time,
            sampling_interval_seconds,
            coordinates: coordinates.iter().map(|&(lon, lat)| vec![lon, lat]).collect(),
        }
    }

    /// Creates a record from raw coordinate rows, malformed rows included.
    pub fn from_raw(
        vehicle_id: impl Into<String>,
        start_time: i64,
        sampling_interval_seconds: i64,
        coordinates: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            start_time,
            sampling_interval_seconds,
            coordinates,
        }
    }

    /// Number of coordinate rows that will expand into points.
    pub fn usable_points(&self) -> usize {
        self.coordinates.iter().filter(|c| c.len() >= 2).count()
    }

    /// Smallest and largest latitude among usable rows.
    pub fn latitude_range(&self) -> Option<(f64, f64)> {
        self.coordinates
            .iter()
            .filter(|c| c.len() >= 2)
            .map(|c| c[1])
            .fold(None, |range, lat| match range {
                Some((lo, hi)) => Some((f64::min(lo, lat), f64::max(hi, lat))),
                None => Some((lat, lat)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_points_skips_short_rows() {
        let record = TrajectoryRecord::from_raw(
            "20000589",
            1_372_636_858,
            DEFAULT_SAMPLING_INTERVAL_SECONDS,
            vec![vec![-8.6, 41.15], vec![-8.61], vec![], vec![-8.62, 41.16, 3.0]],
        );
        assert_eq!(record.usable_points(), 2);
        assert_eq!(record.latitude_range(), Some((41.15, 41.16)));
    }

    #[test]
    fn test_new_orders_lon_lat() {
        let record = TrajectoryRecord::new("A", 0, 15, &[(-8.6, 41.15)]);
        assert_eq!(record.coordinates, vec![vec![-8.6, 41.15]]);
    }
}
