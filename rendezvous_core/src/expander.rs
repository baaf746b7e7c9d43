//! Trajectory expansion: one trajectory in, timestamped point events out.

use crate::types::PointEvent;
use rendezvous_env::TrajectoryRecord;
use std::sync::Arc;

/// Lazily expands a trajectory into point events.
///
/// The coordinate at index `i` (counting malformed rows too) is stamped
/// `start_time + i * sampling_interval_seconds`. Rows with fewer than two
/// components are skipped. Coordinates are `[lon, lat]`.
pub fn expand<'a>(
    vehicle_id: &str,
    start_time: i64,
    sampling_interval_seconds: i64,
    coordinates: &'a [Vec<f64>],
) -> impl Iterator<Item = PointEvent> + 'a {
    let vehicle_id: Arc<str> = Arc::from(vehicle_id);
    coordinates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.len() >= 2)
        .map(move |(i, c)| PointEvent {
            vehicle_id: Arc::clone(&vehicle_id),
            timestamp: start_time + i as i64 * sampling_interval_seconds,
            lat: c[1],
            lon: c[0],
        })
}

/// Expands a source record.
pub fn expand_record(record: &TrajectoryRecord) -> impl Iterator<Item = PointEvent> + '_ {
    expand(
        &record.vehicle_id,
        record.start_time,
        record.sampling_interval_seconds,
        &record.coordinates,
    )
}
