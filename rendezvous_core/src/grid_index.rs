//! The spatial-temporal grid index.
//!
//! Points are bucketed into uniform lat/lon cells sized so that the 3×3 block
//! around a query covers the match radius. That turns the all-pairs
//! comparison into a scan of a handful of nearby cells, filtered by time.
//!
//! All access to the cell map goes through one `RwLock`. Readers never see a
//! partially appended cell list, and [`GridIndex::query_then_insert`] runs the
//! lookup and the append in a single critical section so that two points
//! processed concurrently always see each other in one direction.

use crate::types::{CellKey, PointEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Concurrent grid of recently seen points.
#[derive(Debug)]
pub struct GridIndex {
    /// Cell edge length in degrees, fixed for the index lifetime
    cell_size: f64,

    /// Cell -> points hashed into it, in insertion order
    cells: RwLock<HashMap<CellKey, Vec<PointEvent>>>,
}

impl GridIndex {
    /// Creates an empty index.
    ///
    /// `cell_size` must be positive and at least the value returned by
    /// `CheapBound::min_cell_size` for the match radius; `RunConfig::validate`
    /// enforces this for engine runs.
    pub fn new(cell_size: f64) -> Self {
        debug_assert!(cell_size.is_finite() && cell_size > 0.0);
        Self {
            cell_size,
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Cell edge length in degrees.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Cell containing `(lat, lon)`.
    pub fn cell_of(&self, lat: f64, lon: f64) -> CellKey {
        CellKey::of(lat, lon, self.cell_size)
    }

    /// Appends a point to its cell.
    pub fn insert(&self, point: PointEvent) {
        let cell = self.cell_of(point.lat, point.lon);
        self.write_cells().entry(cell).or_default().push(point);
    }

    /// Appends many points, grouped by cell first so that each cell is
    /// extended in one critical section.
    pub fn insert_batch(&self, points: impl IntoIterator<Item = PointEvent>) {
        let mut grouped: HashMap<CellKey, Vec<PointEvent>> = HashMap::new();
        for point in points {
            grouped
                .entry(self.cell_of(point.lat, point.lon))
                .or_default()
                .push(point);
        }

        for (cell, cell_points) in grouped {
            self.write_cells().entry(cell).or_default().extend(cell_points);
        }
    }

    /// Points in the 3×3 neighborhood of `(lat, lon)` whose timestamp is
    /// within `max_time_diff` seconds of `at_time` (inclusive).
    ///
    /// Returns an empty list when nothing matches.
    pub fn query_nearby(&self, lat: f64, lon: f64, at_time: i64, max_time_diff: i64) -> Vec<PointEvent> {
        let cells = self.read_cells();
        collect_nearby(&cells, self.cell_of(lat, lon), at_time, max_time_diff)
    }

    /// Queries the neighborhood of `point` and then inserts it, atomically.
    ///
    /// The returned candidates never include `point` itself.
    pub fn query_then_insert(&self, point: &PointEvent, max_time_diff: i64) -> Vec<PointEvent> {
        let cell = self.cell_of(point.lat, point.lon);
        let mut cells = self.write_cells();
        let nearby = collect_nearby(&cells, cell, point.timestamp, max_time_diff);
        cells.entry(cell).or_default().push(point.clone());
        nearby
    }

    /// Removes every point with `timestamp < cutoff_time` and drops cells
    /// that become empty. Returns the number of points removed.
    pub fn evict_before(&self, cutoff_time: i64) -> usize {
        let mut cells = self.write_cells();
        let before: usize = cells.values().map(Vec::len).sum();

        cells.retain(|_, points| {
            points.retain(|p| p.timestamp >= cutoff_time);
            !points.is_empty()
        });

        let after: usize = cells.values().map(Vec::len).sum();
        let removed = before - after;
        debug!(
            "Evicted {} points older than {} ({} points in {} cells remain)",
            removed,
            cutoff_time,
            after,
            cells.len()
        );
        removed
    }

    /// Total number of stored points.
    pub fn len(&self) -> usize {
        self.read_cells().values().map(Vec::len).sum()
    }

    /// Returns true if no points are stored.
    pub fn is_empty(&self) -> bool {
        self.read_cells().is_empty()
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> IndexStats {
        let cells = self.read_cells();
        let total_points: usize = cells.values().map(Vec::len).sum();
        let total_cells = cells.len();
        let avg_points_per_cell = if total_cells > 0 {
            total_points as f64 / total_cells as f64
        } else {
            0.0
        };

        IndexStats {
            total_points,
            total_cells,
            avg_points_per_cell,
            cell_size: self.cell_size,
        }
    }

    // A poisoned lock means a thread panicked mid-mutation: the cell map can
    // no longer be trusted, so propagate the panic.
    fn read_cells(&self) -> RwLockReadGuard<'_, HashMap<CellKey, Vec<PointEvent>>> {
        self.cells.read().expect("grid index lock poisoned")
    }

    fn write_cells(&self) -> RwLockWriteGuard<'_, HashMap<CellKey, Vec<PointEvent>>> {
        self.cells.write().expect("grid index lock poisoned")
    }
}

fn collect_nearby(
    cells: &HashMap<CellKey, Vec<PointEvent>>,
    center: CellKey,
    at_time: i64,
    max_time_diff: i64,
) -> Vec<PointEvent> {
    let mut nearby = Vec::new();
    for cell in center.neighborhood() {
        if let Some(points) = cells.get(&cell) {
            nearby.extend(
                points
                    .iter()
                    .filter(|p| (p.timestamp - at_time).abs() <= max_time_diff)
                    .cloned(),
            );
        }
    }
    nearby
}

/// Statistics about the grid index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_points: usize,
    pub total_cells: usize,
    pub avg_points_per_cell: f64,
    pub cell_size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const CELL: f64 = 0.0001;

    fn point(id: &str, t: i64, lat: f64, lon: f64) -> PointEvent {
        PointEvent::new(id, t, lat, lon)
    }

    #[test]
    fn test_grid_index_creation() {
        let index = GridIndex::new(CELL);
        assert!(index.is_empty());
        assert_eq!(index.stats().total_cells, 0);
    }

    #[test]
    fn test_point_insertion() {
        let index = GridIndex::new(CELL);
        index.insert(point("A", 1000, 41.1500, -8.6000));
        index.insert(point("B", 1000, 41.15001, -8.60001));

        let stats = index.stats();
        assert_eq!(stats.total_points, 2);
        assert!(stats.total_cells >= 1);
    }

    #[test]
    fn test_query_scans_neighbor_cells() {
        let index = GridIndex::new(CELL);
        // One cell north-east of the query cell
        index.insert(point("B", 1000, 41.15015, -8.59985));
        // Two cells away
        index.insert(point("C", 1000, 41.15025, -8.6));

        let found = index.query_nearby(41.15005, -8.59995, 1000, 5);
        assert_eq!(found.len(), 1);
        assert_eq!(&*found[0].vehicle_id, "B");
    }

    #[test]
    fn test_query_filters_by_time_inclusive() {
        let index = GridIndex::new(CELL);
        index.insert(point("A", 995, 41.15, -8.6));
        index.insert(point("B", 994, 41.15, -8.6));
        index.insert(point("C", 1005, 41.15, -8.6));

        let found = index.query_nearby(41.15, -8.6, 1000, 5);
        let ids: Vec<&str> = found.iter().map(|p| &*p.vehicle_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"A"));
        assert!(ids.contains(&"C"));
    }

    #[test]
    fn test_query_empty_index_returns_nothing() {
        let index = GridIndex::new(CELL);
        assert!(index.query_nearby(41.15, -8.6, 0, 5).is_empty());
    }

    #[test]
    fn test_insert_batch_groups_by_cell() {
        let index = GridIndex::new(CELL);
        index.insert_batch(vec![
            point("A", 1, 41.15, -8.6),
            point("B", 2, 41.15, -8.6),
            point("C", 3, 41.16, -8.6),
        ]);
        let stats = index.stats();
        assert_eq!(stats.total_points, 3);
        assert_eq!(stats.total_cells, 2);
    }

    #[test]
    fn test_query_then_insert_excludes_self() {
        let index = GridIndex::new(CELL);
        let a = point("A", 1000, 41.15, -8.6);
        assert!(index.query_then_insert(&a, 5).is_empty());

        let b = point("B", 1002, 41.15, -8.6);
        let found = index.query_then_insert(&b, 5);
        assert_eq!(found, vec![a]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_eviction_removes_old_points_and_empty_cells() {
        let index = GridIndex::new(CELL);
        index.insert(point("A", 100, 41.15, -8.6));
        index.insert(point("B", 200, 41.16, -8.6));

        assert_eq!(index.evict_before(150), 1);
        let stats = index.stats();
        assert_eq!(stats.total_points, 1);
        assert_eq!(stats.total_cells, 1);
    }

    #[test]
    fn test_eviction_keeps_live_window() {
        let index = GridIndex::new(CELL);
        let max_time_diff = 5;
        for t in 0..100 {
            index.insert(point(&format!("V{}", t % 7), t, 41.15, -8.6 + t as f64 * 1e-6));
        }

        let latest = 99;
        let before = index.query_nearby(41.15, -8.6, latest, max_time_diff);
        index.evict_before(latest - max_time_diff);
        let after = index.query_nearby(41.15, -8.6, latest, max_time_diff);

        assert_eq!(before, after);
        assert_eq!(index.len(), (max_time_diff + 1) as usize);
    }

    #[test]
    fn test_concurrent_inserts_and_queries() {
        let index = Arc::new(GridIndex::new(CELL));

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let index = Arc::clone(&index);
                scope.spawn(move || {
                    for i in 0..250 {
                        let p = point(&format!("W{}", worker), i, 41.15, -8.6);
                        index.query_then_insert(&p, 5);
                        index.query_nearby(41.15, -8.6, i, 5);
                    }
                });
            }
        });

        assert_eq!(index.len(), 1000);
    }
}
