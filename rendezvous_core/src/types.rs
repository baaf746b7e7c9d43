//! Core data model: point events, grid cell keys and canonical vehicle pairs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One sampled `(vehicle, time, lat, lon)` observation.
///
/// The vehicle id is shared between all points of a trajectory, so cloning a
/// point out of the index is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct PointEvent {
    /// Vehicle that produced the sample
    pub vehicle_id: Arc<str>,

    /// Unix timestamp (seconds)
    pub timestamp: i64,

    /// Latitude (degrees)
    pub lat: f64,

    /// Longitude (degrees)
    pub lon: f64,
}

impl PointEvent {
    /// Creates a new point event.
    pub fn new(vehicle_id: impl Into<Arc<str>>, timestamp: i64, lat: f64, lon: f64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            timestamp,
            lat,
            lon,
        }
    }
}

/// Grid cell coordinates: `(floor(lat / cell_size), floor(lon / cell_size))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: i64,
    pub col: i64,
}

impl CellKey {
    /// Returns the cell containing `(lat, lon)`.
    pub fn of(lat: f64, lon: f64, cell_size: f64) -> Self {
        Self {
            row: (lat / cell_size).floor() as i64,
            col: (lon / cell_size).floor() as i64,
        }
    }

    /// The 3×3 block of cells centered on this one.
    pub fn neighborhood(self) -> impl Iterator<Item = CellKey> {
        (-1..=1).flat_map(move |dr| {
            (-1..=1).map(move |dc| CellKey {
                row: self.row + dr,
                col: self.col + dc,
            })
        })
    }
}

/// An unordered pair of two distinct vehicles.
///
/// Always stored with the lexicographically smaller id first, so `(A, B)`
/// and `(B, A)` compare, hash and serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct VehiclePair {
    first: String,
    second: String,
}

impl VehiclePair {
    /// Canonicalizes `(a, b)`. Returns `None` for a self-pair.
    pub fn new(a: &str, b: &str) -> Option<Self> {
        match a.cmp(b) {
            std::cmp::Ordering::Less => Some(Self {
                first: a.to_string(),
                second: b.to_string(),
            }),
            std::cmp::Ordering::Greater => Some(Self {
                first: b.to_string(),
                second: a.to_string(),
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The lexicographically smaller vehicle id.
    pub fn first(&self) -> &str {
        &self.first
    }

    /// The lexicographically larger vehicle id.
    pub fn second(&self) -> &str {
        &self.second
    }

    /// Returns true if `vehicle_id` is one of the two members.
    pub fn contains(&self, vehicle_id: &str) -> bool {
        self.first == vehicle_id || self.second == vehicle_id
    }
}

impl TryFrom<(String, String)> for VehiclePair {
    type Error = String;

    fn try_from((a, b): (String, String)) -> Result<Self, Self::Error> {
        VehiclePair::new(&a, &b).ok_or_else(|| format!("self-pair for vehicle {}", a))
    }
}

impl From<VehiclePair> for (String, String) {
    fn from(pair: VehiclePair) -> Self {
        (pair.first, pair.second)
    }
}

impl std::fmt::Display for VehiclePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.first, self.second)
    }
}

/// The set of discovered pairs. Ordered so that exports and checkpoints are
/// deterministic.
pub type PairSet = BTreeSet<VehiclePair>;
