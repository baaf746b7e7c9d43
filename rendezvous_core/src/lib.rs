//! Rendezvous Core - Spatio-Temporal Proximity Join
//!
//! Finds every pair of distinct vehicles that were within a distance
//! threshold of each other within a time threshold, over a GPS trajectory
//! corpus too large for an all-pairs comparison.
//!
//! 1. **Grid index**: points are bucketed into lat/lon cells so each point is
//!    compared only against its 3×3 neighborhood and a time window
//! 2. **Two-stage filter**: an O(1) planar bound rejects most candidates
//!    before the haversine distance is evaluated
//! 3. **Batches**: trajectories stream in start-time order, are matched in
//!    parallel on a worker pool, and old points are evicted behind a
//!    watermark
//! 4. **Checkpoints**: results and counters are saved periodically so that a
//!    crashed or cancelled run resumes where it left off

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod expander;
pub mod geodesic;
pub mod grid_index;
pub mod scheduler;
pub mod types;
pub mod worker;

// Re-export key types for convenience
pub use checkpoint::{CheckpointManager, CheckpointStore, JsonFileStore, RunProgress, SledStore};
pub use config::{CheckpointBackend, RunConfig};
pub use controller::{RunController, RunState, RunStatus};
pub use error::{EngineError, Result};
pub use expander::{expand, expand_record};
pub use geodesic::{cheap_bound, precise_distance, CheapBound};
pub use grid_index::{GridIndex, IndexStats};
pub use scheduler::{run, run_with_controller, BatchScheduler, RunResult};
pub use types::{CellKey, PairSet, PointEvent, VehiclePair};
pub use worker::{JoinStats, MatchCriteria};
