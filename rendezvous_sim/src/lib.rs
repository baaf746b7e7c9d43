//! Rendezvous Deterministic Simulation Harness
//!
//! This crate checks the join engine against ground truth under fully
//! controlled conditions, and hosts the `rendezvous-sim` CLI.
//!
//! # Core Principle
//!
//! Every source of non-determinism is pinned:
//! - **Time**: [`SimContext`] is a virtual clock, so checkpoint saves and
//!   evictions fire at predictable batch boundaries
//! - **Input**: [`FleetGenerator`] derives whole fleets from one 64-bit seed
//! - **Truth**: [`Oracle`] recomputes the answer by brute force
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │                                                          │
//! │  FleetGenerator ──> VecSource ──> BatchScheduler ──┐     │
//! │        │                          (SimContext)     │     │
//! │        └──────────> Oracle ───────────────────> compare  │
//! │                                                    │     │
//! │                                             ScenarioResult
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rendezvous_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_workers(4);
//! let result = runner.run(ScenarioId::Resume);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod fleet;
mod jsonl;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{ExportThresholds, ResultsExport};
pub use fleet::{Fleet, FleetConfig, FleetGenerator};
pub use jsonl::{parse_line, write_json_lines, JsonLinesSource};
pub use oracle::Oracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
