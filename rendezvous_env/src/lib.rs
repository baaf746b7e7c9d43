//! Rendezvous Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the Rendezvous join engine
//! run against real data and real time in production, and against synthetic
//! fleets and a virtual clock in simulation.
//!
//! # Core Concept
//!
//! The engine never reads a clock or a data store directly. Everything that
//! would make a run non-reproducible goes through a trait:
//! - Time (`now()`, `system_time()`) via [`RunContext`]
//! - Input (ordered trajectory enumeration) via [`TrajectorySource`]
//!
//! # Example
//!
//! ```ignore
//! use rendezvous_env::{RunContext, SystemContext, TrajectorySource, VecSource};
//!
//! let ctx = SystemContext::shared();
//! let source = VecSource::from_records(records);
//! let totals = source.totals();
//! for (position, entry) in source.trajectories().enumerate() {
//!     match entry {
//!         Ok(record) => handle(record),
//!         Err(e) => skip(position, e),
//!     }
//! }
//! ```

mod context;
mod error;
mod source;
mod system_impl;
mod types;

pub use context::RunContext;
pub use error::{EnvError, Result};
pub use source::{SourceTotals, TrajectorySource, VecSource};
pub use system_impl::SystemContext;
pub use types::{TrajectoryRecord, DEFAULT_SAMPLING_INTERVAL_SECONDS};
