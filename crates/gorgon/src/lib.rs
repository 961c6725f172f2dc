//! Gorgon is a black-box correctness harness for distributed databases.
//!
//! A [`Scenario`] pairs a workload (generators plus a consistency [`Model`]) with an
//! optional nemesis that injects faults. A [`Runner`] brings the database up, drives one
//! worker thread per client while the nemesis runs on its own thread, records every
//! invocation in a [`History`], tears everything down, and checks the history for
//! linearizability, writing an HTML visualization for every failing partition.
//!
//! # Example
//!
//! ```rust
//! use {gorgon::*, std::{sync::Arc, time::Duration}};
//!
//! let options = Options {
//!     concurrency: 2,
//!     workload_duration: Duration::from_millis(200),
//!     ..Options::default()
//! };
//! let mut rng = SplitMix64::new(1);
//! let workload = kv::get_set_workload(kv::default_keys(4), kv::DEFAULT_PACE, &mut rng);
//! let scenario = Scenario::new(workload, None);
//! let database = Arc::new(kv::MemoryDatabase::new());
//! let mut runner = Runner::new(database, scenario, options);
//! let report = run_scenario(&mut runner).unwrap();
//! assert!(report.is_consistent());
//! ```

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

pub mod agent;
mod escape;
pub mod generators;
mod history;
pub mod kv;
pub mod nemeses;
pub mod remote;
mod runner;

pub use {
    consistency_model::{CheckResult, Model},
    escape::escape_file_name,
    gorgon_core::*,
    history::{reconcile, CheckedOperation, History, Operation},
    runner::{run_scenario, Report, Runner, Scenario, Workload},
};
