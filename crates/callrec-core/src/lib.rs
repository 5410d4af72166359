//! callrec core library: record real calls, replay them as regression tests.
//!
//! The recorder captures in-scope calls of an instrumented program (identity,
//! arguments, result) into a per-run catalog. The synthesizer turns each
//! catalog record into a standalone test, and the runner executes those
//! tests in parallel batches, keeping success/failure/timeout ledgers keyed
//! by symbol. With the `python` feature the crate builds as the
//! `_callrec_core` extension module the instrumentation host loads.

pub mod config;
pub mod errors;
pub mod housekeeping;
pub mod models;
pub mod recorder;
pub mod runner;
pub mod store;
pub mod synth;

#[cfg(feature = "python")]
pub mod python;
