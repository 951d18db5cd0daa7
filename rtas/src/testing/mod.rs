//! Testing utilities for RTAS pipelines.
//!
//! This module provides:
//! - An in-memory transport with scripted commands and failure injection
//! - A reference sequential runner applying the task unit run contract
//! - Run-once stores and a LIFO teardown registry
//! - Assertions over run reports and outcome logs

mod assertions;
mod run_once;
mod runner;
mod teardown;
mod transport;

pub use assertions::{
    assert_depends_on, assert_outcome, assert_run_succeeded, assert_status, assert_valid_graph,
};
pub use run_once::{InMemoryRunOnceStore, RunOnceStore};
pub use runner::{RunReport, SequentialRunner};
pub use teardown::{TeardownFailure, TeardownRegistry};
pub use transport::{InMemoryTransport, TransportCall};
