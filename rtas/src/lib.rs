//! # RTAS
//!
//! Remote task action sequences: per-host deployment pipelines turned into
//! dependency graphs of task units for an external task runner.
//!
//! RTAS provides:
//!
//! - **Five-phase pipelines**: local pre-step, file shipping, remote steps,
//!   file fetching, local post-step, chained in a fixed order per host
//! - **Super/sub sequences**: nested namespaces whose completion can be
//!   depended upon, assembled across many hosts into batches
//! - **Failure guard**: the first failing action of a host stops every later
//!   action of that host, while other hosts continue
//! - **Idempotence predicates**: run-once markers, remote path existence,
//!   and remote file fingerprints let re-runs skip finished work
//! - **Remote execution service**: an SSH-tunnelled session for remote calls
//!
//! The crate only builds units. Running them is the job of the runner; a
//! reference implementation lives in [`testing::SequentialRunner`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rtas::prelude::*;
//!
//! let mut rtas = Rtas::from_config("10.0.0.7", &RtasConfig::default());
//! rtas.begin_super("deploy", Vec::<String>::new())?;
//! rtas.ship_files(["./app.conf"], "/etc/app", TaskDirectives::new())?;
//! rtas.remote_step(["systemctl restart app"], TaskDirectives::new())?;
//! let units = rtas.drain()?;
//!
//! let graph = TaskGraph::new(units)?;
//! println!("{}", graph.to_json()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod graph;
pub mod guard;
pub mod hierarchy;
pub mod observability;
pub mod pipeline;
pub mod predicates;
pub mod rpc;
pub mod testing;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{RtasConfig, ServiceConfig, SshConfig};
    pub use crate::core::{
        Action, ActionResult, Label, Namespace, Phase, TaskStatus, TaskUnit, TaskUnitRecord,
        UnitKind,
    };
    pub use crate::errors::{ActionError, GraphValidationError, RtasError, TransportError};
    pub use crate::graph::TaskGraph;
    pub use crate::guard::{FailureGuard, OutcomeStatus, TaskOutcome};
    pub use crate::hierarchy::{build_batch, leaf_final_label, root_enter_label, BatchUnits};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{FileSpec, RemoteCall, RemoteStep, Rtas, TaskDirectives};
    pub use crate::predicates::UpToDate;
    pub use crate::rpc::{setup_remote_service, ServiceSetup};
    pub use crate::transport::{SharedTransport, SshTransport, Transport};
}

pub use crate::errors::{ActionError, RtasError};
pub use crate::pipeline::Rtas;
