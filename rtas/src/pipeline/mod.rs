//! Per-host pipeline building.
//!
//! This module provides:
//! - The [`Rtas`] pipeline instance and its super/sub namespaces
//! - Phase builders for local steps, file shipping, remote steps, and fetching
//! - Draining staged phases into chained task units

mod builders;
mod chain;
mod directives;
mod files;
mod remote;
mod sequence;


pub use directives::TaskDirectives;
pub use files::FileSpec;
pub use remote::{RemoteCall, RemoteStep};
pub use sequence::Rtas;
