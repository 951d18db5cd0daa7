//! Core data model for the RTAS engine.
//!
//! This module contains the fundamental types produced by pipeline builders:
//! - Labels and namespaces
//! - The five phases
//! - Action invocables and task units
//! - Task run statuses

mod action;
mod label;
mod phase;
mod status;
mod unit;

pub use action::{Action, ActionFuture, ActionResult};
pub use label::{Label, Namespace, TERMINAL_SUFFIX};
pub use phase::Phase;
pub use status::TaskStatus;
pub use unit::{TaskUnit, TaskUnitBuilder, TaskUnitRecord, UnitKind};
