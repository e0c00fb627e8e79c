//! # gatekeeper-core
//!
//! Core types and primitives for the action gatekeeper. This crate defines the
//! shared vocabulary used by every other crate in the workspace: actors and
//! roles, autonomy tiers, attention levels, notification channels, verdicts,
//! the action catalog, and the unified error type.

pub mod action;
pub mod clock;
pub mod error;
pub mod types;

pub use action::{ActionCatalog, ActionSpec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FieldError, GateError, Result};
pub use types::*;
