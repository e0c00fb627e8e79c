//! # gatekeeper-engine
//!
//! Turns an `(actor, action, params)` request into EXECUTE, SUGGEST, LOG_ONLY
//! or BLOCK. The decision rules live in [`decide`] as pure functions; the
//! [`Gatekeeper`] handle wires them to the stores, the rate limiter and the
//! decision log, and guarantees that every evaluation is logged exactly once.

pub mod decide;
pub mod engine;
pub mod routing;

pub use decide::{Outcome, Preflight, Quota, ScopeLimit, Snapshot, conclude, preflight};
pub use engine::{Backends, Decision, EngineSettings, Gatekeeper, params_digest};
pub use routing::route;
