//! # gatekeeper-store
//!
//! Everything the gatekeeper reads and writes: attention profiles, company
//! policies, rate-limit counters, and the append-only decision log.
//!
//! Each concern sits behind an async trait so the in-memory backend and the
//! SQLite backend (or a shared/distributed one) are interchangeable without
//! touching the decision engine.

pub mod log;
pub mod memory;
pub mod policy;
pub mod profile;
pub mod ratelimit;
pub mod sqlite;

mod fields;

pub use log::{
    DecisionLog, DecisionRecord, LogFilter, Page, Pagination, Resolution, ResolutionRecord,
};
pub use memory::{MemoryDecisionLog, MemoryRateLimiter, MemoryRepository};
pub use policy::{CompanyPolicy, PolicyPatch, PolicyRepository, PolicyStore, RateLimits};
pub use profile::{
    AttentionProfile, AttentionProfileStore, ProfilePatch, ProfileRepository, QuietHours,
};
pub use ratelimit::{RateCheck, RateLimiter, RateScope, WindowKind};
pub use sqlite::SqliteStore;

use gatekeeper_core::AutonomyTier;

/// Values handed out for users and companies that have nothing stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefaults {
    pub profile_autonomy: AutonomyTier,
    pub policy_max_autonomy: AutonomyTier,
    pub rate_limits: RateLimits,
}

impl Default for StoreDefaults {
    fn default() -> Self {
        Self {
            profile_autonomy: AutonomyTier::None,
            policy_max_autonomy: AutonomyTier::None,
            rate_limits: RateLimits::default(),
        }
    }
}
