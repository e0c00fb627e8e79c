use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Fixed wall-clock windows. A window starts at the UTC midnight or the UTC
/// top of the hour containing `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Day,
    Hour,
}

impl WindowKind {
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Day => 86_400,
            Self::Hour => 3_600,
        }
    }

    /// Unix timestamp of the start of the window containing `now`.
    pub fn start(&self, now: DateTime<Utc>) -> i64 {
        let ts = now.timestamp();
        ts - ts.rem_euclid(self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Hour => "hour",
        }
    }
}

/// A counter the gatekeeper enforces a limit on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateScope {
    UserDay(String),
    CompanyDay(String),
    CompanyHour(String),
}

impl RateScope {
    /// Storage key, unique per scope and owner.
    pub fn key(&self) -> String {
        match self {
            Self::UserDay(user) => format!("user:{user}:day"),
            Self::CompanyDay(company) => format!("company:{company}:day"),
            Self::CompanyHour(company) => format!("company:{company}:hour"),
        }
    }

    pub fn window(&self) -> WindowKind {
        match self {
            Self::UserDay(_) | Self::CompanyDay(_) => WindowKind::Day,
            Self::CompanyHour(_) => WindowKind::Hour,
        }
    }

    /// The policy limit this scope is checked against.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserDay(_) => "ai_calls_per_user_per_day",
            Self::CompanyDay(_) => "ai_calls_per_company_per_day",
            Self::CompanyHour(_) => "automations_per_hour",
        }
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateCheck {
    pub allowed: bool,
    pub remaining: u32,
}

impl RateCheck {
    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// Window-scoped counters with an atomic check-and-increment.
///
/// `check_and_increment` must never be a separate read and write: two
/// concurrent callers at `limit - 1` must not both be allowed.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Increment the scope's counter for the window containing `now` if it is
    /// below `limit`. A denied check leaves the counter untouched.
    async fn check_and_increment(
        &self,
        scope: &RateScope,
        limit: u32,
        now: DateTime<Utc>,
    ) -> gatekeeper_core::Result<RateCheck>;

    /// Undo one increment in the window containing `now`. No-op at zero or
    /// after the window rolled over.
    async fn release(&self, scope: &RateScope, now: DateTime<Utc>) -> gatekeeper_core::Result<()>;

    /// Drop counters of expired windows. Returns how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> gatekeeper_core::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_starts() {
        let now = Utc.with_ymd_and_hms(2026, 5, 17, 13, 45, 12).unwrap();
        let day = Utc.with_ymd_and_hms(2026, 5, 17, 0, 0, 0).unwrap();
        let hour = Utc.with_ymd_and_hms(2026, 5, 17, 13, 0, 0).unwrap();
        assert_eq!(WindowKind::Day.start(now), day.timestamp());
        assert_eq!(WindowKind::Hour.start(now), hour.timestamp());
    }

    #[test]
    fn test_scope_keys_are_distinct() {
        let a = RateScope::CompanyDay("acme".into());
        let b = RateScope::CompanyHour("acme".into());
        assert_ne!(a.key(), b.key());
        assert_eq!(RateScope::UserDay("u1".into()).window(), WindowKind::Day);
        assert_eq!(b.name(), "automations_per_hour");
    }
}
