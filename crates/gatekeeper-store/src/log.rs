use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{Channel, CompanyId, GateError, ReasonCode, UserId, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One immutable entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub id: Uuid,
    pub action: String,
    pub actor_id: UserId,
    pub company_id: CompanyId,
    pub decision: Verdict,
    pub reason: ReasonCode,
    /// Human-readable explanation of `reason`.
    pub detail: String,
    /// BLAKE3 hex digest of the canonical JSON params.
    pub params_digest: String,
    /// Where a suggestion should be announced. Empty unless `decision` is SUGGEST.
    #[serde(default)]
    pub channels: Vec<Channel>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn is_pending_candidate(&self) -> bool {
        self.decision == Verdict::Suggest
    }
}

// ── Resolutions ────────────────────────────────────────────────

/// Human verdict on a suggested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    #[serde(alias = "approved")]
    Approved,
    #[serde(alias = "rejected")]
    Rejected,
}

impl Resolution {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored beside the log; decision entries themselves are never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRecord {
    pub decision_id: Uuid,
    pub resolution: Resolution,
    pub resolved_by: UserId,
    pub resolved_at: DateTime<Utc>,
}

// ── Querying ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub company_id: Option<CompanyId>,
    pub actor_id: Option<UserId>,
    pub action: Option<String>,
    pub decision: Option<Verdict>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn for_company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: Some(company_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &DecisionRecord) -> bool {
        self.company_id.as_ref().is_none_or(|c| *c == record.company_id)
            && self.actor_id.as_ref().is_none_or(|a| *a == record.actor_id)
            && self.action.as_ref().is_none_or(|a| *a == record.action)
            && self.decision.is_none_or(|d| d == record.decision)
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    /// Build from optional query values. Oversized limits are clamped; zero is rejected.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> gatekeeper_core::Result<Self> {
        let limit = match limit {
            Some(0) => {
                return Err(GateError::invalid(
                    "limit",
                    format!("must be between 1 and {}", Self::MAX_LIMIT),
                ));
            }
            Some(n) => n.min(Self::MAX_LIMIT),
            None => Self::DEFAULT_LIMIT,
        };
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
        })
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// One page of results, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl<T> Page<T> {
    pub fn empty(page: Pagination) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

// ── Trait ──────────────────────────────────────────────────────

/// Append-only store of every decision the gatekeeper renders.
///
/// Implementations must accept concurrent `append` calls and must never
/// mutate or remove an entry once appended.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    /// Idempotent per id: re-appending an identical record is a no-op, a
    /// different record under a logged id is a `Conflict`.
    async fn append(&self, record: &DecisionRecord) -> gatekeeper_core::Result<()>;

    async fn query(&self, filter: &LogFilter, page: Pagination) -> gatekeeper_core::Result<Page<DecisionRecord>>;

    /// SUGGEST entries at or after `since` that have no resolution yet.
    async fn pending(
        &self,
        filter: &LogFilter,
        since: DateTime<Utc>,
        page: Pagination,
    ) -> gatekeeper_core::Result<Page<DecisionRecord>>;

    async fn get(&self, id: Uuid) -> gatekeeper_core::Result<Option<DecisionRecord>>;

    /// Record a resolution. `NotFound` for an unknown id, `Conflict` when the
    /// entry is not a suggestion or was already resolved.
    async fn resolve(&self, resolution: &ResolutionRecord) -> gatekeeper_core::Result<()>;

    async fn resolution(&self, id: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>>;
}

pub(crate) fn not_found(id: Uuid) -> GateError {
    GateError::NotFound(format!("decision {id}"))
}

pub(crate) fn conflicting_append(id: Uuid) -> GateError {
    GateError::Conflict(format!("decision {id} is already logged with different contents"))
}

pub(crate) fn not_suggestion(record: &DecisionRecord) -> GateError {
    GateError::Conflict(format!(
        "decision {} is {}, only SUGGEST entries can be resolved",
        record.id, record.decision
    ))
}

pub(crate) fn already_resolved(existing: &ResolutionRecord) -> GateError {
    GateError::Conflict(format!(
        "decision {} was already {} by {}",
        existing.decision_id,
        existing.resolution.as_str().to_ascii_lowercase(),
        existing.resolved_by
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        assert_eq!(Pagination::new(None, None).unwrap(), Pagination::default());
        assert_eq!(Pagination::new(Some(10_000), Some(5)).unwrap().limit, 500);
        assert!(Pagination::new(Some(0), None).is_err());
    }

    #[test]
    fn test_resolution_accepts_lowercase() {
        let r: Resolution = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(r, Resolution::Approved);
        assert_eq!(serde_json::to_string(&Resolution::Rejected).unwrap(), "\"REJECTED\"");
        assert_eq!(Resolution::parse("Rejected"), Some(Resolution::Rejected));
    }
}
