//! Process-local backends. Everything is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::log::{self, DecisionLog, DecisionRecord, LogFilter, Page, Pagination, ResolutionRecord};
use crate::policy::{CompanyPolicy, PolicyRepository};
use crate::profile::{AttentionProfile, ProfileRepository};
use crate::ratelimit::{RateCheck, RateLimiter, RateScope, WindowKind};

// ── Profiles & policies ────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRepository {
    profiles: DashMap<String, AttentionProfile>,
    policies: DashMap<String, CompanyPolicy>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for MemoryRepository {
    async fn load_profile(&self, user_id: &str) -> gatekeeper_core::Result<Option<AttentionProfile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn save_profile(&self, profile: &AttentionProfile) -> gatekeeper_core::Result<()> {
        self.profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for MemoryRepository {
    async fn load_policy(&self, company_id: &str) -> gatekeeper_core::Result<Option<CompanyPolicy>> {
        Ok(self.policies.get(company_id).map(|p| p.clone()))
    }

    async fn save_policy(&self, policy: &CompanyPolicy) -> gatekeeper_core::Result<()> {
        self.policies.insert(policy.company_id.clone(), policy.clone());
        Ok(())
    }
}

// ── Rate limiter ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Counter {
    window: WindowKind,
    window_start: i64,
    count: u32,
}

/// Counters keyed by scope. The map's entry lock makes each
/// check-and-increment atomic per key.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    counters: DashMap<String, Counter>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_increment(
        &self,
        scope: &RateScope,
        limit: u32,
        now: DateTime<Utc>,
    ) -> gatekeeper_core::Result<RateCheck> {
        if limit == 0 {
            return Ok(RateCheck::denied());
        }
        let window = scope.window();
        let start = window.start(now);
        let mut counter = self.counters.entry(scope.key()).or_insert(Counter {
            window,
            window_start: start,
            count: 0,
        });
        if counter.window_start != start {
            counter.window_start = start;
            counter.count = 0;
        }
        if counter.count >= limit {
            return Ok(RateCheck::denied());
        }
        counter.count += 1;
        Ok(RateCheck {
            allowed: true,
            remaining: limit - counter.count,
        })
    }

    async fn release(&self, scope: &RateScope, now: DateTime<Utc>) -> gatekeeper_core::Result<()> {
        let start = scope.window().start(now);
        if let Some(mut counter) = self.counters.get_mut(&scope.key()) {
            if counter.window_start == start && counter.count > 0 {
                counter.count -= 1;
            }
        }
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> gatekeeper_core::Result<usize> {
        let before = self.counters.len();
        self.counters
            .retain(|_, c| c.window_start >= c.window.start(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "swept expired rate-limit counters");
        }
        Ok(removed)
    }
}

// ── Decision log ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct LogInner {
    records: Vec<DecisionRecord>,
    index: HashMap<Uuid, usize>,
    resolutions: HashMap<Uuid, ResolutionRecord>,
}

impl LogInner {
    fn page<'a>(
        &'a self,
        keep: impl Fn(&DecisionRecord) -> bool,
        page: Pagination,
    ) -> Page<DecisionRecord> {
        let matching: Vec<&'a DecisionRecord> = self.records.iter().rev().filter(|r| keep(r)).collect();
        Page {
            total: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .cloned()
                .collect(),
            limit: page.limit,
            offset: page.offset,
        }
    }
}

/// An append-only vector of decisions, newest last.
#[derive(Debug, Default)]
pub struct MemoryDecisionLog {
    inner: RwLock<LogInner>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionLog for MemoryDecisionLog {
    async fn append(&self, record: &DecisionRecord) -> gatekeeper_core::Result<()> {
        let mut inner = self.inner.write();
        if let Some(&pos) = inner.index.get(&record.id) {
            return if inner.records[pos] == *record {
                Ok(())
            } else {
                Err(log::conflicting_append(record.id))
            };
        }
        let pos = inner.records.len();
        inner.records.push(record.clone());
        inner.index.insert(record.id, pos);
        Ok(())
    }

    async fn query(&self, filter: &LogFilter, page: Pagination) -> gatekeeper_core::Result<Page<DecisionRecord>> {
        Ok(self.inner.read().page(|r| filter.matches(r), page))
    }

    async fn pending(
        &self,
        filter: &LogFilter,
        since: DateTime<Utc>,
        page: Pagination,
    ) -> gatekeeper_core::Result<Page<DecisionRecord>> {
        let inner = self.inner.read();
        Ok(inner.page(
            |r| {
                r.is_pending_candidate()
                    && r.timestamp >= since
                    && !inner.resolutions.contains_key(&r.id)
                    && filter.matches(r)
            },
            page,
        ))
    }

    async fn get(&self, id: Uuid) -> gatekeeper_core::Result<Option<DecisionRecord>> {
        let inner = self.inner.read();
        Ok(inner.index.get(&id).map(|&i| inner.records[i].clone()))
    }

    async fn resolve(&self, resolution: &ResolutionRecord) -> gatekeeper_core::Result<()> {
        let mut inner = self.inner.write();
        let Some(&pos) = inner.index.get(&resolution.decision_id) else {
            return Err(log::not_found(resolution.decision_id));
        };
        let record = &inner.records[pos];
        if !record.is_pending_candidate() {
            return Err(log::not_suggestion(record));
        }
        if let Some(existing) = inner.resolutions.get(&resolution.decision_id) {
            return Err(log::already_resolved(existing));
        }
        inner
            .resolutions
            .insert(resolution.decision_id, resolution.clone());
        Ok(())
    }

    async fn resolution(&self, id: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>> {
        Ok(self.inner.read().resolutions.get(&id).cloned())
    }
}
