#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use gatekeeper_core::{
        ActionCatalog, Actor, AutonomyTier, Channel, GateError, ManualClock, ReasonCode, Role,
        Verdict,
    };
    use gatekeeper_engine::*;
    use gatekeeper_store::*;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 9, 10, 0, 0).unwrap()
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            lookup_timeout: std::time::Duration::from_millis(50),
            ..EngineSettings::default()
        }
    }

    struct Harness {
        gk: Gatekeeper,
        clock: Arc<ManualClock>,
        log: Arc<MemoryDecisionLog>,
        backends: Backends,
    }

    fn harness_with(backends: Backends, log: Arc<MemoryDecisionLog>) -> Harness {
        let clock = Arc::new(ManualClock::new(start()));
        let gk = Gatekeeper::new(
            backends.clone(),
            ActionCatalog::builtin(),
            StoreDefaults::default(),
            clock.clone(),
            fast_settings(),
        );
        Harness {
            gk,
            clock,
            log,
            backends,
        }
    }

    fn harness() -> Harness {
        let log = Arc::new(MemoryDecisionLog::new());
        let mut backends = Backends::memory();
        backends.log = log.clone();
        harness_with(backends, log)
    }

    fn agent(user: &str) -> Actor {
        Actor::new(user, "acme", Role::Agent)
    }

    async fn set_policy(gk: &Gatekeeper, body: Value) {
        let patch = PolicyPatch::from_json(&body, gk.catalog()).unwrap();
        gk.policies().patch("acme", &patch).await.unwrap();
    }

    async fn set_profile(gk: &Gatekeeper, user: &str, body: Value) {
        let patch = ProfilePatch::from_json(&body).unwrap();
        let ceiling = gk.autonomy_ceiling("acme").await.unwrap();
        gk.profiles().patch(user, &patch, ceiling).await.unwrap();
    }

    async fn open_up(gk: &Gatekeeper, user: &str, tier: &str) {
        set_policy(gk, json!({"maxAutonomy": "AUTO_FULL"})).await;
        set_profile(gk, user, json!({"autonomy": tier})).await;
    }

    // ── Scenarios ──────────────────────────────────────────────

    mod scenarios {
        use super::*;

        #[tokio::test]
        async fn test_forbidden_action_blocks() {
            let h = harness();
            set_policy(
                &h.gk,
                json!({
                    "maxAutonomy": "AUTO_FULL",
                    "forbidden": ["delete_contact_auto"],
                    "rateLimits": {"aiCallsPerUserPerDay": 150}
                }),
            )
            .await;
            set_profile(&h.gk, "u1", json!({"autonomy": "AUTO_LOW"})).await;

            let d = h.gk.evaluate(&agent("u1"), "delete_contact_auto", &json!({})).await;
            assert_eq!(d.decision, Verdict::Block);
            assert_eq!(d.reason, ReasonCode::ForbiddenAction);
        }

        #[tokio::test]
        async fn test_full_autonomy_executes_notification() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            let d = h.gk.evaluate(&agent("u1"), "send_notification", &json!({"title": "hi"})).await;
            assert_eq!(d.decision, Verdict::Execute);
            assert_eq!(d.reason, ReasonCode::Allowed);
            assert!(d.channels.is_empty());
        }

        #[tokio::test]
        async fn test_no_autonomy_suggests_through_unmuted_channels() {
            let h = harness();
            set_policy(&h.gk, json!({"maxAutonomy": "AUTO_FULL"})).await;
            set_profile(
                &h.gk,
                "u1",
                json!({
                    "autonomy": "NONE",
                    "level": "DO_NOT_DISTURB",
                    "channels": {"sms": true, "email": false}
                }),
            )
            .await;

            let d = h.gk.evaluate(&agent("u1"), "send_notification", &json!({})).await;
            assert_eq!(d.decision, Verdict::Suggest);
            assert_eq!(d.reason, ReasonCode::AutonomyInsufficient);
            assert_eq!(d.channels, vec![Channel::Inapp]);
        }

        #[tokio::test]
        async fn test_unknown_action_blocks() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            let d = h.gk.evaluate(&agent("u1"), "launch_rockets", &json!({})).await;
            assert_eq!(d.decision, Verdict::Block);
            assert_eq!(d.reason, ReasonCode::UnknownAction);
        }

        #[tokio::test]
        async fn test_defaults_are_most_restrictive() {
            let h = harness();
            let d = h.gk.evaluate(&agent("fresh"), "send_email", &json!({})).await;
            assert_eq!(d.decision, Verdict::LogOnly);
        }

        #[tokio::test]
        async fn test_quiet_hours_route_as_dnd() {
            let h = harness();
            set_profile(
                &h.gk,
                "u1",
                json!({"channels": {"whatsapp": true}, "quietHours": [{"start": "09:00", "end": "11:00"}]}),
            )
            .await;
            let d = h.gk.evaluate(&agent("u1"), "send_notification", &json!({})).await;
            assert_eq!(d.decision, Verdict::Suggest);
            assert_eq!(d.channels, vec![Channel::Email, Channel::Inapp]);

            h.clock.advance(Duration::hours(2));
            let d = h.gk.evaluate(&agent("u1"), "send_notification", &json!({})).await;
            assert_eq!(d.channels, vec![Channel::Email, Channel::Push, Channel::Inapp, Channel::Whatsapp]);
        }
    }

    // ── Properties ─────────────────────────────────────────────

    mod properties {
        use super::*;

        #[tokio::test]
        async fn test_forbidden_dominates_exhausted_limits() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerUserPerDay": 1}})).await;
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());

            set_policy(&h.gk, json!({"forbidden": ["send_email"]})).await;
            let d = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(d.reason, ReasonCode::ForbiddenAction);
        }

        #[tokio::test]
        async fn test_exact_limit_and_rollover() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_LOW").await;
            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerUserPerDay": 3}})).await;

            for _ in 0..3 {
                assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
            }
            let fourth = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(fourth.decision, Verdict::Block);
            assert_eq!(fourth.reason, ReasonCode::RateLimitExceeded);

            h.clock.set(Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap());
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
        }

        #[tokio::test]
        async fn test_automations_limited_per_hour() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_LOW").await;
            set_profile(&h.gk, "u2", json!({"autonomy": "AUTO_LOW"})).await;
            set_policy(&h.gk, json!({"rateLimits": {"automationsPerHour": 2}})).await;
            for _ in 0..2 {
                assert!(h.gk.evaluate(&agent("u1"), "workflow_send_email", &json!({})).await.is_execute());
            }
            let d = h.gk.evaluate(&agent("u2"), "workflow_send_email", &json!({})).await;
            assert_eq!(d.reason, ReasonCode::RateLimitExceeded);
            assert!(d.detail.contains("automations_per_hour"));
            // Non-automations are unaffected.
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());

            h.clock.advance(Duration::hours(1));
            assert!(h.gk.evaluate(&agent("u1"), "workflow_send_email", &json!({})).await.is_execute());
        }

        #[tokio::test]
        async fn test_downgrade_consumes_no_quota() {
            let h = harness();
            set_policy(
                &h.gk,
                json!({"maxAutonomy": "SUGGEST_ONLY", "rateLimits": {"aiCallsPerUserPerDay": 1}}),
            )
            .await;
            set_profile(&h.gk, "u1", json!({"autonomy": "SUGGEST_ONLY"})).await;
            for _ in 0..5 {
                let d = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
                assert_eq!(d.decision, Verdict::Suggest);
            }
            set_policy(&h.gk, json!({"maxAutonomy": "AUTO_LOW"})).await;
            set_profile(&h.gk, "u1", json!({"autonomy": "AUTO_LOW"})).await;
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
        }

        #[tokio::test]
        async fn test_company_denial_releases_user_slot() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_LOW").await;
            set_profile(&h.gk, "u2", json!({"autonomy": "AUTO_LOW"})).await;
            set_policy(
                &h.gk,
                json!({"rateLimits": {"aiCallsPerUserPerDay": 1, "aiCallsPerCompanyPerDay": 1}}),
            )
            .await;

            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
            let blocked = h.gk.evaluate(&agent("u2"), "send_email", &json!({})).await;
            assert_eq!(blocked.reason, ReasonCode::RateLimitExceeded);
            assert!(blocked.detail.contains("ai_calls_per_company_per_day"));

            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerCompanyPerDay": 10}})).await;
            assert!(
                h.gk.evaluate(&agent("u2"), "send_email", &json!({})).await.is_execute(),
                "u2's daily slot must not have been spent by the blocked call"
            );
        }

        #[tokio::test]
        async fn test_every_call_is_logged_once() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_LOW").await;
            set_policy(&h.gk, json!({"forbidden": ["delete_deal"], "rateLimits": {"aiCallsPerUserPerDay": 1}})).await;

            let calls = [
                "send_email",
                "send_email",
                "delete_deal",
                "launch_rockets",
                "delete_contact_auto",
                "create_zettel",
            ];
            let mut ids = Vec::new();
            for action in calls {
                ids.push(h.gk.evaluate(&agent("u1"), action, &json!({"n": 1})).await.id);
            }
            assert_eq!(h.log.len(), calls.len());
            for id in ids {
                let entry = h.log.get(id).await.unwrap().unwrap();
                assert!(!entry.detail.is_empty());
                assert_eq!(entry.params_digest, params_digest(&json!({"n": 1})));
            }
        }

        #[tokio::test]
        async fn test_monotonic_in_autonomy_with_fresh_counters() {
            let tiers = ["NONE", "SUGGEST_ONLY", "AUTO_LOW", "AUTO_FULL"];
            for action in ["send_notification", "send_email", "delete_deal", "workflow_webhook"] {
                let mut last = 0;
                for tier in tiers {
                    let h = harness();
                    open_up(&h.gk, "u1", tier).await;
                    let d = h.gk.evaluate(&agent("u1"), action, &json!({})).await;
                    let rank = d.decision.permissiveness();
                    assert!(rank >= last, "{action} got less permissive at {tier}");
                    last = rank;
                }
            }
        }
    }

    // ── Concurrency ────────────────────────────────────────────

    mod concurrency {
        use super::*;

        async fn hundred_against_ten(h: Harness) {
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerUserPerDay": 10}})).await;

            let handles: Vec<_> = (0..100)
                .map(|i| {
                    let gk = h.gk.clone();
                    tokio::spawn(async move { gk.evaluate(&agent("u1"), "send_email", &json!({"i": i})).await })
                })
                .collect();
            let decisions: Vec<Decision> = futures::future::join_all(handles)
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();

            let executed = decisions.iter().filter(|d| d.is_execute()).count();
            let limited = decisions
                .iter()
                .filter(|d| d.reason == ReasonCode::RateLimitExceeded)
                .count();
            assert_eq!(executed, 10);
            assert_eq!(limited, 90);

            let page = h
                .backends
                .log
                .query(&LogFilter::for_company("acme"), Pagination::new(Some(500), None).unwrap())
                .await
                .unwrap();
            assert_eq!(page.total, 100);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
        async fn test_memory_backend_exact_under_contention() {
            hundred_against_ten(harness()).await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
        async fn test_sqlite_backend_exact_under_contention() {
            let backends = Backends::sqlite(SqliteStore::open_in_memory().unwrap());
            let unused = Arc::new(MemoryDecisionLog::new());
            let mut h = harness_with(backends, unused);
            // SQLite calls serialize on one connection; give them room.
            h.gk = Gatekeeper::new(
                h.backends.clone(),
                ActionCatalog::builtin(),
                StoreDefaults::default(),
                h.clock.clone(),
                EngineSettings::default(),
            );
            hundred_against_ten(h).await;
        }
    }

    // ── Failure handling ───────────────────────────────────────

    mod failures {
        use super::*;

        /// A policy repository that never answers in time.
        struct StalledPolicies;

        #[async_trait]
        impl PolicyRepository for StalledPolicies {
            async fn load_policy(&self, _: &str) -> gatekeeper_core::Result<Option<CompanyPolicy>> {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(None)
            }
            async fn save_policy(&self, _: &CompanyPolicy) -> gatekeeper_core::Result<()> {
                Ok(())
            }
        }

        /// Fails the first `failures` loads, then delegates.
        struct FlakyPolicies {
            inner: MemoryRepository,
            failures: u32,
            calls: AtomicU32,
        }

        #[async_trait]
        impl PolicyRepository for FlakyPolicies {
            async fn load_policy(&self, id: &str) -> gatekeeper_core::Result<Option<CompanyPolicy>> {
                if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                    return Err(GateError::Store("connection reset".into()));
                }
                self.inner.load_policy(id).await
            }
            async fn save_policy(&self, p: &CompanyPolicy) -> gatekeeper_core::Result<()> {
                self.inner.save_policy(p).await
            }
        }

        /// Rejects every append.
        struct BrokenLog;

        #[async_trait]
        impl DecisionLog for BrokenLog {
            async fn append(&self, _: &DecisionRecord) -> gatekeeper_core::Result<()> {
                Err(GateError::Store("disk full".into()))
            }
            async fn query(&self, _: &LogFilter, p: Pagination) -> gatekeeper_core::Result<Page<DecisionRecord>> {
                Ok(Page::empty(p))
            }
            async fn pending(
                &self,
                _: &LogFilter,
                _: DateTime<Utc>,
                p: Pagination,
            ) -> gatekeeper_core::Result<Page<DecisionRecord>> {
                Ok(Page::empty(p))
            }
            async fn get(&self, _: Uuid) -> gatekeeper_core::Result<Option<DecisionRecord>> {
                Ok(None)
            }
            async fn resolve(&self, _: &ResolutionRecord) -> gatekeeper_core::Result<()> {
                Err(GateError::Store("disk full".into()))
            }
            async fn resolution(&self, _: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>> {
                Ok(None)
            }
        }

        /// Delays appends so a caller can walk away mid-evaluation.
        struct SlowLog(Arc<MemoryDecisionLog>);

        #[async_trait]
        impl DecisionLog for SlowLog {
            async fn append(&self, r: &DecisionRecord) -> gatekeeper_core::Result<()> {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.0.append(r).await
            }
            async fn query(&self, f: &LogFilter, p: Pagination) -> gatekeeper_core::Result<Page<DecisionRecord>> {
                self.0.query(f, p).await
            }
            async fn pending(
                &self,
                f: &LogFilter,
                s: DateTime<Utc>,
                p: Pagination,
            ) -> gatekeeper_core::Result<Page<DecisionRecord>> {
                self.0.pending(f, s, p).await
            }
            async fn get(&self, id: Uuid) -> gatekeeper_core::Result<Option<DecisionRecord>> {
                self.0.get(id).await
            }
            async fn resolve(&self, r: &ResolutionRecord) -> gatekeeper_core::Result<()> {
                self.0.resolve(r).await
            }
            async fn resolution(&self, id: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>> {
                self.0.resolution(id).await
            }
        }

        /// Commits the first increment, then answers only after the caller
        /// has given up.
        struct LateAckLimiter {
            inner: MemoryRateLimiter,
            delayed: AtomicBool,
        }

        #[async_trait]
        impl RateLimiter for LateAckLimiter {
            async fn check_and_increment(
                &self,
                scope: &RateScope,
                limit: u32,
                now: DateTime<Utc>,
            ) -> gatekeeper_core::Result<RateCheck> {
                let check = self.inner.check_and_increment(scope, limit, now).await?;
                if !self.delayed.swap(true, Ordering::SeqCst) {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                }
                Ok(check)
            }
            async fn release(&self, scope: &RateScope, now: DateTime<Utc>) -> gatekeeper_core::Result<()> {
                self.inner.release(scope, now).await
            }
            async fn sweep(&self, now: DateTime<Utc>) -> gatekeeper_core::Result<usize> {
                self.inner.sweep(now).await
            }
        }

        #[tokio::test]
        async fn test_late_increment_is_counted_once() {
            let log = Arc::new(MemoryDecisionLog::new());
            let mut backends = Backends::memory();
            backends.limiter = Arc::new(LateAckLimiter {
                inner: MemoryRateLimiter::new(),
                delayed: AtomicBool::new(false),
            });
            backends.log = log.clone();
            let h = harness_with(backends, log);
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerUserPerDay": 2}})).await;

            let timed_out = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(timed_out.decision, Verdict::Block);
            assert_eq!(timed_out.reason, ReasonCode::StoreUnavailable);

            // The late grant is handed back once the limiter answers.
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
            let third = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(third.reason, ReasonCode::RateLimitExceeded);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_locked_sqlite_file_blocks_within_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("gatekeeper.db");
            let store = SqliteStore::open_with_busy_timeout(&path, std::time::Duration::from_millis(50)).unwrap();
            let h = harness_with(Backends::sqlite(store), Arc::new(MemoryDecisionLog::new()));
            open_up(&h.gk, "u1", "AUTO_FULL").await;

            let writer = rusqlite::Connection::open(&path).unwrap();
            writer.execute_batch("BEGIN IMMEDIATE").unwrap();

            let started = std::time::Instant::now();
            let d = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                h.gk.evaluate(&agent("u1"), "send_email", &json!({})),
            )
            .await
            .expect("evaluate must not wait out the lock");
            assert_eq!(d.decision, Verdict::Block);
            assert!(started.elapsed() < std::time::Duration::from_secs(2));

            writer.execute_batch("ROLLBACK").unwrap();
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
        }

        #[tokio::test]
        async fn test_stalled_store_blocks_and_is_logged() {
            let log = Arc::new(MemoryDecisionLog::new());
            let mut backends = Backends::memory();
            backends.policies = Arc::new(StalledPolicies);
            backends.log = log.clone();
            let h = harness_with(backends, log);

            let d = h.gk.evaluate(&agent("u1"), "send_notification", &json!({})).await;
            assert_eq!(d.decision, Verdict::Block);
            assert_eq!(d.reason, ReasonCode::StoreUnavailable);
            assert_eq!(h.log.len(), 1);
        }

        #[tokio::test]
        async fn test_transient_failure_is_retried() {
            let log = Arc::new(MemoryDecisionLog::new());
            let inner = MemoryRepository::new();
            let mut policy = CompanyPolicy::default_for("acme", &StoreDefaults::default());
            policy.max_autonomy = AutonomyTier::AutoFull;
            inner.save_policy(&policy).await.unwrap();

            let mut backends = Backends::memory();
            backends.policies = Arc::new(FlakyPolicies {
                inner,
                failures: 1,
                calls: AtomicU32::new(0),
            });
            backends.log = log.clone();
            let profile = AttentionProfile::default_for("u1", AutonomyTier::AutoFull, start());
            backends.profiles.save_profile(&profile).await.unwrap();
            let h = harness_with(backends, log);

            let d = h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(d.decision, Verdict::Execute);
        }

        #[tokio::test]
        async fn test_audit_failure_blocks_without_spending_quota() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_FULL").await;
            set_policy(&h.gk, json!({"rateLimits": {"aiCallsPerUserPerDay": 1}})).await;

            let mut broken = h.backends.clone();
            broken.log = Arc::new(BrokenLog);
            let unaudited = Gatekeeper::new(
                broken,
                ActionCatalog::builtin(),
                StoreDefaults::default(),
                h.clock.clone(),
                fast_settings(),
            );
            let d = unaudited.evaluate(&agent("u1"), "send_email", &json!({})).await;
            assert_eq!(d.decision, Verdict::Block);
            assert_eq!(d.reason, ReasonCode::AuditUnavailable);
            assert!(d.channels.is_empty());

            // The shared limiter still has the slot.
            assert!(h.gk.evaluate(&agent("u1"), "send_email", &json!({})).await.is_execute());
        }

        #[tokio::test]
        async fn test_abandoned_call_still_logged() {
            let log = Arc::new(MemoryDecisionLog::new());
            let mut backends = Backends::memory();
            backends.log = Arc::new(SlowLog(log.clone()));
            let h = harness_with(backends, log);

            let gk = h.gk.clone();
            let abandoned = tokio::time::timeout(
                std::time::Duration::from_millis(1),
                gk.evaluate(&agent("u1"), "send_email", &json!({})),
            )
            .await;
            assert!(abandoned.is_err(), "caller gave up before the log write");

            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            assert_eq!(h.log.len(), 1);
        }
    }

    // ── Review ─────────────────────────────────────────────────

    mod review {
        use super::*;

        async fn suggestion(h: &Harness, user: &str) -> Decision {
            let d = h.gk.evaluate(&agent(user), "send_notification", &json!({})).await;
            assert_eq!(d.decision, Verdict::Suggest);
            d
        }

        #[tokio::test]
        async fn test_pending_window_and_resolution() {
            let h = harness();
            let old = suggestion(&h, "u1").await;
            h.clock.advance(Duration::days(8));
            let fresh = suggestion(&h, "u1").await;
            let resolved = suggestion(&h, "u1").await;

            h.gk
                .resolve(&agent("u1"), resolved.id, Resolution::Approved)
                .await
                .unwrap();

            let page = h
                .gk
                .pending_actions(&LogFilter::for_company("acme"), Pagination::default())
                .await
                .unwrap();
            let ids: Vec<_> = page.items.iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![fresh.id]);
            assert!(!ids.contains(&old.id));
        }

        #[tokio::test]
        async fn test_resolve_authorization() {
            let h = harness();
            let d = suggestion(&h, "u1").await;

            let other = h.gk.resolve(&agent("u2"), d.id, Resolution::Rejected).await;
            assert!(matches!(other, Err(GateError::Forbidden(_))));

            let outsider = Actor::new("x", "globex", Role::CompanyAdmin);
            let foreign = h.gk.resolve(&outsider, d.id, Resolution::Rejected).await;
            assert!(matches!(foreign, Err(GateError::NotFound(_))));

            let admin = Actor::new("boss", "acme", Role::CompanyAdmin);
            let record = h.gk.resolve(&admin, d.id, Resolution::Rejected).await.unwrap();
            assert_eq!(record.resolved_by, "boss");

            let again = h.gk.resolve(&admin, d.id, Resolution::Approved).await;
            assert!(matches!(again, Err(GateError::Conflict(_))));
        }

        #[tokio::test]
        async fn test_sweep_counters() {
            let h = harness();
            open_up(&h.gk, "u1", "AUTO_LOW").await;
            h.gk.evaluate(&agent("u1"), "workflow_send_email", &json!({})).await;
            h.clock.advance(Duration::hours(1));
            assert_eq!(h.gk.sweep_counters().await.unwrap(), 1);
        }
    }
}
