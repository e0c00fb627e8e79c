use chrono::{DateTime, Utc};
use gatekeeper_config::{EngineConfig, GatekeeperConfig, StorageBackend};
use gatekeeper_core::{
    ActionCatalog, Actor, AutonomyTier, Channel, Clock, GateError, ReasonCode, Verdict,
};
use gatekeeper_store::{
    AttentionProfile, AttentionProfileStore, CompanyPolicy, DecisionLog, DecisionRecord, LogFilter,
    MemoryDecisionLog, MemoryRateLimiter, MemoryRepository, Page, Pagination, PolicyRepository,
    PolicyStore, ProfileRepository, RateCheck, RateLimiter, RateScope, RateLimits, Resolution,
    ResolutionRecord, SqliteStore, StoreDefaults,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::decide::{self, Outcome, Preflight, Quota, Snapshot};
use crate::routing;

/// What `evaluate` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: Uuid,
    pub action: String,
    pub decision: Verdict,
    pub reason: ReasonCode,
    pub detail: String,
    pub channels: Vec<Channel>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn is_execute(&self) -> bool {
        self.decision == Verdict::Execute
    }
}

impl From<&DecisionRecord> for Decision {
    fn from(r: &DecisionRecord) -> Self {
        Self {
            id: r.id,
            action: r.action.clone(),
            decision: r.decision,
            reason: r.reason,
            detail: r.detail.clone(),
            channels: r.channels.clone(),
            timestamp: r.timestamp,
        }
    }
}

// ── Wiring ─────────────────────────────────────────────────────

/// The four storage seams the engine depends on.
#[derive(Clone)]
pub struct Backends {
    pub profiles: Arc<dyn ProfileRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub limiter: Arc<dyn RateLimiter>,
    pub log: Arc<dyn DecisionLog>,
}

impl Backends {
    pub fn memory() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        Self {
            profiles: repo.clone(),
            policies: repo,
            limiter: Arc::new(MemoryRateLimiter::new()),
            log: Arc::new(MemoryDecisionLog::new()),
        }
    }

    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            profiles: store.clone(),
            policies: store.clone(),
            limiter: store.clone(),
            log: store,
        }
    }

    /// A locked SQLite database gives up no later than one lookup timeout.
    pub fn from_config(config: &GatekeeperConfig) -> gatekeeper_core::Result<Self> {
        let storage = &config.storage;
        match storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory storage");
                Ok(Self::memory())
            }
            StorageBackend::Sqlite => {
                let busy_timeout = Duration::from_millis(config.engine.lookup_timeout_ms);
                let store = SqliteStore::open_with_busy_timeout(&storage.resolved_path(), busy_timeout)?;
                Ok(Self::sqlite(store))
            }
        }
    }
}

/// Timeouts and windows for the evaluation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub lookup_timeout: Duration,
    pub lookup_retries: u32,
    pub pending_window: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            lookup_retries: config.lookup_retries,
            pending_window: chrono::Duration::days(i64::from(config.pending_window_days)),
        }
    }
}

struct Inner {
    backends: Backends,
    catalog: ActionCatalog,
    defaults: StoreDefaults,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

/// The action gatekeeper. Cheap to clone; every clone shares the same backends.
#[derive(Clone)]
pub struct Gatekeeper {
    inner: Arc<Inner>,
}

impl Gatekeeper {
    pub fn new(
        backends: Backends,
        catalog: ActionCatalog,
        defaults: StoreDefaults,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backends,
                catalog,
                defaults,
                clock,
                settings,
            }),
        }
    }

    pub fn from_config(config: &GatekeeperConfig, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let d = &config.defaults;
        let defaults = StoreDefaults {
            profile_autonomy: d.profile_autonomy,
            policy_max_autonomy: d.policy_max_autonomy,
            rate_limits: RateLimits {
                ai_calls_per_user_per_day: d.ai_calls_per_user_per_day,
                ai_calls_per_company_per_day: d.ai_calls_per_company_per_day,
                automations_per_hour: d.automations_per_hour,
            },
        };
        Self::new(
            backends,
            config.catalog(),
            defaults,
            clock,
            EngineSettings::from(&config.engine),
        )
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.inner.catalog
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn profiles(&self) -> AttentionProfileStore {
        AttentionProfileStore::new(
            Arc::clone(&self.inner.backends.profiles),
            self.inner.defaults.profile_autonomy,
            Arc::clone(&self.inner.clock),
        )
    }

    pub fn policies(&self) -> PolicyStore {
        PolicyStore::new(
            Arc::clone(&self.inner.backends.policies),
            self.inner.defaults.clone(),
            Arc::clone(&self.inner.clock),
        )
    }

    pub fn log(&self) -> &Arc<dyn DecisionLog> {
        &self.inner.backends.log
    }

    // ── Evaluation ─────────────────────────────────────────────

    /// Decide whether `actor` may perform `action` now. Never fails: any
    /// lookup or audit problem yields BLOCK.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not stop the decision from being made and logged.
    pub async fn evaluate(&self, actor: &Actor, action: &str, params: &Value) -> Decision {
        let this = self.clone();
        let task_actor = actor.clone();
        let task_action = action.to_string();
        let task_params = params.clone();
        let handle = tokio::spawn(async move {
            this.evaluate_detached(&task_actor, &task_action, &task_params)
                .await
        });
        match handle.await {
            Ok(decision) => decision,
            Err(e) => {
                error!(action, error = %e, "evaluation task failed");
                let outcome = Outcome::store_unavailable(format!("evaluation aborted: {e}"));
                let record = self.record(actor, action, params, outcome, Vec::new());
                if let Err(e) = self.inner.backends.log.append(&record).await {
                    error!(error = %e, "could not log aborted evaluation");
                }
                Decision::from(&record)
            }
        }
    }

    async fn evaluate_detached(&self, actor: &Actor, action: &str, params: &Value) -> Decision {
        let now = self.now();
        let (outcome, consumed, profile) = match self.snapshot(actor).await {
            Ok((policy, profile)) => {
                let (outcome, consumed) = self.decide(actor, action, &policy, &profile, now).await;
                (outcome, consumed, Some(profile))
            }
            Err(e) => {
                warn!(action, user_id = %actor.user_id, error = %e, "lookup failed, blocking");
                (Outcome::store_unavailable(format!("lookup failed: {e}")), Vec::new(), None)
            }
        };

        let channels = match (&outcome.verdict, &profile) {
            (Verdict::Suggest, Some(p)) => routing::route(p, now),
            _ => Vec::new(),
        };
        let record = self.record(actor, action, params, outcome, channels);

        let append = self
            .bounded("audit", || self.inner.backends.log.append(&record))
            .await;
        if let Err(e) = append {
            error!(action, user_id = %actor.user_id, error = %e, "decision could not be audited, blocking");
            self.release_all(&consumed, now).await;
            let outcome = Outcome::audit_unavailable(format!(
                "decision could not be written to the audit log: {e}"
            ));
            let mut failed = Decision::from(&record);
            failed.decision = outcome.verdict;
            failed.reason = outcome.reason;
            failed.detail = outcome.detail;
            failed.channels.clear();
            return failed;
        }

        info!(
            action,
            user_id = %actor.user_id,
            company_id = %actor.company_id,
            decision = %record.decision,
            reason = %record.reason,
            "decision rendered"
        );
        Decision::from(&record)
    }

    /// Policy and profile, each under the lookup timeout and retry budget.
    /// Neither read persists a default.
    async fn snapshot(&self, actor: &Actor) -> gatekeeper_core::Result<(CompanyPolicy, AttentionProfile)> {
        let policies = self.policies();
        let profiles = self.profiles();
        let policy = self
            .bounded("policy", || policies.get(&actor.company_id))
            .await?;
        let profile = self
            .bounded("profile", || profiles.snapshot(&actor.user_id))
            .await?;
        Ok((policy, profile))
    }

    /// Run the pure preflight, then the quota checks. Returns the scopes that
    /// were incremented so they can be released if the audit write fails.
    async fn decide(
        &self,
        actor: &Actor,
        action: &str,
        policy: &CompanyPolicy,
        profile: &AttentionProfile,
        now: DateTime<Utc>,
    ) -> (Outcome, Vec<RateScope>) {
        let preflight = decide::preflight(&Snapshot {
            actor,
            action,
            spec: self.inner.catalog.get(action),
            policy,
            profile,
        });

        let Preflight::NeedsQuota { ref scopes, .. } = preflight else {
            return (decide::conclude(action, &preflight, &Quota::Granted), Vec::new());
        };

        let mut consumed = Vec::with_capacity(scopes.len());
        let mut quota = Quota::Granted;
        for hit in scopes {
            match self.increment(&hit.scope, hit.limit, now).await {
                Ok(check) if check.allowed => {
                    debug!(scope = %hit.scope, remaining = check.remaining, "quota consumed");
                    consumed.push(hit.scope.clone());
                }
                Ok(_) => {
                    quota = Quota::Exhausted(hit.clone());
                    break;
                }
                Err(e) => {
                    quota = Quota::Unavailable(e.to_string());
                    break;
                }
            }
        }

        if quota != Quota::Granted {
            self.release_all(&consumed, now).await;
            consumed.clear();
        }
        (decide::conclude(action, &preflight, &quota), consumed)
    }

    async fn release_all(&self, scopes: &[RateScope], now: DateTime<Utc>) {
        for scope in scopes {
            let limiter = &self.inner.backends.limiter;
            if let Err(e) = self.attempts("release", 0, || limiter.release(scope, now)).await {
                warn!(scope = %scope, error = %e, "could not release rate-limit slot");
            }
        }
    }

    /// Claim one slot of `scope`. Counters are not idempotent, so there is a
    /// single attempt. A call that outlives the lookup timeout keeps running on
    /// its own task, and any slot it grants late is handed back.
    async fn increment(
        &self,
        scope: &RateScope,
        limit: u32,
        now: DateTime<Utc>,
    ) -> gatekeeper_core::Result<RateCheck> {
        let limiter = Arc::clone(&self.inner.backends.limiter);
        let task_scope = scope.clone();
        let mut task =
            tokio::spawn(async move { limiter.check_and_increment(&task_scope, limit, now).await });
        let lookup_timeout = self.inner.settings.lookup_timeout;
        match tokio::time::timeout(lookup_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(GateError::Store(format!("rate_limit task failed: {e}"))),
            Err(_) => {
                warn!(
                    scope = %scope,
                    timeout_ms = lookup_timeout.as_millis() as u64,
                    "rate-limit call timed out"
                );
                let limiter = Arc::clone(&self.inner.backends.limiter);
                let late_scope = scope.clone();
                tokio::spawn(async move {
                    let granted = matches!(task.await, Ok(Ok(check)) if check.allowed);
                    if granted {
                        match limiter.release(&late_scope, now).await {
                            Ok(()) => info!(scope = %late_scope, "released slot granted after timeout"),
                            Err(e) => warn!(scope = %late_scope, error = %e, "could not release late slot"),
                        }
                    }
                });
                Err(GateError::Timeout(format!(
                    "rate_limit after {}ms",
                    lookup_timeout.as_millis()
                )))
            }
        }
    }

    /// Run an idempotent store call under the lookup timeout, retrying on
    /// error or timeout.
    async fn bounded<T, F, Fut>(&self, what: &'static str, op: F) -> gatekeeper_core::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = gatekeeper_core::Result<T>>,
    {
        self.attempts(what, self.inner.settings.lookup_retries, op).await
    }

    async fn attempts<T, F, Fut>(
        &self,
        what: &'static str,
        retries: u32,
        mut op: F,
    ) -> gatekeeper_core::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = gatekeeper_core::Result<T>>,
    {
        let lookup_timeout = self.inner.settings.lookup_timeout;
        let mut last = None;
        for attempt in 0..=retries {
            match tokio::time::timeout(lookup_timeout, op()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => {
                    warn!(what, attempt, error = %e, "store call failed");
                    last = Some(e);
                }
                Err(_) => {
                    warn!(what, attempt, timeout_ms = lookup_timeout.as_millis() as u64, "store call timed out");
                    last = Some(GateError::Timeout(format!(
                        "{what} after {}ms",
                        lookup_timeout.as_millis()
                    )));
                }
            }
        }
        Err(last.unwrap_or_else(|| GateError::Store(format!("{what} was not attempted"))))
    }

    fn record(
        &self,
        actor: &Actor,
        action: &str,
        params: &Value,
        outcome: Outcome,
        channels: Vec<Channel>,
    ) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            action: action.to_string(),
            actor_id: actor.user_id.clone(),
            company_id: actor.company_id.clone(),
            decision: outcome.verdict,
            reason: outcome.reason,
            detail: outcome.detail,
            params_digest: params_digest(params),
            channels,
            timestamp: self.now(),
        }
    }

    // ── Audit & review ─────────────────────────────────────────

    /// Unresolved suggestions inside the configured pending window.
    pub async fn pending_actions(
        &self,
        filter: &LogFilter,
        page: Pagination,
    ) -> gatekeeper_core::Result<Page<DecisionRecord>> {
        let since = self.now() - self.inner.settings.pending_window;
        self.inner.backends.log.pending(filter, since, page).await
    }

    /// Record a human resolution of a suggestion. Only the suggestion's actor
    /// or an admin of the same company may resolve it.
    pub async fn resolve(
        &self,
        actor: &Actor,
        id: Uuid,
        resolution: Resolution,
    ) -> gatekeeper_core::Result<ResolutionRecord> {
        let log = &self.inner.backends.log;
        let record = match log.get(id).await? {
            Some(r) if r.company_id == actor.company_id => r,
            _ => return Err(GateError::NotFound(format!("decision {id}"))),
        };
        if record.actor_id != actor.user_id && !actor.role.is_admin() {
            return Err(GateError::Forbidden(
                "only the requesting user or a company admin can resolve this action".into(),
            ));
        }
        let resolved = ResolutionRecord {
            decision_id: id,
            resolution,
            resolved_by: actor.user_id.clone(),
            resolved_at: self.now(),
        };
        log.resolve(&resolved).await?;
        info!(%id, resolution = %resolution, resolved_by = %actor.user_id, "pending action resolved");
        Ok(resolved)
    }

    /// Drop rate-limit counters from expired windows.
    pub async fn sweep_counters(&self) -> gatekeeper_core::Result<usize> {
        self.inner.backends.limiter.sweep(self.now()).await
    }

    /// The ceiling a profile PATCH is clamped to.
    pub async fn autonomy_ceiling(&self, company_id: &str) -> gatekeeper_core::Result<AutonomyTier> {
        Ok(self.policies().get(company_id).await?.max_autonomy)
    }
}

/// BLAKE3 hex digest of the canonical JSON encoding (sorted object keys).
pub fn params_digest(params: &Value) -> String {
    let canonical = canonical_json(params);
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}
