//! The pure part of an evaluation: no I/O, no clock, no counters.
//!
//! `preflight` settles everything that can be decided from the policy and
//! profile snapshots alone. When the request survives it, the caller runs the
//! rate-limit checks and hands the result to `conclude`.

use gatekeeper_core::{ActionSpec, Actor, AutonomyTier, ReasonCode, Verdict};
use gatekeeper_store::{AttentionProfile, CompanyPolicy, RateScope};

/// Everything a decision depends on, captured at one instant.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub actor: &'a Actor,
    pub action: &'a str,
    /// `None` when the action is not in the catalog.
    pub spec: Option<&'a ActionSpec>,
    pub policy: &'a CompanyPolicy,
    pub profile: &'a AttentionProfile,
}

/// A verdict with its machine-readable reason and a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    pub reason: ReasonCode,
    pub detail: String,
}

impl Outcome {
    pub fn new(verdict: Verdict, reason: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            reason,
            detail: detail.into(),
        }
    }

    pub fn store_unavailable(detail: impl Into<String>) -> Self {
        Self::new(Verdict::Block, ReasonCode::StoreUnavailable, detail)
    }

    pub fn audit_unavailable(detail: impl Into<String>) -> Self {
        Self::new(Verdict::Block, ReasonCode::AuditUnavailable, detail)
    }
}

/// A rate-limit scope paired with the policy threshold it is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLimit {
    pub scope: RateScope,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    /// Settled without touching any counter.
    Decided(Outcome),
    /// Autonomy suffices; the listed scopes must each admit one more call.
    NeedsQuota {
        required: AutonomyTier,
        effective: AutonomyTier,
        scopes: Vec<ScopeLimit>,
    },
}

/// Result of running the rate-limit checks for a `NeedsQuota` preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quota {
    Granted,
    Exhausted(ScopeLimit),
    Unavailable(String),
}

/// The actor's autonomy after applying the company ceiling.
pub fn effective_autonomy(profile: AutonomyTier, ceiling: AutonomyTier) -> AutonomyTier {
    profile.min(ceiling)
}

/// The scopes an action counts against, in the order they are checked.
pub fn scopes_for(actor: &Actor, spec: &ActionSpec, policy: &CompanyPolicy) -> Vec<ScopeLimit> {
    let limits = &policy.rate_limits;
    let mut scopes = vec![
        ScopeLimit {
            scope: RateScope::UserDay(actor.user_id.clone()),
            limit: limits.ai_calls_per_user_per_day,
        },
        ScopeLimit {
            scope: RateScope::CompanyDay(actor.company_id.clone()),
            limit: limits.ai_calls_per_company_per_day,
        },
    ];
    if spec.automation {
        scopes.push(ScopeLimit {
            scope: RateScope::CompanyHour(actor.company_id.clone()),
            limit: limits.automations_per_hour,
        });
    }
    scopes
}

/// Forbidden list, then catalog membership, then autonomy.
pub fn preflight(snap: &Snapshot<'_>) -> Preflight {
    let action = snap.action;

    if snap.policy.forbids(action) {
        return Preflight::Decided(Outcome::new(
            Verdict::Block,
            ReasonCode::ForbiddenAction,
            format!("action '{action}' is forbidden by company policy"),
        ));
    }

    let Some(spec) = snap.spec else {
        return Preflight::Decided(Outcome::new(
            Verdict::Block,
            ReasonCode::UnknownAction,
            format!("action '{action}' is not in the action catalog"),
        ));
    };

    let effective = effective_autonomy(snap.profile.autonomy, snap.policy.max_autonomy);
    if effective < spec.required {
        let (verdict, tail) = if effective >= spec.suggest_floor {
            (Verdict::Suggest, "surfaced as a suggestion")
        } else {
            (Verdict::LogOnly, "logged only")
        };
        return Preflight::Decided(Outcome::new(
            verdict,
            ReasonCode::AutonomyInsufficient,
            format!(
                "action '{action}' requires {}; effective autonomy is {effective} (profile {}, company max {}); {tail}",
                spec.required, snap.profile.autonomy, snap.policy.max_autonomy
            ),
        ));
    }

    Preflight::NeedsQuota {
        required: spec.required,
        effective,
        scopes: scopes_for(snap.actor, spec, snap.policy),
    }
}

/// Combine a preflight with the outcome of its quota checks.
pub fn conclude(action: &str, preflight: &Preflight, quota: &Quota) -> Outcome {
    let (required, effective) = match preflight {
        Preflight::Decided(outcome) => return outcome.clone(),
        Preflight::NeedsQuota {
            required, effective, ..
        } => (*required, *effective),
    };
    match quota {
        Quota::Granted => Outcome::new(
            Verdict::Execute,
            ReasonCode::Allowed,
            format!("action '{action}' allowed at {effective} (requires {required})"),
        ),
        Quota::Exhausted(hit) => Outcome::new(
            Verdict::Block,
            ReasonCode::RateLimitExceeded,
            format!(
                "rate limit {} ({}) exhausted for the current {} window",
                hit.scope.name(),
                hit.limit,
                hit.scope.window().as_str()
            ),
        ),
        Quota::Unavailable(err) => Outcome::store_unavailable(format!("rate limiter unavailable: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatekeeper_core::{ActionCatalog, Role};
    use gatekeeper_store::StoreDefaults;

    struct Fixture {
        actor: Actor,
        policy: CompanyPolicy,
        profile: AttentionProfile,
        catalog: ActionCatalog,
    }

    impl Fixture {
        fn new(autonomy: AutonomyTier, ceiling: AutonomyTier) -> Self {
            let mut policy = CompanyPolicy::default_for("acme", &StoreDefaults::default());
            policy.max_autonomy = ceiling;
            Self {
                actor: Actor::new("u1", "acme", Role::Agent),
                policy,
                profile: AttentionProfile::default_for("u1", autonomy, Utc::now()),
                catalog: ActionCatalog::builtin(),
            }
        }

        fn run(&self, action: &str) -> Preflight {
            preflight(&Snapshot {
                actor: &self.actor,
                action,
                spec: self.catalog.get(action),
                policy: &self.policy,
                profile: &self.profile,
            })
        }
    }

    fn verdict(p: &Preflight) -> Option<Verdict> {
        match p {
            Preflight::Decided(o) => Some(o.verdict),
            Preflight::NeedsQuota { .. } => None,
        }
    }

    #[test]
    fn test_forbidden_beats_unknown_and_autonomy() {
        let mut f = Fixture::new(AutonomyTier::AutoFull, AutonomyTier::AutoFull);
        f.policy.forbidden.insert("delete_deal".into());
        match f.run("delete_deal") {
            Preflight::Decided(o) => assert_eq!(o.reason, ReasonCode::ForbiddenAction),
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_blocks() {
        let f = Fixture::new(AutonomyTier::AutoFull, AutonomyTier::AutoFull);
        match f.run("launch_rockets") {
            Preflight::Decided(o) => {
                assert_eq!(o.verdict, Verdict::Block);
                assert_eq!(o.reason, ReasonCode::UnknownAction);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_ceiling_clamps_profile() {
        let f = Fixture::new(AutonomyTier::AutoFull, AutonomyTier::SuggestOnly);
        assert_eq!(verdict(&f.run("send_email")), Some(Verdict::Suggest));
        let f = Fixture::new(AutonomyTier::AutoFull, AutonomyTier::None);
        assert_eq!(verdict(&f.run("send_email")), Some(Verdict::LogOnly));
    }

    #[test]
    fn test_notification_suggests_even_at_none() {
        let f = Fixture::new(AutonomyTier::None, AutonomyTier::AutoFull);
        assert_eq!(verdict(&f.run("send_notification")), Some(Verdict::Suggest));
        assert_eq!(verdict(&f.run("create_zettel")), Some(Verdict::LogOnly));
    }

    #[test]
    fn test_automation_adds_hourly_scope() {
        let f = Fixture::new(AutonomyTier::AutoFull, AutonomyTier::AutoFull);
        match f.run("workflow_send_email") {
            Preflight::NeedsQuota { scopes, .. } => {
                assert_eq!(scopes.len(), 3);
                assert_eq!(scopes[2].scope, RateScope::CompanyHour("acme".into()));
                assert_eq!(scopes[2].limit, 50);
            }
            other => panic!("expected quota, got {other:?}"),
        }
        match f.run("send_email") {
            Preflight::NeedsQuota { scopes, .. } => assert_eq!(scopes.len(), 2),
            other => panic!("expected quota, got {other:?}"),
        }
    }

    #[test]
    fn test_monotonic_in_autonomy() {
        let catalog = ActionCatalog::builtin();
        for spec in catalog.iter() {
            let mut last = 0;
            for tier in AutonomyTier::ALL {
                let f = Fixture::new(tier, AutonomyTier::AutoFull);
                let p = f.run(&spec.name);
                let rank = conclude(&spec.name, &p, &Quota::Granted).verdict.permissiveness();
                assert!(rank >= last, "{} regressed at {tier}", spec.name);
                last = rank;
            }
        }
    }

    #[test]
    fn test_conclude_reports_exhausted_scope() {
        let f = Fixture::new(AutonomyTier::AutoLow, AutonomyTier::AutoLow);
        let p = f.run("send_email");
        let hit = ScopeLimit {
            scope: RateScope::UserDay("u1".into()),
            limit: 100,
        };
        let outcome = conclude("send_email", &p, &Quota::Exhausted(hit));
        assert_eq!(outcome.verdict, Verdict::Block);
        assert_eq!(outcome.reason, ReasonCode::RateLimitExceeded);
        assert!(outcome.detail.contains("ai_calls_per_user_per_day"));
    }
}
