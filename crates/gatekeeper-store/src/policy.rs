use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ActionCatalog, AutonomyTier, Clock, CompanyId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::StoreDefaults;
use crate::fields::{self, FieldErrors};

/// Thresholds for the three rate-limited scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    #[serde(alias = "ai_calls_per_user_per_day")]
    pub ai_calls_per_user_per_day: u32,
    #[serde(alias = "ai_calls_per_company_per_day")]
    pub ai_calls_per_company_per_day: u32,
    #[serde(alias = "automations_per_hour")]
    pub automations_per_hour: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            ai_calls_per_user_per_day: 100,
            ai_calls_per_company_per_day: 1000,
            automations_per_hour: 50,
        }
    }
}

/// Company-wide limits on what automation may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPolicy {
    pub company_id: CompanyId,
    pub max_autonomy: AutonomyTier,
    pub forbidden: BTreeSet<String>,
    pub rate_limits: RateLimits,
    /// `None` until an admin saves the policy for the first time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl CompanyPolicy {
    pub fn default_for(company_id: impl Into<String>, defaults: &StoreDefaults) -> Self {
        Self {
            company_id: company_id.into(),
            max_autonomy: defaults.policy_max_autonomy,
            forbidden: BTreeSet::new(),
            rate_limits: defaults.rate_limits,
            updated_at: None,
        }
    }

    pub fn forbids(&self, action: &str) -> bool {
        self.forbidden.contains(action)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyPatch {
    pub max_autonomy: Option<AutonomyTier>,
    pub forbidden: Option<BTreeSet<String>>,
    pub ai_calls_per_user_per_day: Option<u32>,
    pub ai_calls_per_company_per_day: Option<u32>,
    pub automations_per_hour: Option<u32>,
}

impl PolicyPatch {
    /// Parse a PATCH body. Forbidden entries must name actions in `catalog`.
    pub fn from_json(value: &Value, catalog: &ActionCatalog) -> gatekeeper_core::Result<Self> {
        let obj = fields::object(value, "")?;
        let mut errors = FieldErrors::default();
        let mut patch = Self::default();

        for (key, v) in obj {
            match key.as_str() {
                "maxAutonomy" | "max_autonomy" => {
                    let parsed = fields::string(v).and_then(|s| {
                        AutonomyTier::parse(s).ok_or_else(|| format!("unknown autonomy tier '{s}'"))
                    });
                    patch.max_autonomy = errors.take("maxAutonomy", parsed);
                }
                "forbidden" | "forbidden_actions" | "forbiddenActions" => match v.as_array() {
                    Some(items) => {
                        let mut set = BTreeSet::new();
                        for (i, item) in items.iter().enumerate() {
                            let field = format!("forbidden[{i}]");
                            match fields::string(item) {
                                Ok(name) if catalog.contains(name) => {
                                    set.insert(name.to_string());
                                }
                                Ok(name) => errors.push(field, format!("unknown action '{name}'")),
                                Err(e) => errors.push(field, e),
                            }
                        }
                        patch.forbidden = Some(set);
                    }
                    None => errors.push("forbidden", format!("expected an array, got {}", fields::kind(v))),
                },
                "rateLimits" | "rate_limits" => match v.as_object() {
                    Some(limits) => {
                        for (name, limit) in limits {
                            let field = format!("rateLimits.{name}");
                            let slot = match name.as_str() {
                                "aiCallsPerUserPerDay" | "ai_calls_per_user_per_day" => {
                                    &mut patch.ai_calls_per_user_per_day
                                }
                                "aiCallsPerCompanyPerDay" | "ai_calls_per_company_per_day" => {
                                    &mut patch.ai_calls_per_company_per_day
                                }
                                "automationsPerHour" | "automations_per_hour" => {
                                    &mut patch.automations_per_hour
                                }
                                _ => {
                                    errors.push(field, "unknown rate limit");
                                    continue;
                                }
                            };
                            *slot = errors.take(&field, fields::positive(limit));
                        }
                    }
                    None => errors.push("rateLimits", format!("expected an object, got {}", fields::kind(v))),
                },
                "companyId" | "company_id" | "updatedAt" | "updated_at" => {
                    errors.push(key.as_str(), "field is read-only")
                }
                _ => errors.push(key.as_str(), "unknown field"),
            }
        }

        errors.finish()?;
        Ok(patch)
    }

    pub fn apply(&self, policy: &mut CompanyPolicy) {
        if let Some(tier) = self.max_autonomy {
            policy.max_autonomy = tier;
        }
        if let Some(ref forbidden) = self.forbidden {
            policy.forbidden = forbidden.clone();
        }
        if let Some(n) = self.ai_calls_per_user_per_day {
            policy.rate_limits.ai_calls_per_user_per_day = n;
        }
        if let Some(n) = self.ai_calls_per_company_per_day {
            policy.rate_limits.ai_calls_per_company_per_day = n;
        }
        if let Some(n) = self.automations_per_hour {
            policy.rate_limits.automations_per_hour = n;
        }
    }
}

/// Persistence for company policies.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn load_policy(&self, company_id: &str) -> gatekeeper_core::Result<Option<CompanyPolicy>>;
    async fn save_policy(&self, policy: &CompanyPolicy) -> gatekeeper_core::Result<()>;
}

/// Upsert-style CRUD over company policies.
#[derive(Clone)]
pub struct PolicyStore {
    repo: Arc<dyn PolicyRepository>,
    defaults: StoreDefaults,
    clock: Arc<dyn Clock>,
}

impl PolicyStore {
    pub fn new(repo: Arc<dyn PolicyRepository>, defaults: StoreDefaults, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            defaults,
            clock,
        }
    }

    /// The company's policy, or the conservative default when none is stored.
    pub async fn get(&self, company_id: &str) -> gatekeeper_core::Result<CompanyPolicy> {
        Ok(self
            .repo
            .load_policy(company_id)
            .await?
            .unwrap_or_else(|| CompanyPolicy::default_for(company_id, &self.defaults)))
    }

    pub async fn patch(&self, company_id: &str, patch: &PolicyPatch) -> gatekeeper_core::Result<CompanyPolicy> {
        let mut policy = self.get(company_id).await?;
        patch.apply(&mut policy);
        policy.updated_at = Some(self.clock.now());
        self.repo.save_policy(&policy).await?;
        info!(
            company_id,
            max_autonomy = %policy.max_autonomy,
            forbidden = policy.forbidden.len(),
            "company policy updated"
        );
        Ok(policy)
    }
}
