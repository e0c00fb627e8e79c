use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a user.
pub type UserId = String;

/// Unique identifier for a company (tenant).
pub type CompanyId = String;

// ── Actor ──────────────────────────────────────────────────────

/// Role of an authenticated actor inside their company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Agent,
    Supervisor,
    CompanyAdmin,
    SuperAdmin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "agent" => Some(Self::Agent),
            "supervisor" => Some(Self::Supervisor),
            "company_admin" => Some(Self::CompanyAdmin),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    /// Whether this role may read and change the company policy.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::CompanyAdmin | Self::SuperAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Agent => "agent",
            Self::Supervisor => "supervisor",
            Self::CompanyAdmin => "company_admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated party on whose behalf an action is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, company_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: company_id.into(),
            role,
        }
    }
}

// ── Autonomy ───────────────────────────────────────────────────

/// Four autonomy tiers, from "never act alone" to "act on anything allowed":
///
/// - **NONE**: nothing runs unsupervised.
/// - **SUGGEST_ONLY**: the gatekeeper may propose actions for human review.
/// - **AUTO_LOW**: low-risk actions run unsupervised.
/// - **AUTO_FULL**: every permitted action runs unsupervised, destructive ones included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AutonomyTier {
    None = 0,
    SuggestOnly = 1,
    AutoLow = 2,
    AutoFull = 3,
}

impl AutonomyTier {
    /// Least to most permissive.
    pub const ALL: [AutonomyTier; 4] = [
        AutonomyTier::None,
        AutonomyTier::SuggestOnly,
        AutonomyTier::AutoLow,
        AutonomyTier::AutoFull,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "SUGGEST_ONLY" => Some(Self::SuggestOnly),
            "AUTO_LOW" => Some(Self::AutoLow),
            "AUTO_FULL" => Some(Self::AutoFull),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::SuggestOnly => "SUGGEST_ONLY",
            Self::AutoLow => "AUTO_LOW",
            Self::AutoFull => "AUTO_FULL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::None => "Nothing runs unsupervised",
            Self::SuggestOnly => "Actions are proposed for review, never executed",
            Self::AutoLow => "Low-risk actions execute, the rest are suggested",
            Self::AutoFull => "Every permitted action executes",
        }
    }
}

impl fmt::Display for AutonomyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Attention ──────────────────────────────────────────────────

/// How receptive a user currently is to notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttentionLevel {
    Active,
    #[serde(alias = "BALANCED")]
    Normal,
    Focused,
    #[serde(alias = "SILENT")]
    DoNotDisturb,
}

impl AttentionLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "NORMAL" | "BALANCED" => Some(Self::Normal),
            "FOCUSED" => Some(Self::Focused),
            "DO_NOT_DISTURB" | "SILENT" => Some(Self::DoNotDisturb),
            _ => None,
        }
    }

    /// Whether this level mutes the given channel even when the user enabled it.
    pub fn suppresses(&self, channel: Channel) -> bool {
        match self {
            Self::Active | Self::Normal => false,
            Self::Focused => matches!(channel, Channel::Push | Channel::Sms),
            Self::DoNotDisturb => {
                matches!(channel, Channel::Push | Channel::Sms | Channel::Whatsapp)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Normal => "NORMAL",
            Self::Focused => "FOCUSED",
            Self::DoNotDisturb => "DO_NOT_DISTURB",
        }
    }
}

impl fmt::Display for AttentionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Channels ───────────────────────────────────────────────────

/// A notification delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
    Inapp,
    Whatsapp,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Email,
        Channel::Push,
        Channel::Inapp,
        Channel::Whatsapp,
        Channel::Sms,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "push" => Some(Self::Push),
            "inapp" => Some(Self::Inapp),
            "whatsapp" => Some(Self::Whatsapp),
            "sms" => Some(Self::Sms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::Inapp => "inapp",
            Self::Whatsapp => "whatsapp",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel opt-in flags of an attention profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channels {
    pub email: bool,
    pub push: bool,
    pub inapp: bool,
    pub whatsapp: bool,
    pub sms: bool,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
            inapp: true,
            whatsapp: false,
            sms: false,
        }
    }
}

impl Channels {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email,
            Channel::Push => self.push,
            Channel::Inapp => self.inapp,
            Channel::Whatsapp => self.whatsapp,
            Channel::Sms => self.sms,
        }
    }

    pub fn set(&mut self, channel: Channel, enabled: bool) {
        match channel {
            Channel::Email => self.email = enabled,
            Channel::Push => self.push = enabled,
            Channel::Inapp => self.inapp = enabled,
            Channel::Whatsapp => self.whatsapp = enabled,
            Channel::Sms => self.sms = enabled,
        }
    }

    /// Enabled channels in a stable order.
    pub fn enabled(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }
}

// ── Decisions ──────────────────────────────────────────────────

/// The outcome of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Execute,
    Suggest,
    LogOnly,
    Block,
}

impl Verdict {
    pub const ALL: [Verdict; 4] = [
        Verdict::Execute,
        Verdict::Suggest,
        Verdict::LogOnly,
        Verdict::Block,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXECUTE" => Some(Self::Execute),
            "SUGGEST" => Some(Self::Suggest),
            "LOG_ONLY" => Some(Self::LogOnly),
            "BLOCK" => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "EXECUTE",
            Self::Suggest => "SUGGEST",
            Self::LogOnly => "LOG_ONLY",
            Self::Block => "BLOCK",
        }
    }

    /// Rank used to compare how much a verdict lets through (BLOCK lowest, EXECUTE highest).
    pub fn permissiveness(&self) -> u8 {
        match self {
            Self::Block => 0,
            Self::LogOnly => 1,
            Self::Suggest => 2,
            Self::Execute => 3,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to every verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ForbiddenAction,
    UnknownAction,
    AutonomyInsufficient,
    RateLimitExceeded,
    Allowed,
    StoreUnavailable,
    AuditUnavailable,
}

impl ReasonCode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forbidden_action" => Some(Self::ForbiddenAction),
            "unknown_action" => Some(Self::UnknownAction),
            "autonomy_insufficient" => Some(Self::AutonomyInsufficient),
            "rate_limit_exceeded" => Some(Self::RateLimitExceeded),
            "allowed" => Some(Self::Allowed),
            "store_unavailable" => Some(Self::StoreUnavailable),
            "audit_unavailable" => Some(Self::AuditUnavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenAction => "forbidden_action",
            Self::UnknownAction => "unknown_action",
            Self::AutonomyInsufficient => "autonomy_insufficient",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Allowed => "allowed",
            Self::StoreUnavailable => "store_unavailable",
            Self::AuditUnavailable => "audit_unavailable",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
