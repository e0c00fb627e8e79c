use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use gatekeeper_core::{AttentionLevel, AutonomyTier, Channel, Channels, Clock, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::fields::{self, FieldErrors};

/// Largest accepted quiet-hours offset from UTC, in minutes.
const MAX_OFFSET_MINUTES: i64 = 14 * 60;

// ── Quiet hours ────────────────────────────────────────────────

/// A recurring window in which notifications are routed as if the user were
/// in do-not-disturb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    /// Local start time, `HH:MM`.
    pub start: String,
    /// Local end time, `HH:MM`. Earlier than `start` means the window crosses midnight.
    pub end: String,
    /// ISO weekdays (1 = Monday) the window starts on. Empty means every day.
    #[serde(default)]
    pub days: Vec<u8>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl QuietHours {
    /// Whether `now` falls inside the window. Start is inclusive, end exclusive.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            return false;
        };
        if start == end {
            return false;
        }
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes * 60) else {
            return false;
        };
        let local = now.with_timezone(&offset);
        let minute = local.hour() * 60 + local.minute();
        let today = local.weekday().number_from_monday() as u8;

        if start < end {
            (start..end).contains(&minute) && self.starts_on(today)
        } else if minute >= start {
            self.starts_on(today)
        } else if minute < end {
            // Past midnight: the window opened the day before.
            let yesterday = (local - Duration::days(1)).weekday().number_from_monday() as u8;
            self.starts_on(yesterday)
        } else {
            false
        }
    }

    fn starts_on(&self, weekday: u8) -> bool {
        self.days.is_empty() || self.days.contains(&weekday)
    }

    fn from_json(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<Self> {
        let Some(obj) = value.as_object() else {
            errors.push(field, format!("expected an object, got {}", fields::kind(value)));
            return None;
        };
        let mut ok = true;
        let mut window = QuietHours {
            start: String::new(),
            end: String::new(),
            days: Vec::new(),
            utc_offset_minutes: 0,
        };

        for key in ["start", "end"] {
            let name = format!("{field}.{key}");
            match obj.get(key) {
                None => {
                    errors.push(name, "is required");
                    ok = false;
                }
                Some(v) => match fields::string(v) {
                    Ok(s) if parse_hhmm(s).is_some() => {
                        if key == "start" {
                            window.start = s.to_string();
                        } else {
                            window.end = s.to_string();
                        }
                    }
                    Ok(s) => {
                        errors.push(name, format!("'{s}' is not a HH:MM time"));
                        ok = false;
                    }
                    Err(e) => {
                        errors.push(name, e);
                        ok = false;
                    }
                },
            }
        }

        if let Some(days) = obj.get("days") {
            match days.as_array() {
                Some(items) => {
                    for (i, d) in items.iter().enumerate() {
                        match d.as_u64() {
                            Some(n @ 1..=7) => window.days.push(n as u8),
                            _ => {
                                errors.push(format!("{field}.days[{i}]"), "expected a weekday 1..=7");
                                ok = false;
                            }
                        }
                    }
                    window.days.sort_unstable();
                    window.days.dedup();
                }
                None => {
                    errors.push(format!("{field}.days"), "expected an array of weekdays");
                    ok = false;
                }
            }
        }

        let offset = obj
            .get("utcOffsetMinutes")
            .or_else(|| obj.get("utc_offset_minutes"));
        if let Some(v) = offset {
            match v.as_i64() {
                Some(m) if m.abs() <= MAX_OFFSET_MINUTES => window.utc_offset_minutes = m as i32,
                _ => {
                    errors.push(
                        format!("{field}.utcOffsetMinutes"),
                        format!("expected minutes within ±{MAX_OFFSET_MINUTES}"),
                    );
                    ok = false;
                }
            }
        }

        for key in obj.keys() {
            if !matches!(
                key.as_str(),
                "start" | "end" | "days" | "utcOffsetMinutes" | "utc_offset_minutes"
            ) {
                errors.push(format!("{field}.{key}"), "unknown field");
                ok = false;
            }
        }

        ok.then_some(window)
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

// ── Profile ────────────────────────────────────────────────────

/// Per-user attention, channel and autonomy preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionProfile {
    pub user_id: UserId,
    pub level: AttentionLevel,
    pub channels: Channels,
    pub autonomy: AutonomyTier,
    #[serde(default)]
    pub quiet_hours: Vec<QuietHours>,
    pub updated_at: DateTime<Utc>,
}

impl AttentionProfile {
    /// The profile a user gets before they configure anything.
    pub fn default_for(user_id: impl Into<String>, autonomy: AutonomyTier, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            level: AttentionLevel::Normal,
            channels: Channels::default(),
            autonomy,
            quiet_hours: Vec::new(),
            updated_at: now,
        }
    }

    pub fn in_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        self.quiet_hours.iter().any(|w| w.contains(now))
    }

    /// The level channel routing should use at `now`.
    pub fn effective_level(&self, now: DateTime<Utc>) -> AttentionLevel {
        if self.in_quiet_hours(now) {
            AttentionLevel::DoNotDisturb
        } else {
            self.level
        }
    }
}

/// A validated partial update of an attention profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub level: Option<AttentionLevel>,
    pub channels: Vec<(Channel, bool)>,
    pub autonomy: Option<AutonomyTier>,
    pub quiet_hours: Option<Vec<QuietHours>>,
}

impl ProfilePatch {
    /// Parse a PATCH body, reporting every invalid field.
    pub fn from_json(value: &Value) -> gatekeeper_core::Result<Self> {
        let obj = fields::object(value, "")?;
        let mut errors = FieldErrors::default();
        let mut patch = Self::default();

        for (key, v) in obj {
            match key.as_str() {
                "level" => {
                    let parsed = fields::string(v).and_then(|s| {
                        AttentionLevel::parse(s).ok_or_else(|| format!("unknown attention level '{s}'"))
                    });
                    patch.level = errors.take("level", parsed);
                }
                "autonomy" => {
                    let parsed = fields::string(v).and_then(|s| {
                        AutonomyTier::parse(s).ok_or_else(|| format!("unknown autonomy tier '{s}'"))
                    });
                    patch.autonomy = errors.take("autonomy", parsed);
                }
                "channels" => match v.as_object() {
                    Some(channels) => {
                        for (name, flag) in channels {
                            let field = format!("channels.{name}");
                            let Some(channel) = Channel::parse(name) else {
                                errors.push(field, "unknown channel");
                                continue;
                            };
                            if let Some(enabled) = errors.take(&field, fields::boolean(flag)) {
                                patch.channels.push((channel, enabled));
                            }
                        }
                    }
                    None => errors.push("channels", format!("expected an object, got {}", fields::kind(v))),
                },
                "quietHours" | "quiet_hours" => match v.as_array() {
                    Some(items) => {
                        let windows: Vec<_> = items
                            .iter()
                            .enumerate()
                            .filter_map(|(i, w)| QuietHours::from_json(w, &format!("quietHours[{i}]"), &mut errors))
                            .collect();
                        patch.quiet_hours = Some(windows);
                    }
                    None => errors.push("quietHours", format!("expected an array, got {}", fields::kind(v))),
                },
                "userId" | "user_id" | "updatedAt" | "updated_at" => {
                    errors.push(key.as_str(), "field is read-only")
                }
                _ => errors.push(key.as_str(), "unknown field"),
            }
        }

        errors.finish()?;
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.channels.is_empty()
            && self.autonomy.is_none()
            && self.quiet_hours.is_none()
    }

    /// Merge into `profile`. Absent fields keep their stored values.
    pub fn apply(&self, profile: &mut AttentionProfile) {
        if let Some(level) = self.level {
            profile.level = level;
        }
        for (channel, enabled) in &self.channels {
            profile.channels.set(*channel, *enabled);
        }
        if let Some(autonomy) = self.autonomy {
            profile.autonomy = autonomy;
        }
        if let Some(ref windows) = self.quiet_hours {
            profile.quiet_hours = windows.clone();
        }
    }
}

// ── Repository & store ─────────────────────────────────────────

/// Persistence for attention profiles.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> gatekeeper_core::Result<Option<AttentionProfile>>;
    async fn save_profile(&self, profile: &AttentionProfile) -> gatekeeper_core::Result<()>;
}

/// CRUD over attention profiles with lazy defaults.
#[derive(Clone)]
pub struct AttentionProfileStore {
    repo: Arc<dyn ProfileRepository>,
    default_autonomy: AutonomyTier,
    clock: Arc<dyn Clock>,
}

impl AttentionProfileStore {
    pub fn new(
        repo: Arc<dyn ProfileRepository>,
        default_autonomy: AutonomyTier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            default_autonomy,
            clock,
        }
    }

    /// Read a user's profile, creating and persisting the default on first access.
    /// The result never exceeds `ceiling`: a profile stored above a since-lowered
    /// ceiling is clamped and written back.
    pub async fn get(&self, user_id: &str, ceiling: AutonomyTier) -> gatekeeper_core::Result<AttentionProfile> {
        if let Some(mut profile) = self.repo.load_profile(user_id).await? {
            if profile.autonomy > ceiling {
                info!(user_id, stored = %profile.autonomy, %ceiling, "company maximum was lowered, clamping profile");
                profile.autonomy = ceiling;
                profile.updated_at = self.clock.now();
                self.repo.save_profile(&profile).await?;
            }
            return Ok(profile);
        }
        let profile = self.fresh(user_id, ceiling);
        self.repo.save_profile(&profile).await?;
        info!(user_id, autonomy = %profile.autonomy, "created default attention profile");
        Ok(profile)
    }

    /// Read a user's profile without persisting anything. Used on the evaluation path.
    pub async fn snapshot(&self, user_id: &str) -> gatekeeper_core::Result<AttentionProfile> {
        match self.repo.load_profile(user_id).await? {
            Some(profile) => Ok(profile),
            None => Ok(AttentionProfile::default_for(
                user_id,
                self.default_autonomy,
                self.clock.now(),
            )),
        }
    }

    /// Apply a patch and persist it. Autonomy is clamped to `ceiling`.
    pub async fn patch(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
        ceiling: AutonomyTier,
    ) -> gatekeeper_core::Result<AttentionProfile> {
        let mut profile = match self.repo.load_profile(user_id).await? {
            Some(p) => p,
            None => self.fresh(user_id, ceiling),
        };
        patch.apply(&mut profile);
        if profile.autonomy > ceiling {
            debug!(user_id, requested = %profile.autonomy, %ceiling, "clamping autonomy to company maximum");
            profile.autonomy = ceiling;
        }
        profile.updated_at = self.clock.now();
        self.repo.save_profile(&profile).await?;
        info!(user_id, level = %profile.level, autonomy = %profile.autonomy, "attention profile updated");
        Ok(profile)
    }

    fn fresh(&self, user_id: &str, ceiling: AutonomyTier) -> AttentionProfile {
        AttentionProfile::default_for(user_id, self.default_autonomy.min(ceiling), self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_quiet_hours_same_day() {
        let w = QuietHours {
            start: "12:00".into(),
            end: "13:30".into(),
            days: vec![],
            utc_offset_minutes: 0,
        };
        assert!(w.contains(at(2026, 3, 4, 12, 0)));
        assert!(w.contains(at(2026, 3, 4, 13, 29)));
        assert!(!w.contains(at(2026, 3, 4, 13, 30)));
        assert!(!w.contains(at(2026, 3, 4, 11, 59)));
    }

    #[test]
    fn test_quiet_hours_cross_midnight_uses_start_day() {
        // 2026-03-06 is a Friday (5).
        let w = QuietHours {
            start: "22:00".into(),
            end: "07:00".into(),
            days: vec![5],
            utc_offset_minutes: 0,
        };
        assert!(w.contains(at(2026, 3, 6, 23, 0)));
        assert!(w.contains(at(2026, 3, 7, 6, 59)));
        assert!(!w.contains(at(2026, 3, 7, 23, 0)));
        assert!(!w.contains(at(2026, 3, 6, 6, 0)));
    }

    #[test]
    fn test_quiet_hours_offset() {
        let w = QuietHours {
            start: "09:00".into(),
            end: "10:00".into(),
            days: vec![],
            utc_offset_minutes: 120,
        };
        assert!(w.contains(at(2026, 3, 4, 7, 30)));
        assert!(!w.contains(at(2026, 3, 4, 9, 30)));
    }

    #[test]
    fn test_patch_reports_every_bad_field() {
        let err = ProfilePatch::from_json(&json!({
            "level": "LOUD",
            "channels": {"push": "yes", "pager": true},
            "autonomy": 3,
            "color": "blue"
        }))
        .unwrap_err();
        match err {
            gatekeeper_core::GateError::Validation(fields) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert!(names.contains(&"level"));
                assert!(names.contains(&"channels.push"));
                assert!(names.contains(&"channels.pager"));
                assert!(names.contains(&"autonomy"));
                assert!(names.contains(&"color"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_patch_merges_channels() {
        let patch = ProfilePatch::from_json(&json!({
            "level": "SILENT",
            "channels": {"sms": true}
        }))
        .unwrap();
        let mut profile = AttentionProfile::default_for("u1", AutonomyTier::None, at(2026, 1, 1, 0, 0));
        patch.apply(&mut profile);
        assert_eq!(profile.level, AttentionLevel::DoNotDisturb);
        assert!(profile.channels.sms);
        assert!(profile.channels.email);
    }

    #[test]
    fn test_patch_quiet_hours_validation() {
        let err = ProfilePatch::from_json(&json!({
            "quietHours": [{"start": "25:00", "end": "07:00", "days": [0]}]
        }))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("quietHours[0].start"));
        assert!(msg.contains("quietHours[0].days[0]"));

        let ok = ProfilePatch::from_json(&json!({
            "quiet_hours": [{"start": "22:00", "end": "07:00", "days": [5, 5, 1], "utc_offset_minutes": -300}]
        }))
        .unwrap();
        let windows = ok.quiet_hours.unwrap();
        assert_eq!(windows[0].days, vec![1, 5]);
        assert_eq!(windows[0].utc_offset_minutes, -300);
    }

    #[test]
    fn test_non_object_body_rejected() {
        assert!(ProfilePatch::from_json(&json!(["level"])).is_err());
        assert!(ProfilePatch::from_json(&json!({})).unwrap().is_empty());
    }
}
