#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use gatekeeper_core::*;

    // ── Autonomy tiers ─────────────────────────────────────────

    #[test]
    fn test_tier_ordering() {
        assert!(AutonomyTier::None < AutonomyTier::SuggestOnly);
        assert!(AutonomyTier::SuggestOnly < AutonomyTier::AutoLow);
        assert!(AutonomyTier::AutoLow < AutonomyTier::AutoFull);
        assert_eq!(
            AutonomyTier::AutoFull.min(AutonomyTier::SuggestOnly),
            AutonomyTier::SuggestOnly
        );
    }

    #[test]
    fn test_tier_list_is_ordered() {
        assert!(AutonomyTier::ALL.windows(2).all(|w| w[0] < w[1]));
        assert!(AutonomyTier::ALL.iter().all(|t| !t.description().is_empty()));
    }

    #[test]
    fn test_tier_wire_format() {
        let json = serde_json::to_string(&AutonomyTier::SuggestOnly).unwrap();
        assert_eq!(json, "\"SUGGEST_ONLY\"");
        let tier: AutonomyTier = serde_json::from_str("\"AUTO_FULL\"").unwrap();
        assert_eq!(tier, AutonomyTier::AutoFull);
        assert_eq!(AutonomyTier::parse("auto_low"), Some(AutonomyTier::AutoLow));
        assert_eq!(AutonomyTier::parse("FULL"), None);
    }

    // ── Attention levels ───────────────────────────────────────

    #[test]
    fn test_level_legacy_aliases() {
        let level: AttentionLevel = serde_json::from_str("\"BALANCED\"").unwrap();
        assert_eq!(level, AttentionLevel::Normal);
        let level: AttentionLevel = serde_json::from_str("\"SILENT\"").unwrap();
        assert_eq!(level, AttentionLevel::DoNotDisturb);
        assert_eq!(AttentionLevel::parse("silent"), Some(AttentionLevel::DoNotDisturb));
    }

    #[test]
    fn test_do_not_disturb_keeps_only_inapp_and_email() {
        let dnd = AttentionLevel::DoNotDisturb;
        let kept: Vec<_> = Channel::ALL
            .into_iter()
            .filter(|c| !dnd.suppresses(*c))
            .collect();
        assert_eq!(kept, vec![Channel::Email, Channel::Inapp]);
    }

    #[test]
    fn test_focused_mutes_push_and_sms() {
        let focused = AttentionLevel::Focused;
        assert!(focused.suppresses(Channel::Push));
        assert!(focused.suppresses(Channel::Sms));
        assert!(!focused.suppresses(Channel::Whatsapp));
        assert!(!AttentionLevel::Normal.suppresses(Channel::Push));
    }

    // ── Channels ───────────────────────────────────────────────

    #[test]
    fn test_channel_defaults() {
        let channels = Channels::default();
        assert_eq!(
            channels.enabled(),
            vec![Channel::Email, Channel::Push, Channel::Inapp]
        );
    }

    #[test]
    fn test_channel_set() {
        let mut channels = Channels::default();
        channels.set(Channel::Push, false);
        channels.set(Channel::Sms, true);
        assert!(!channels.is_enabled(Channel::Push));
        assert!(channels.is_enabled(Channel::Sms));
    }

    // ── Verdicts and reasons ───────────────────────────────────

    #[test]
    fn test_verdict_permissiveness_order() {
        assert!(Verdict::Block.permissiveness() < Verdict::LogOnly.permissiveness());
        assert!(Verdict::LogOnly.permissiveness() < Verdict::Suggest.permissiveness());
        assert!(Verdict::Suggest.permissiveness() < Verdict::Execute.permissiveness());
    }

    #[test]
    fn test_verdict_and_reason_wire_format() {
        assert_eq!(serde_json::to_string(&Verdict::LogOnly).unwrap(), "\"LOG_ONLY\"");
        assert_eq!(
            serde_json::to_string(&ReasonCode::ForbiddenAction).unwrap(),
            "\"forbidden_action\""
        );
        for v in Verdict::ALL {
            assert_eq!(Verdict::parse(v.as_str()), Some(v));
        }
        assert_eq!(
            ReasonCode::parse("rate_limit_exceeded"),
            Some(ReasonCode::RateLimitExceeded)
        );
    }

    // ── Roles ──────────────────────────────────────────────────

    #[test]
    fn test_admin_roles() {
        assert!(Role::CompanyAdmin.is_admin());
        assert!(Role::SuperAdmin.is_admin());
        assert!(!Role::Supervisor.is_admin());
        assert_eq!(Role::parse("company_admin"), Some(Role::CompanyAdmin));
        assert_eq!(Role::parse("root"), None);
    }

    // ── Clock ──────────────────────────────────────────────────

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(2));
        assert_eq!(
            clock.now(),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 1, 0).unwrap()
        );
    }

    // ── Errors ─────────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = GateError::Forbidden("company admin role required".into());
        assert!(err.to_string().contains("company admin role required"));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: GateError = serde_err.into();
        assert!(matches!(err, GateError::Serialization(_)));
    }
}
