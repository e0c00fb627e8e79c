use chrono::{DateTime, Utc};
use gatekeeper_core::{AttentionLevel, Channel};
use gatekeeper_store::AttentionProfile;

/// Channels a suggestion should be announced on: the profile's enabled
/// channels minus those its level mutes. Quiet hours count as do-not-disturb.
pub fn route(profile: &AttentionProfile, now: DateTime<Utc>) -> Vec<Channel> {
    let level = profile.effective_level(now);
    filter(profile.channels.enabled(), level)
}

fn filter(channels: Vec<Channel>, level: AttentionLevel) -> Vec<Channel> {
    channels
        .into_iter()
        .filter(|c| !level.suppresses(*c))
        .collect()
}
