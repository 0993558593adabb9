//! Per-resource usage quotas.
//!
//! Every user carries four counters. Text is metered in request units,
//! audio and video in seconds of generated media, and `process_video`
//! caps how many lip-sync jobs may run at once. A counter of `-1` means
//! the plan is unlimited for that resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Sentinel for an unlimited counter.
pub const UNLIMITED: i64 = -1;

/// Remaining text units at or below which a warning is attached.
pub const TEXT_LOW_THRESHOLD: i64 = 10;

/// Remaining seconds at or below which audio/video warnings are attached.
pub const MEDIA_LOW_THRESHOLD_SECS: i64 = 60;

/// Metered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Text,
    Audio,
    Video,
    ProcessVideo,
}

impl QuotaKind {
    pub const ALL: [QuotaKind; 4] = [
        QuotaKind::Text,
        QuotaKind::Audio,
        QuotaKind::Video,
        QuotaKind::ProcessVideo,
    ];

    /// Field name on the stored quota map.
    pub fn field_name(&self) -> &'static str {
        match self {
            QuotaKind::Text => "text_quota",
            QuotaKind::Audio => "audio_quota",
            QuotaKind::Video => "video_quota",
            QuotaKind::ProcessVideo => "process_video_quota",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Text => "text",
            QuotaKind::Audio => "audio",
            QuotaKind::Video => "video",
            QuotaKind::ProcessVideo => "process_video",
        }
    }

    /// Remaining amount at or below which the user gets a warning.
    pub fn low_threshold(&self) -> Option<i64> {
        match self {
            QuotaKind::Text => Some(TEXT_LOW_THRESHOLD),
            QuotaKind::Audio | QuotaKind::Video => Some(MEDIA_LOW_THRESHOLD_SECS),
            QuotaKind::ProcessVideo => None,
        }
    }

    pub fn warning_message(&self) -> &'static str {
        match self {
            QuotaKind::Text => "Your text quota is running low.",
            QuotaKind::Audio => "Your audio quota is running low.",
            QuotaKind::Video => "Your video quota is running low.",
            QuotaKind::ProcessVideo => "You are using all of your concurrent video jobs.",
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a request cannot be served from the current balance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaShortfall {
    #[error("{kind} quota exhausted")]
    Exhausted { kind: QuotaKind },

    #[error("{kind} quota too low: {requested} requested, {remaining} remaining")]
    Insufficient {
        kind: QuotaKind,
        requested: i64,
        remaining: i64,
    },

    #[error("concurrent job limit reached ({active}/{limit})")]
    ConcurrencyLimit { active: i64, limit: i64 },
}

impl QuotaShortfall {
    pub fn kind(&self) -> QuotaKind {
        match self {
            QuotaShortfall::Exhausted { kind } | QuotaShortfall::Insufficient { kind, .. } => *kind,
            QuotaShortfall::ConcurrencyLimit { .. } => QuotaKind::ProcessVideo,
        }
    }
}

/// Outcome of a deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuotaCharge {
    pub kind: QuotaKind,
    /// Balance before the charge (`-1` when unlimited).
    pub before: i64,
    /// Balance after the charge (`-1` when unlimited).
    pub after: i64,
    /// Amount actually taken off the balance.
    pub charged: i64,
    /// Whether the balance is now at or below the warning threshold.
    pub low_warning: bool,
}

impl QuotaCharge {
    /// Warning text to surface to the user, if any.
    pub fn warning(&self) -> Option<&'static str> {
        self.low_warning.then(|| self.kind.warning_message())
    }

    /// Remaining balance, `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        (self.after != UNLIMITED).then_some(self.after)
    }
}

/// Quota balance stored on a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Quota {
    pub text_quota: i64,
    pub audio_quota: i64,
    pub video_quota: i64,
    pub process_video_quota: i64,
}

impl Default for Quota {
    fn default() -> Self {
        Self::for_tier(PlanTier::Free)
    }
}

impl Quota {
    /// Balance granted when a plan is purchased.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self::new(10, 0, 0, 0),
            PlanTier::TestLeap => Self::new(10, 300, 0, 0),
            PlanTier::Demo => Self::new(10, 300, 300, 1),
            PlanTier::Starter => Self::new(UNLIMITED, 3_600, 3_600, 1),
            PlanTier::Creator => Self::new(UNLIMITED, 14_400, 14_400, 2),
            PlanTier::Team => Self::new(UNLIMITED, 32_400, 32_400, 5),
        }
    }

    pub fn new(text: i64, audio: i64, video: i64, process_video: i64) -> Self {
        Self {
            text_quota: text,
            audio_quota: audio,
            video_quota: video,
            process_video_quota: process_video,
        }
    }

    pub fn get(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::Text => self.text_quota,
            QuotaKind::Audio => self.audio_quota,
            QuotaKind::Video => self.video_quota,
            QuotaKind::ProcessVideo => self.process_video_quota,
        }
    }

    fn set(&mut self, kind: QuotaKind, value: i64) {
        match kind {
            QuotaKind::Text => self.text_quota = value,
            QuotaKind::Audio => self.audio_quota = value,
            QuotaKind::Video => self.video_quota = value,
            QuotaKind::ProcessVideo => self.process_video_quota = value,
        }
    }

    pub fn is_unlimited(&self, kind: QuotaKind) -> bool {
        self.get(kind) == UNLIMITED
    }

    /// Remaining balance, `None` when unlimited.
    pub fn remaining(&self, kind: QuotaKind) -> Option<i64> {
        let value = self.get(kind);
        (value != UNLIMITED).then_some(value.max(0))
    }

    /// True when anything is left (or the resource is unlimited).
    pub fn has_any(&self, kind: QuotaKind) -> bool {
        self.remaining(kind).map_or(true, |r| r > 0)
    }

    /// Check that `amount` can be served.
    ///
    /// A zero balance is always rejected. Non-zero balances must cover the
    /// requested amount in full.
    pub fn ensure_available(&self, kind: QuotaKind, amount: i64) -> Result<(), QuotaShortfall> {
        let Some(remaining) = self.remaining(kind) else {
            return Ok(());
        };
        if remaining == 0 {
            return Err(QuotaShortfall::Exhausted { kind });
        }
        if amount > remaining {
            return Err(QuotaShortfall::Insufficient {
                kind,
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }

    /// Check that another concurrent job may start.
    pub fn ensure_slot(&self, active_jobs: i64) -> Result<(), QuotaShortfall> {
        match self.remaining(QuotaKind::ProcessVideo) {
            None => Ok(()),
            Some(limit) if active_jobs < limit => Ok(()),
            Some(limit) => Err(QuotaShortfall::ConcurrencyLimit {
                active: active_jobs,
                limit,
            }),
        }
    }

    /// Take `amount` off the balance, saturating at zero.
    ///
    /// Unlimited balances are left untouched. `ProcessVideo` is a ceiling
    /// rather than a consumable counter and is never decremented.
    pub fn deduct(&mut self, kind: QuotaKind, amount: i64) -> QuotaCharge {
        let before = self.get(kind);
        let amount = amount.max(0);

        if before == UNLIMITED || kind == QuotaKind::ProcessVideo || amount == 0 {
            return QuotaCharge {
                kind,
                before,
                after: before,
                charged: 0,
                low_warning: self.is_low(kind),
            };
        }

        let current = before.max(0);
        let after = current.saturating_sub(amount).max(0);
        self.set(kind, after);

        QuotaCharge {
            kind,
            before,
            after,
            charged: current - after,
            low_warning: self.is_low(kind),
        }
    }

    /// Whether the balance sits at or below its warning threshold.
    pub fn is_low(&self, kind: QuotaKind) -> bool {
        match (self.remaining(kind), kind.low_threshold()) {
            (Some(remaining), Some(threshold)) => remaining <= threshold,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_quotas() {
        assert_eq!(Quota::for_tier(PlanTier::TestLeap).audio_quota, 300);
        assert_eq!(Quota::for_tier(PlanTier::Demo).video_quota, 300);

        let starter = Quota::for_tier(PlanTier::Starter);
        assert_eq!(starter.text_quota, UNLIMITED);
        assert_eq!(starter.audio_quota, 3_600);
        assert_eq!(starter.video_quota, 3_600);

        let creator = Quota::for_tier(PlanTier::Creator);
        assert_eq!(creator.audio_quota, 14_400);

        let team = Quota::for_tier(PlanTier::Team);
        assert_eq!(team.video_quota, 32_400);
        assert_eq!(team.process_video_quota, 5);
    }

    #[test]
    fn test_free_quota_is_default() {
        let quota = Quota::default();
        assert_eq!(quota, Quota::for_tier(PlanTier::Free));
        assert_eq!(quota.text_quota, 10);
        assert!(!quota.has_any(QuotaKind::Audio));
    }

    #[test]
    fn test_deduct_saturates_at_zero() {
        let mut quota = Quota::new(1, 0, 0, 0);
        let charge = quota.deduct(QuotaKind::Text, 2);
        assert_eq!(charge.before, 1);
        assert_eq!(charge.after, 0);
        assert_eq!(charge.charged, 1);
        assert_eq!(quota.text_quota, 0);
    }

    #[test]
    fn test_unlimited_is_never_decremented() {
        let mut quota = Quota::for_tier(PlanTier::Starter);
        let charge = quota.deduct(QuotaKind::Text, 2);
        assert_eq!(charge.charged, 0);
        assert_eq!(charge.after, UNLIMITED);
        assert_eq!(charge.remaining(), None);
        assert!(!charge.low_warning);
        assert_eq!(quota.text_quota, UNLIMITED);
    }

    #[test]
    fn test_zero_deduction_is_noop() {
        let mut quota = Quota::new(50, 100, 100, 1);
        let charge = quota.deduct(QuotaKind::Audio, 0);
        assert_eq!(charge.charged, 0);
        assert_eq!(quota.audio_quota, 100);
    }

    #[test]
    fn test_negative_deduction_is_ignored() {
        let mut quota = Quota::new(50, 100, 100, 1);
        quota.deduct(QuotaKind::Video, -30);
        assert_eq!(quota.video_quota, 100);
    }

    #[test]
    fn test_process_video_is_not_consumed() {
        let mut quota = Quota::new(10, 10, 10, 2);
        quota.deduct(QuotaKind::ProcessVideo, 1);
        assert_eq!(quota.process_video_quota, 2);
    }

    #[test]
    fn test_low_warning_thresholds() {
        let mut quota = Quota::new(12, 100, 61, 1);

        assert!(!quota.deduct(QuotaKind::Text, 1).low_warning);
        let charge = quota.deduct(QuotaKind::Text, 1);
        assert!(charge.low_warning);
        assert_eq!(charge.warning(), Some("Your text quota is running low."));

        assert!(quota.deduct(QuotaKind::Audio, 40).low_warning);
        assert!(quota.deduct(QuotaKind::Video, 1).low_warning);
    }

    #[test]
    fn test_ensure_available() {
        let quota = Quota::new(0, 30, UNLIMITED, 1);

        assert_eq!(
            quota.ensure_available(QuotaKind::Text, 1),
            Err(QuotaShortfall::Exhausted { kind: QuotaKind::Text })
        );
        assert!(quota.ensure_available(QuotaKind::Audio, 30).is_ok());
        assert_eq!(
            quota.ensure_available(QuotaKind::Audio, 31),
            Err(QuotaShortfall::Insufficient {
                kind: QuotaKind::Audio,
                requested: 31,
                remaining: 30
            })
        );
        assert!(quota.ensure_available(QuotaKind::Video, 1_000_000).is_ok());
    }

    #[test]
    fn test_negative_balance_counts_as_exhausted() {
        let quota = Quota::new(-5, 0, 0, 0);
        assert!(!quota.is_unlimited(QuotaKind::Text));
        assert_eq!(quota.remaining(QuotaKind::Text), Some(0));
        assert!(quota.ensure_available(QuotaKind::Text, 1).is_err());
    }

    #[test]
    fn test_ensure_slot() {
        let quota = Quota::new(0, 0, 100, 2);
        assert!(quota.ensure_slot(0).is_ok());
        assert!(quota.ensure_slot(1).is_ok());
        let err = quota.ensure_slot(2).unwrap_err();
        assert_eq!(err, QuotaShortfall::ConcurrencyLimit { active: 2, limit: 2 });
        assert_eq!(err.kind(), QuotaKind::ProcessVideo);

        let unlimited = Quota::new(0, 0, 0, UNLIMITED);
        assert!(unlimited.ensure_slot(100).is_ok());
    }

    #[test]
    fn test_field_names() {
        let json = serde_json::to_value(Quota::new(1, 2, 3, 4)).unwrap();
        for kind in QuotaKind::ALL {
            assert!(json.get(kind.field_name()).is_some());
        }
    }
}
