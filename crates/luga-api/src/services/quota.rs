//! Quota gating and metering shared by the text, voice and video endpoints.

use luga_clients::Mailer;
use luga_firestore::QuotaRepository;
use luga_models::{Quota, QuotaCharge, QuotaKind, UNLIMITED};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Balance fields returned alongside every metered response.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeSummary {
    /// `None` when the resource is unlimited.
    pub remaining_quota: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

impl From<&QuotaCharge> for ChargeSummary {
    fn from(charge: &QuotaCharge) -> Self {
        Self {
            remaining_quota: charge.remaining(),
            warning: charge.warning(),
        }
    }
}

#[derive(Clone)]
pub struct QuotaService {
    quotas: QuotaRepository,
    mailer: Mailer,
}

impl QuotaService {
    pub fn new(quotas: QuotaRepository, mailer: Mailer) -> Self {
        Self { quotas, mailer }
    }

    pub async fn balance(&self, user_id: &str) -> ApiResult<Quota> {
        Ok(self.quotas.get(user_id).await?)
    }

    /// Reject with `quota_exceeded` unless `amount` of `kind` can be served.
    pub async fn ensure(&self, user_id: &str, kind: QuotaKind, amount: i64) -> ApiResult<Quota> {
        let quota = self.balance(user_id).await?;
        if let Err(shortfall) = quota.ensure_available(kind, amount) {
            info!(user_id = %user_id, reason = %shortfall, "Request blocked by quota");
            metrics::record_quota_rejection(kind);
            return Err(ApiError::quota_exceeded());
        }
        Ok(quota)
    }

    /// Gate a new lip-sync job: video seconds left and a free concurrency slot.
    pub async fn ensure_job_slot(&self, user_id: &str, active_jobs: usize) -> ApiResult<Quota> {
        let quota = self.balance(user_id).await?;
        let check = if quota.has_any(QuotaKind::Video) {
            quota.ensure_slot(active_jobs as i64)
        } else {
            quota.ensure_available(QuotaKind::Video, 1)
        };

        if let Err(shortfall) = check {
            info!(user_id = %user_id, reason = %shortfall, "Lip-sync job blocked by quota");
            metrics::record_quota_rejection(shortfall.kind());
            return Err(ApiError::quota_exceeded());
        }
        Ok(quota)
    }

    /// Deduct `amount` and, when the balance turns low, notify `email` in the background.
    pub async fn charge(
        &self,
        user_id: &str,
        email: Option<&str>,
        kind: QuotaKind,
        amount: i64,
    ) -> ApiResult<QuotaCharge> {
        let charge = self.quotas.deduct(user_id, kind, amount).await?;
        metrics::record_quota_deducted(kind, charge.charged);

        // Only warn on the charge that crosses the threshold.
        let crossed = charge.low_warning && charge.charged > 0 && !was_low(&charge);
        if crossed {
            metrics::record_low_quota_warning(kind);
            if let Some(email) = email {
                let mailer = self.mailer.clone();
                let email = email.to_string();
                tokio::spawn(async move {
                    if let Err(e) = mailer.send_low_quota_notice(&email, kind).await {
                        warn!(error = %e, kind = %kind, "Failed to send low quota notice");
                    }
                });
            }
        }

        Ok(charge)
    }
}

fn was_low(charge: &QuotaCharge) -> bool {
    charge.before != UNLIMITED
        && charge
            .kind
            .low_threshold()
            .is_some_and(|threshold| charge.before.max(0) <= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(kind: QuotaKind, before: i64, amount: i64) -> QuotaCharge {
        let mut quota = Quota::new(before, before, before, 1);
        quota.deduct(kind, amount)
    }

    #[test]
    fn test_summary_for_limited_and_unlimited() {
        let summary = ChargeSummary::from(&charge(QuotaKind::Text, 12, 2));
        assert_eq!(summary.remaining_quota, Some(10));
        assert!(summary.warning.is_some());

        let summary = ChargeSummary::from(&charge(QuotaKind::Text, -1, 2));
        assert_eq!(summary.remaining_quota, None);
        assert!(summary.warning.is_none());
    }

    #[test]
    fn test_threshold_crossing() {
        // 70 -> 50 crosses the 60 s audio threshold.
        assert!(!was_low(&charge(QuotaKind::Audio, 70, 20)));
        assert!(charge(QuotaKind::Audio, 70, 20).low_warning);
        // Already low before the charge.
        assert!(was_low(&charge(QuotaKind::Audio, 50, 5)));
    }
}
