//! Creator trust: negative signals, shadow-ban verdicts and daily decay.
//!
//! The rules are pure functions over [`CreatorTrustScore`] so they can be
//! tested without storage. [`CreatorTrustScoreManager`] applies them with an
//! optimistic compare-and-swap on the record version.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TrustPolicy;
use crate::db::CreatorTrustRepository;
use crate::error::{AppError, Result};
use crate::metrics::distribution as dist_metrics;
use crate::models::trust::SETTLE_EPSILON;
use crate::models::{CreatorTrustScore, NegativeSignal, TrustVerdict};

const MAX_CAS_ATTEMPTS: usize = 8;

/// Whether these scores warrant a shadow ban
pub fn should_shadow_ban(trust_score: f64, spam_signals: f64, policy: &TrustPolicy) -> bool {
    trust_score < policy.trust_threshold || spam_signals > policy.spam_threshold
}

/// Record after one negative signal. Crossing into a ban, or any signal while
/// banned, (re)starts the cooldown.
pub fn apply_signal(
    record: &CreatorTrustScore,
    signal: &NegativeSignal,
    policy: &TrustPolicy,
    now: DateTime<Utc>,
) -> CreatorTrustScore {
    let mut next = record.clone();

    match signal {
        NegativeSignal::Report(reason) => {
            let severity = reason.severity();
            next.spam_signals += policy.report_spam_weight * severity;
            next.report_weight += policy.report_weight_step * severity;
            next.trust_score -= policy.report_trust_penalty * severity;
        }
        NegativeSignal::SkipPattern { skip_rate } => {
            let rate = if skip_rate.is_finite() {
                skip_rate.clamp(0.0, 1.0)
            } else {
                0.0
            };
            next.spam_signals += policy.skip_spam_weight * rate;
            next.trust_score -= policy.skip_trust_penalty * rate;
        }
    }

    next.trust_score = next.trust_score.clamp(0.0, 1.0);
    next.spam_signals = next.spam_signals.clamp(0.0, 1.0);
    next.report_weight = next.report_weight.clamp(0.0, 1.0);
    next.last_negative_signal_at = Some(now);
    next.updated_at = now;

    if should_shadow_ban(next.trust_score, next.spam_signals, policy) || next.is_shadow_banned {
        next.is_shadow_banned = true;
        next.shadow_ban_expires_at = Some(now + Duration::hours(policy.ban_cooldown_hours));
    }

    next
}

/// One daily decay cycle. Spam and report weight shrink geometrically; trust
/// relaxes toward neutral only after a quiet period. Never changes the ban flag.
pub fn decay(record: &CreatorTrustScore, policy: &TrustPolicy, now: DateTime<Utc>) -> CreatorTrustScore {
    let mut next = record.clone();

    next.spam_signals = settle(next.spam_signals * policy.spam_decay_factor, 0.0);
    next.report_weight = settle(next.report_weight * policy.spam_decay_factor, 0.0);

    let quiet_since = now - Duration::hours(policy.quiet_period_hours);
    let quiet = record
        .last_negative_signal_at
        .map_or(true, |at| at <= quiet_since);
    if quiet {
        let relaxed =
            next.trust_score + (policy.neutral_score - next.trust_score) * policy.recovery_rate;
        next.trust_score = settle(relaxed, policy.neutral_score).clamp(0.0, 1.0);
    }

    next.updated_at = now;
    next
}

/// A ban may be lifted once its cooldown elapsed and the scores recovered
pub fn ban_expired(record: &CreatorTrustScore, policy: &TrustPolicy, now: DateTime<Utc>) -> bool {
    record.is_shadow_banned
        && record.shadow_ban_expires_at.map_or(true, |at| at <= now)
        && !should_shadow_ban(record.trust_score, record.spam_signals, policy)
}

fn settle(value: f64, rest: f64) -> f64 {
    if (value - rest).abs() < SETTLE_EPSILON {
        rest
    } else {
        value
    }
}

pub struct CreatorTrustScoreManager {
    repo: Arc<dyn CreatorTrustRepository>,
    policy: TrustPolicy,
}

impl CreatorTrustScoreManager {
    pub fn new(repo: Arc<dyn CreatorTrustRepository>, policy: TrustPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Create the neutral record if none exists. Safe to call on every post.
    pub async fn initialize_creator_trust_score(&self, user_id: Uuid) -> Result<bool> {
        let record = CreatorTrustScore::neutral(user_id, self.policy.neutral_score, Utc::now());
        let created = self.repo.insert_if_absent(&record).await?;
        if created {
            info!(user_id = %user_id, "creator trust record created");
        }
        Ok(created)
    }

    /// Apply a negative signal, creating the record first if needed
    pub async fn record_signal(
        &self,
        user_id: Uuid,
        signal: NegativeSignal,
        now: DateTime<Utc>,
    ) -> Result<CreatorTrustScore> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = match self.repo.get(user_id).await? {
                Some(record) => record,
                None => {
                    let fresh = CreatorTrustScore::neutral(user_id, self.policy.neutral_score, now);
                    self.repo.insert_if_absent(&fresh).await?;
                    continue;
                }
            };

            let mut next = apply_signal(&current, &signal, &self.policy, now);
            if !self.repo.compare_and_swap(&next, current.version).await? {
                continue;
            }
            next.version = current.version + 1;

            dist_metrics::record_trust_signal(signal.kind());
            if next.is_shadow_banned && !current.is_shadow_banned {
                dist_metrics::record_shadow_ban("banned", 1);
                warn!(
                    user_id = %user_id,
                    trust_score = next.trust_score,
                    spam_signals = next.spam_signals,
                    signal = signal.kind(),
                    "creator shadow banned"
                );
            }
            return Ok(next);
        }

        Err(AppError::Internal(format!(
            "trust record for {} too contended to update",
            user_id
        )))
    }

    /// Current gate for one creator; a creator without a record is not banned
    pub async fn verdict(&self, user_id: Uuid) -> Result<TrustVerdict> {
        let verdict = match self.repo.get(user_id).await? {
            Some(record) => record.verdict(),
            None => CreatorTrustScore::neutral(user_id, self.policy.neutral_score, Utc::now())
                .verdict(),
        };
        Ok(verdict)
    }

    pub async fn shadow_banned_among(&self, user_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.repo.shadow_banned_among(user_ids).await
    }

    /// Daily decay across all creators; returns records changed
    pub async fn decay_spam_signals(&self, now: DateTime<Utc>) -> Result<u64> {
        let changed = self.repo.decay_all(&self.policy, now).await?;
        info!(changed, "creator spam signals decayed");
        Ok(changed)
    }

    /// Lift bans whose cooldown elapsed and whose scores recovered
    pub async fn check_expired_shadow_bans(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let lifted = self.repo.lift_expired_bans(&self.policy, now).await?;
        if !lifted.is_empty() {
            dist_metrics::record_shadow_ban("lifted", lifted.len() as u64);
            info!(count = lifted.len(), "expired shadow bans lifted");
        }
        Ok(lifted)
    }
}
