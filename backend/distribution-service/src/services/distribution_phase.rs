//! Phased distribution: TEST → SCALE → BLAST.
//!
//! [`next_phase`] is the whole rule set and has no I/O. The controller feeds
//! it fresh scores and trust verdicts during the periodic sweep and persists
//! promotions with a compare-and-swap on the current phase.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PhaseConfig;
use crate::db::PostMetricsRepository;
use crate::error::{AppError, Result};
use crate::metrics::distribution as dist_metrics;
use crate::models::{DistributionPhase, NegativeSignal, PostMetrics};
use crate::services::creator_trust::CreatorTrustScoreManager;
use crate::services::metrics_aggregator::MetricsAggregator;

/// Inputs for one phase evaluation
#[derive(Debug, Clone, Copy)]
pub struct PhaseInputs {
    pub viral_score: f64,
    pub total_views: i64,
    pub author_shadow_banned: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseThresholds {
    pub scale_threshold: f64,
    pub blast_threshold: f64,
    pub min_views_for_scale: i64,
}

impl From<&PhaseConfig> for PhaseThresholds {
    fn from(config: &PhaseConfig) -> Self {
        Self {
            scale_threshold: config.scale_threshold,
            blast_threshold: config.blast_threshold,
            min_views_for_scale: config.min_views_for_scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    Hold,
    Promote {
        from: DistributionPhase,
        to: DistributionPhase,
    },
    /// Author is shadow banned; the post neither advances nor regresses
    Frozen,
}

/// At most one step forward per evaluation
pub fn next_phase(
    current: DistributionPhase,
    inputs: PhaseInputs,
    thresholds: &PhaseThresholds,
) -> PhaseTransition {
    if inputs.author_shadow_banned {
        return PhaseTransition::Frozen;
    }

    let promote = match current {
        DistributionPhase::Test => {
            inputs.viral_score >= thresholds.scale_threshold
                && inputs.total_views >= thresholds.min_views_for_scale
        }
        DistributionPhase::Scale => inputs.viral_score >= thresholds.blast_threshold,
        DistributionPhase::Blast => false,
    };

    match current.next() {
        Some(to) if promote => PhaseTransition::Promote { from: current, to },
        _ => PhaseTransition::Hold,
    }
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: u64,
    pub rescored: u64,
    pub promoted_to_scale: u64,
    pub promoted_to_blast: u64,
    pub frozen: u64,
    pub skip_signals: u64,
    /// Posts held back because the creation hook has not attached an author yet
    pub unattributed: u64,
    pub failed: u64,
}

pub struct DistributionPhaseController {
    metrics: Arc<dyn PostMetricsRepository>,
    aggregator: Arc<MetricsAggregator>,
    trust: Arc<CreatorTrustScoreManager>,
    config: PhaseConfig,
}

impl DistributionPhaseController {
    pub fn new(
        metrics: Arc<dyn PostMetricsRepository>,
        aggregator: Arc<MetricsAggregator>,
        trust: Arc<CreatorTrustScoreManager>,
        config: PhaseConfig,
    ) -> Self {
        Self {
            metrics,
            aggregator,
            trust,
            config,
        }
    }

    pub fn thresholds(&self) -> PhaseThresholds {
        PhaseThresholds::from(&self.config)
    }

    /// Evaluate recently active TEST and SCALE posts. One post failing never
    /// stops the rest.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let active_since = now - Duration::hours(self.config.sweep_window_hours);
        let candidates = self
            .metrics
            .sweep_candidates(active_since, self.config.sweep_batch_size)
            .await?;

        let mut report = SweepReport::default();
        for mut post in candidates {
            report.checked += 1;
            if let Err(e) = self.evaluate(&mut post, now, &mut report).await {
                report.failed += 1;
                warn!(post_id = %post.post_id, error = %e, "phase evaluation failed");
            }
        }

        info!(
            checked = report.checked,
            promoted_to_scale = report.promoted_to_scale,
            promoted_to_blast = report.promoted_to_blast,
            frozen = report.frozen,
            unattributed = report.unattributed,
            failed = report.failed,
            "distribution sweep finished"
        );
        Ok(report)
    }

    async fn evaluate(
        &self,
        post: &mut PostMetrics,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if self.aggregator.rescore(post, now).await {
            report.rescored += 1;
        } else {
            post.viral_score = self.aggregator.calculator().score(post, now);
        }

        let Some(author_id) = post.author_id else {
            report.unattributed += 1;
            debug!(post_id = %post.post_id, "post has no author yet, phase held");
            return Ok(());
        };

        let verdict = self.trust.verdict(author_id).await?;
        self.raise_skip_signal(post, author_id, now, report).await?;

        let inputs = PhaseInputs {
            viral_score: post.viral_score,
            total_views: post.total_views,
            author_shadow_banned: verdict.is_shadow_banned,
        };

        match next_phase(post.distribution_phase, inputs, &self.thresholds()) {
            PhaseTransition::Hold => {}
            PhaseTransition::Frozen => report.frozen += 1,
            PhaseTransition::Promote { from, to } => {
                if self.metrics.transition_phase(post.post_id, from, to).await? {
                    post.distribution_phase = to;
                    dist_metrics::record_phase_transition(from.as_str(), to.as_str());
                    match to {
                        DistributionPhase::Scale => report.promoted_to_scale += 1,
                        DistributionPhase::Blast => report.promoted_to_blast += 1,
                        DistributionPhase::Test => {}
                    }
                    info!(
                        post_id = %post.post_id,
                        from = from.as_str(),
                        to = to.as_str(),
                        viral_score = post.viral_score,
                        "post promoted"
                    );
                }
            }
        }

        Ok(())
    }

    /// A post whose viewers overwhelmingly skip it counts once against its
    /// author. The claim is released when the trust update fails so the next
    /// sweep tries again.
    async fn raise_skip_signal(
        &self,
        post: &mut PostMetrics,
        author_id: Uuid,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if post.skip_signal_raised
            || post.total_views < self.config.skip_signal_min_views
            || post.skip_rate <= self.config.skip_signal_rate
        {
            return Ok(());
        }

        if !self.metrics.mark_skip_signal(post.post_id).await? {
            return Ok(());
        }

        let recorded = self
            .trust
            .record_signal(
                author_id,
                NegativeSignal::SkipPattern {
                    skip_rate: post.skip_rate,
                },
                now,
            )
            .await;

        if let Err(e) = recorded {
            if let Err(release_err) = self.metrics.release_skip_signal(post.post_id).await {
                warn!(post_id = %post.post_id, error = %release_err, "skip signal claim could not be released");
            }
            return Err(e);
        }

        post.skip_signal_raised = true;
        report.skip_signals += 1;
        Ok(())
    }

    /// Send a post back to TEST after abuse. The only sanctioned regression.
    pub async fn reset_to_test(&self, post_id: Uuid, reason: &str) -> Result<DistributionPhase> {
        let post = self
            .metrics
            .get(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("metrics for post {}", post_id)))?;

        let from = post.distribution_phase;
        if from == DistributionPhase::Test {
            return Ok(from);
        }

        if !self
            .metrics
            .transition_phase(post_id, from, DistributionPhase::Test)
            .await?
        {
            return Err(AppError::Internal(format!(
                "phase of post {} changed during reset",
                post_id
            )));
        }

        dist_metrics::record_phase_transition(from.as_str(), DistributionPhase::Test.as_str());
        warn!(post_id = %post_id, from = from.as_str(), reason, "post reset to TEST");
        Ok(from)
    }
}
