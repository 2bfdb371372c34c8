//! Viral score: weighted engagement scaled by freshness and view velocity.
//!
//! ```text
//! base  = wc·completion + wr·replay + wv·save + ws·share − wk·skip
//! boost = 1 + fb·2^(−age/halfLife) + vb·min(1, ln(1+vph)/ln(1+saturation))
//! score = max(0, base · boost)
//! ```
//! where `vph = totalViews / max(ageHours, 1)`.

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::models::PostMetrics;

#[derive(Debug, Clone)]
pub struct ViralScoreCalculator {
    config: ScoringConfig,
}

impl ViralScoreCalculator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, metrics: &PostMetrics, now: DateTime<Utc>) -> f64 {
        let age_hours = metrics.age_hours(now);
        let score = self.engagement(metrics) * self.boost(age_hours, metrics.total_views);
        if score.is_finite() {
            score.max(0.0)
        } else {
            0.0
        }
    }

    /// Weighted engagement before any boost. May be negative.
    pub fn engagement(&self, m: &PostMetrics) -> f64 {
        let c = &self.config;
        c.completion_weight * m.completion_rate
            + c.replay_weight * m.replay_rate
            + c.save_weight * m.save_rate
            + c.share_weight * m.share_rate
            - c.skip_weight * m.skip_rate
    }

    /// Multiplier ≥ 1
    pub fn boost(&self, age_hours: f64, total_views: i64) -> f64 {
        let c = &self.config;
        let age_hours = age_hours.max(0.0);

        let freshness = 2f64.powf(-age_hours / c.freshness_half_life_hours);

        let views_per_hour = total_views.max(0) as f64 / age_hours.max(1.0);
        let velocity = ((1.0 + views_per_hour).ln() / (1.0 + c.velocity_saturation).ln()).min(1.0);

        1.0 + c.freshness_boost * freshness + c.velocity_boost * velocity
    }
}
