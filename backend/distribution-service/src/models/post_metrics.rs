use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::watch_event::ViewSample;

/// Exposure tier of a post. Ordered: TEST < SCALE < BLAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistributionPhase {
    Test,
    Scale,
    Blast,
}

impl DistributionPhase {
    pub const ALL: [DistributionPhase; 3] = [
        DistributionPhase::Test,
        DistributionPhase::Scale,
        DistributionPhase::Blast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionPhase::Test => "TEST",
            DistributionPhase::Scale => "SCALE",
            DistributionPhase::Blast => "BLAST",
        }
    }

    /// The tier a promotion leads to, `None` for the terminal tier
    pub fn next(&self) -> Option<DistributionPhase> {
        match self {
            DistributionPhase::Test => Some(DistributionPhase::Scale),
            DistributionPhase::Scale => Some(DistributionPhase::Blast),
            DistributionPhase::Blast => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl Default for DistributionPhase {
    fn default() -> Self {
        DistributionPhase::Test
    }
}

impl fmt::Display for DistributionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEST" => Ok(DistributionPhase::Test),
            "SCALE" => Ok(DistributionPhase::Scale),
            "BLAST" => Ok(DistributionPhase::Blast),
            other => Err(format!("unknown distribution phase: {}", other)),
        }
    }
}

/// Per-post aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetrics {
    pub post_id: Uuid,
    /// `None` until the creation hook lands for a post whose views arrived first
    pub author_id: Option<Uuid>,
    pub viral_score: f64,
    pub distribution_phase: DistributionPhase,
    pub total_views: i64,
    pub unique_views: i64,
    pub avg_watch_time: f64,
    pub completion_rate: f64,
    pub replay_rate: f64,
    pub save_rate: f64,
    pub share_rate: f64,
    pub skip_rate: f64,
    pub skip_signal_raised: bool,
    pub post_created_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PostMetrics {
    /// Zeroed metrics for a freshly created post
    pub fn new(post_id: Uuid, author_id: Uuid, post_created_at: DateTime<Utc>) -> Self {
        Self {
            author_id: Some(author_id),
            ..Self::unattributed(post_id, post_created_at)
        }
    }

    /// Row created by a view that beat the creation hook. The first view's
    /// time stands in for the creation time until the hook replaces it.
    pub fn unattributed(post_id: Uuid, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            post_id,
            author_id: None,
            viral_score: 0.0,
            distribution_phase: DistributionPhase::Test,
            total_views: 0,
            unique_views: 0,
            avg_watch_time: 0.0,
            completion_rate: 0.0,
            replay_rate: 0.0,
            save_rate: 0.0,
            share_rate: 0.0,
            skip_rate: 0.0,
            skip_signal_raised: false,
            post_created_at: first_seen_at,
            last_event_at: None,
            updated_at: first_seen_at,
        }
    }

    /// Fold one view into the running means.
    ///
    /// This is the in-memory form of the single-statement update the
    /// PostgreSQL repository issues; both must stay in step.
    pub fn apply(&mut self, sample: &ViewSample, first_view: bool) {
        self.total_views += 1;
        if first_view {
            self.unique_views += 1;
        }
        let n = self.total_views;

        self.avg_watch_time = running_mean(self.avg_watch_time, sample.watch_duration, n).max(0.0);
        self.completion_rate = running_rate(self.completion_rate, sample.completion_rate, n);
        self.replay_rate = running_rate(self.replay_rate, indicator(sample.replayed), n);
        self.save_rate = running_rate(self.save_rate, indicator(sample.saved), n);
        self.share_rate = running_rate(self.share_rate, indicator(sample.shared), n);
        self.skip_rate = running_rate(self.skip_rate, indicator(sample.skipped), n);

        self.last_event_at = Some(match self.last_event_at {
            Some(prev) if prev > sample.observed_at => prev,
            _ => sample.observed_at,
        });
    }

    /// Hours since the post was created, never negative
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.post_created_at).num_milliseconds() as f64 / 1000.0;
        (secs / 3600.0).max(0.0)
    }
}

/// Welford step: `mean + (sample - mean) / n`
pub fn running_mean(mean: f64, sample: f64, n: i64) -> f64 {
    if n <= 0 {
        return mean;
    }
    mean + (sample - mean) / n as f64
}

fn running_rate(mean: f64, sample: f64, n: i64) -> f64 {
    running_mean(mean, sample, n).clamp(0.0, 1.0)
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}
