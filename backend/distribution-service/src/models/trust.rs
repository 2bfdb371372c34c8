use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Scores within this distance of their resting value snap to it
pub const SETTLE_EPSILON: f64 = 1e-4;

/// Reason a viewer gave when reporting a creator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    HateSpeech,
    Violence,
    Nudity,
    Misinformation,
    Other,
}

impl ReportReason {
    /// Relative weight of the report, in (0, 1]
    pub fn severity(&self) -> f64 {
        match self {
            ReportReason::HateSpeech | ReportReason::Violence => 1.0,
            ReportReason::Harassment => 0.8,
            ReportReason::Nudity => 0.7,
            ReportReason::Spam => 0.6,
            ReportReason::Misinformation => 0.5,
            ReportReason::Other => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Harassment => "harassment",
            ReportReason::HateSpeech => "hate_speech",
            ReportReason::Violence => "violence",
            ReportReason::Nudity => "nudity",
            ReportReason::Misinformation => "misinformation",
            ReportReason::Other => "other",
        }
    }
}

impl fmt::Display for ReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence that lowers a creator's trust
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NegativeSignal {
    Report(ReportReason),
    /// Viewers abandon the creator's post early at this rate
    SkipPattern { skip_rate: f64 },
}

impl NegativeSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            NegativeSignal::Report(_) => "report",
            NegativeSignal::SkipPattern { .. } => "skip_pattern",
        }
    }
}

/// Per-creator trust record
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreatorTrustScore {
    pub user_id: Uuid,
    pub trust_score: f64,
    pub spam_signals: f64,
    pub report_weight: f64,
    pub is_shadow_banned: bool,
    pub shadow_ban_expires_at: Option<DateTime<Utc>>,
    pub last_negative_signal_at: Option<DateTime<Utc>>,
    /// Bumped on every write; used for compare-and-swap
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreatorTrustScore {
    pub fn neutral(user_id: Uuid, neutral_score: f64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            trust_score: neutral_score.clamp(0.0, 1.0),
            spam_signals: 0.0,
            report_weight: 0.0,
            is_shadow_banned: false,
            shadow_ban_expires_at: None,
            last_negative_signal_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn verdict(&self) -> TrustVerdict {
        TrustVerdict {
            user_id: self.user_id,
            is_shadow_banned: self.is_shadow_banned,
            trust_score: self.trust_score,
            shadow_ban_expires_at: self.shadow_ban_expires_at,
        }
    }
}

/// The boolean gate other components consume
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustVerdict {
    pub user_id: Uuid,
    pub is_shadow_banned: bool,
    pub trust_score: f64,
    pub shadow_ban_expires_at: Option<DateTime<Utc>>,
}
