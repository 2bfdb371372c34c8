//! Content tagging and viewer interest profiles.
//!
//! Posts are tagged once at creation from their text. Every authenticated
//! view nudges the viewer's affinity for those tags toward how much they
//! engaged; a daily decay lets stale tastes fade out.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::InterestConfig;
use crate::db::InterestRepository;
use crate::error::Result;
use crate::models::{InterestDecayReport, InterestProfile, TagWeight, ViewSample};

static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("hashtag pattern is valid"));

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("word pattern is valid"));

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "because", "been", "before", "being",
    "below", "between", "both", "could", "does", "doing", "down", "during", "each", "even",
    "every", "from", "further", "have", "having", "here", "into", "just", "like", "more", "most",
    "much", "must", "only", "other", "over", "really", "same", "should", "some", "such", "than",
    "that", "their", "theirs", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours",
];

/// Bonus per replay/save/share signal on top of completion
const ENGAGEMENT_BONUS: f64 = 0.25;

/// Tags for a post's text: hashtags first, then keywords, deduplicated and capped
pub fn extract_tags(content: &str, config: &InterestConfig) -> Vec<TagWeight> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for cap in HASHTAG.captures_iter(content) {
        let tag = cap[1].to_lowercase();
        if seen.insert(tag.clone()) {
            tags.push(TagWeight::new(tag, config.hashtag_weight));
        }
    }

    let without_hashtags = HASHTAG.replace_all(content, " ");
    for word in WORD.find_iter(&without_hashtags) {
        let word = word.as_str().to_lowercase();
        if word.chars().count() < config.min_keyword_len || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            tags.push(TagWeight::new(word, config.keyword_weight));
        }
    }

    tags.truncate(config.max_tags_per_post);
    tags
}

/// How strongly one view counts toward the viewer's taste, in [0, 1]
pub fn engagement(sample: &ViewSample) -> f64 {
    if sample.skipped {
        return 0.0;
    }

    let bonus = [sample.replayed, sample.saved, sample.shared]
        .iter()
        .filter(|flag| **flag)
        .count() as f64
        * ENGAGEMENT_BONUS;

    (sample.completion_rate.clamp(0.0, 1.0) + bonus).min(1.0)
}

pub struct InterestProfiler {
    repo: Arc<dyn InterestRepository>,
    config: InterestConfig,
}

impl InterestProfiler {
    pub fn new(repo: Arc<dyn InterestRepository>, config: InterestConfig) -> Self {
        Self { repo, config }
    }

    pub async fn auto_tag_post(&self, post_id: Uuid, content: &str) -> Result<Vec<TagWeight>> {
        let tags = extract_tags(content, &self.config);
        self.repo.upsert_content_vector(post_id, &tags).await?;
        debug!(post_id = %post_id, tags = tags.len(), "post content vector stored");
        Ok(tags)
    }

    /// Blend one authenticated view into the viewer's profile. Posts without
    /// tags leave the profile untouched.
    pub async fn record_engagement(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        sample: &ViewSample,
    ) -> Result<()> {
        let vector = self.repo.content_vector(post_id).await?;
        if vector.is_empty() {
            return Ok(());
        }

        let engagement = engagement(sample);
        let targets: Vec<TagWeight> = vector
            .into_iter()
            .map(|t| TagWeight::new(t.tag, t.weight * engagement))
            .collect();

        self.repo
            .blend_interests(user_id, &targets, self.config.learning_rate, Utc::now())
            .await
    }

    pub async fn apply_interest_decay(&self) -> Result<InterestDecayReport> {
        let report = self
            .repo
            .decay_all(self.config.decay_factor, self.config.prune_floor)
            .await?;
        info!(
            decayed = report.decayed,
            pruned = report.pruned,
            "interest profiles decayed"
        );
        Ok(report)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<InterestProfile> {
        let tags = self
            .repo
            .profile(user_id, self.config.profile_read_limit)
            .await?;
        Ok(InterestProfile { user_id, tags })
    }
}
