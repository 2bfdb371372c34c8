use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of a content vector or interest profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagWeight {
    pub tag: String,
    pub weight: f64,
}

impl TagWeight {
    pub fn new(tag: impl Into<String>, weight: f64) -> Self {
        Self {
            tag: tag.into(),
            weight,
        }
    }
}

/// A viewer's tag affinities, strongest first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestProfile {
    pub user_id: Uuid,
    pub tags: Vec<TagWeight>,
}

impl InterestProfile {
    pub fn weight_of(&self, tag: &str) -> f64 {
        self.tags
            .iter()
            .find(|t| t.tag == tag)
            .map(|t| t.weight)
            .unwrap_or(0.0)
    }
}

/// Rows touched by one interest decay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterestDecayReport {
    pub decayed: u64,
    pub pruned: u64,
}
