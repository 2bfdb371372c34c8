use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Allowed overshoot of `watchDuration` over `totalDuration` (client clock skew)
pub const TIMING_SKEW_TOLERANCE: f64 = 1.1;

/// Surface the post was watched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchSource {
    #[default]
    Feed,
    Profile,
    Explore,
    Search,
    Share,
    Direct,
}

impl WatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchSource::Feed => "feed",
            WatchSource::Profile => "profile",
            WatchSource::Explore => "explore",
            WatchSource::Search => "search",
            WatchSource::Share => "share",
            WatchSource::Direct => "direct",
        }
    }
}

impl fmt::Display for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(WatchSource::Feed),
            "profile" => Ok(WatchSource::Profile),
            "explore" => Ok(WatchSource::Explore),
            "search" => Ok(WatchSource::Search),
            "share" => Ok(WatchSource::Share),
            "direct" => Ok(WatchSource::Direct),
            other => Err(format!("unknown watch source: {}", other)),
        }
    }
}

/// Body of a single watch event as sent by clients
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_timing", skip_on_field_errors = false))]
pub struct WatchEventPayload {
    #[validate(range(min = 0.0))]
    pub watch_duration: f64,
    #[validate(range(min = 0.0))]
    pub total_duration: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub completion_rate: f64,
    #[serde(default)]
    pub replayed: bool,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub replay_count: i32,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub skip_time: Option<f64>,
    #[serde(default)]
    pub source: WatchSource,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub session_id: Option<String>,
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub shared: bool,
}

fn validate_timing(payload: &WatchEventPayload) -> Result<(), ValidationError> {
    if payload.watch_duration > payload.total_duration * TIMING_SKEW_TOLERANCE {
        let mut err = ValidationError::new("watch_exceeds_total");
        err.message = Some("watchDuration exceeds totalDuration by more than 10%".into());
        err.add_param("watchDuration".into(), &payload.watch_duration);
        err.add_param("totalDuration".into(), &payload.total_duration);
        return Err(err);
    }
    Ok(())
}

/// Who watched: the authenticated user, a hashed anonymous key, or neither
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Option<Uuid>,
    pub viewer_key: Option<String>,
}

impl Viewer {
    /// Build a viewer from the gateway-forwarded user id and the client address.
    ///
    /// Anonymous viewers are keyed by a SHA-256 digest of their address so the
    /// raw IP is never stored.
    pub fn new(user_id: Option<Uuid>, client_addr: Option<&str>) -> Self {
        let viewer_key = match (user_id, client_addr) {
            (Some(id), _) => Some(format!("u:{}", id)),
            (None, Some(addr)) if !addr.trim().is_empty() => {
                Some(format!("a:{}", hash_address(strip_port(addr.trim()))))
            }
            _ => None,
        };

        Self { user_id, viewer_key }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

fn hash_address(addr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(addr.as_bytes());
    hex::encode(hasher.finalize())
}

// "1.2.3.4:5678" and "[::1]:5678" carry an ephemeral port that must not split a viewer.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => addr,
    }
}

/// A persisted viewing session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub viewer_key: Option<String>,
    pub watch_duration: f64,
    pub total_duration: f64,
    pub completion_rate: f64,
    pub replayed: bool,
    pub replay_count: i32,
    pub skipped: bool,
    pub skip_time: Option<f64>,
    pub saved: bool,
    pub shared: bool,
    pub source: WatchSource,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(post_id: Uuid, viewer: &Viewer, payload: WatchEventPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            user_id: viewer.user_id,
            viewer_key: viewer.viewer_key.clone(),
            watch_duration: payload.watch_duration,
            total_duration: payload.total_duration,
            completion_rate: payload.completion_rate,
            replayed: payload.replayed || payload.replay_count > 0,
            replay_count: payload.replay_count,
            skipped: payload.skipped,
            skip_time: payload.skip_time,
            saved: payload.saved,
            shared: payload.shared,
            source: payload.source,
            session_id: payload.session_id,
            created_at: now,
        }
    }

    pub fn sample(&self) -> ViewSample {
        ViewSample {
            watch_duration: self.watch_duration,
            completion_rate: self.completion_rate,
            replayed: self.replayed,
            saved: self.saved,
            shared: self.shared,
            skipped: self.skipped,
            observed_at: self.created_at,
        }
    }
}

/// The part of a watch event that feeds the running aggregates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSample {
    pub watch_duration: f64,
    pub completion_rate: f64,
    pub replayed: bool,
    pub saved: bool,
    pub shared: bool,
    pub skipped: bool,
    pub observed_at: DateTime<Utc>,
}
