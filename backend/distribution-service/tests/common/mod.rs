//! Shared fixtures for distribution-service integration tests
#![allow(dead_code)]

pub mod memory;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use distribution_service::config::{SecurityConfig, ServiceSettings, TaskPoolConfig};
use distribution_service::models::{PostMetrics, Viewer, WatchEventPayload, WatchSource};
use distribution_service::{AppState, Stores};

use memory::{
    MemoryAnalytics, MemoryFeedCache, MemoryInterests, MemoryJobLock, MemoryPostMetrics,
    MemoryTrust, MemoryViewDedup, MemoryWatchEvents,
};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const INTERNAL_SECRET: &str = "test-internal-secret";

/// Application state wired over in-memory stores, with handles to inspect them
pub struct TestHarness {
    pub state: AppState,
    pub settings: ServiceSettings,
    pub watch_events: Arc<MemoryWatchEvents>,
    pub post_metrics: Arc<MemoryPostMetrics>,
    pub trust: Arc<MemoryTrust>,
    pub interests: Arc<MemoryInterests>,
    pub feed_cache: Arc<MemoryFeedCache>,
    pub view_dedup: Arc<MemoryViewDedup>,
    pub job_lock: Arc<MemoryJobLock>,
}

/// Defaults with a retry schedule short enough for tests
pub fn test_settings() -> ServiceSettings {
    ServiceSettings {
        tasks: TaskPoolConfig {
            workers: 4,
            queue_capacity: 1_000,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
        },
        ..ServiceSettings::default()
    }
}

pub fn test_security() -> SecurityConfig {
    SecurityConfig {
        admin_token: ADMIN_TOKEN.to_string(),
        cron_secret: CRON_SECRET.to_string(),
        internal_secret: INTERNAL_SECRET.to_string(),
        trusted_proxies: Vec::new(),
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let watch_events = Arc::new(MemoryWatchEvents::default());
        let post_metrics = Arc::new(MemoryPostMetrics::with_events(watch_events.clone()));
        let trust = Arc::new(MemoryTrust::default());
        let interests = Arc::new(MemoryInterests::default());
        let feed_cache = Arc::new(MemoryFeedCache::default());
        let view_dedup = Arc::new(MemoryViewDedup::default());
        let job_lock = Arc::new(MemoryJobLock::default());

        let stores = Stores {
            watch_events: watch_events.clone(),
            post_metrics: post_metrics.clone(),
            trust: trust.clone(),
            interests: interests.clone(),
            feed_cache: feed_cache.clone(),
            analytics: Arc::new(MemoryAnalytics {
                metrics: post_metrics.clone(),
                trust: trust.clone(),
            }),
            view_dedup: view_dedup.clone(),
            job_lock: job_lock.clone(),
        };

        Self {
            state: AppState::build(stores, &settings),
            settings,
            watch_events,
            post_metrics,
            trust,
            interests,
            feed_cache,
            view_dedup,
            job_lock,
        }
    }

    /// Seed a zeroed metrics row and return its post id
    pub fn seed_post(&self, author_id: Uuid, created_at: DateTime<Utc>) -> Uuid {
        let post_id = Uuid::new_v4();
        self.post_metrics
            .seed(PostMetrics::new(post_id, author_id, created_at));
        post_id
    }

    pub async fn settle(&self) {
        self.state.tasks.wait_idle().await;
    }
}

pub fn payload(watch: f64, total: f64, completion: f64) -> WatchEventPayload {
    WatchEventPayload {
        watch_duration: watch,
        total_duration: total,
        completion_rate: completion,
        replayed: false,
        replay_count: 0,
        skipped: false,
        skip_time: None,
        source: WatchSource::Feed,
        session_id: None,
        saved: false,
        shared: false,
    }
}

pub fn user_viewer() -> (Uuid, Viewer) {
    let user_id = Uuid::new_v4();
    (user_id, Viewer::new(Some(user_id), None))
}

pub fn anonymous_viewer(addr: &str) -> Viewer {
    Viewer::new(None, Some(addr))
}
