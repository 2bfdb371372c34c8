//! In-memory stores for integration tests
//!
//! Each fake keeps its state behind a `std::sync::Mutex` and applies every
//! mutation while holding it, mirroring the single-statement atomicity of
//! the PostgreSQL repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use uuid::Uuid;

use distribution_service::cache::{JobLock, LockToken, ViewDeduplicator};
use distribution_service::config::TrustPolicy;
use distribution_service::db::analytics_repo::{phase_stats, ShadowBanStats};
use distribution_service::db::{
    AlgorithmSnapshot, AnalyticsRepository, CreatorTrustRepository, FeedCacheRepository,
    InterestRepository, PostMetricsRepository, SnapshotQuery, WatchEventRepository,
};
use distribution_service::error::{AppError, Result};
use distribution_service::models::{
    CreatorTrustScore, DistributionPhase, InterestDecayReport, PostMetrics, TagWeight, ViewSample,
    WatchEvent,
};
use distribution_service::services::creator_trust;

fn storage_error(what: &str) -> AppError {
    AppError::Internal(format!("simulated storage failure: {}", what))
}

// =====================================================================
// Watch events
// =====================================================================

#[derive(Default)]
pub struct MemoryWatchEvents {
    events: Mutex<Vec<WatchEvent>>,
    aggregated: Mutex<HashSet<Uuid>>,
    failing_posts: Mutex<HashSet<Uuid>>,
}

impl MemoryWatchEvents {
    /// Mark a stored event as folded into its post's metrics. `false` when the
    /// event is unknown or already claimed.
    pub fn claim(&self, event_id: Uuid) -> bool {
        let events = self.events.lock().unwrap();
        if !events.iter().any(|e| e.id == event_id) {
            return false;
        }
        self.aggregated.lock().unwrap().insert(event_id)
    }

    pub fn pending_count(&self) -> usize {
        let events = self.events.lock().unwrap();
        let aggregated = self.aggregated.lock().unwrap();
        events.iter().filter(|e| !aggregated.contains(&e.id)).count()
    }

    /// Inserts for `post_id` fail as if the database rejected them
    pub fn fail_inserts_for(&self, post_id: Uuid) {
        self.failing_posts.lock().unwrap().insert(post_id);
    }

    pub fn seed(&self, event: WatchEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<WatchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl WatchEventRepository for MemoryWatchEvents {
    async fn insert(&self, event: &WatchEvent) -> Result<()> {
        if self.failing_posts.lock().unwrap().contains(&event.post_id) {
            return Err(storage_error("watch event insert"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn purge_batch(&self, cutoff: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let mut events = self.events.lock().unwrap();
        let mut removed = 0i64;
        events.retain(|e| {
            if removed < batch_size && e.created_at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }

    async fn pending_aggregation(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WatchEvent>> {
        let events = self.events.lock().unwrap();
        let aggregated = self.aggregated.lock().unwrap();
        let mut pending: Vec<WatchEvent> = events
            .iter()
            .filter(|e| e.created_at < before && !aggregated.contains(&e.id))
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

// =====================================================================
// Post metrics
// =====================================================================

/// Folding a view claims its event in the shared [`MemoryWatchEvents`], the
/// way the PostgreSQL repository does inside one transaction.
#[derive(Default)]
pub struct MemoryPostMetrics {
    rows: Mutex<HashMap<Uuid, PostMetrics>>,
    events: Arc<MemoryWatchEvents>,
    fail_reads: AtomicBool,
    failing_view_writes: AtomicUsize,
}

impl MemoryPostMetrics {
    pub fn with_events(events: Arc<MemoryWatchEvents>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// The next `count` view writes fail before touching any state
    pub fn fail_view_writes(&self, count: usize) {
        self.failing_view_writes.store(count, Ordering::SeqCst);
    }

    pub fn seed(&self, metrics: PostMetrics) {
        self.rows.lock().unwrap().insert(metrics.post_id, metrics);
    }

    pub fn snapshot(&self, post_id: Uuid) -> Option<PostMetrics> {
        self.rows.lock().unwrap().get(&post_id).cloned()
    }

    /// Make `get` fail, leaving the sweep listing intact
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PostMetricsRepository for MemoryPostMetrics {
    async fn initialize(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        post_created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&post_id) {
            Some(m) if m.author_id.is_some() => Ok(false),
            Some(m) => {
                m.author_id = Some(author_id);
                m.post_created_at = post_created_at;
                Ok(true)
            }
            None => {
                rows.insert(post_id, PostMetrics::new(post_id, author_id, post_created_at));
                Ok(true)
            }
        }
    }

    async fn get(&self, post_id: Uuid) -> Result<Option<PostMetrics>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(storage_error("post metrics read"));
        }
        Ok(self.snapshot(post_id))
    }

    async fn apply_view(
        &self,
        event_id: Uuid,
        post_id: Uuid,
        sample: &ViewSample,
        first_view: bool,
    ) -> Result<Option<PostMetrics>> {
        let failing = self
            .failing_view_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(storage_error("post metrics view write"));
        }

        if !self.events.claim(event_id) {
            return Ok(None);
        }

        let mut rows = self.rows.lock().unwrap();
        let metrics = rows
            .entry(post_id)
            .or_insert_with(|| PostMetrics::unattributed(post_id, sample.observed_at));
        metrics.apply(sample, first_view);
        Ok(Some(metrics.clone()))
    }

    async fn update_score(
        &self,
        post_id: Uuid,
        score: f64,
        observed_total_views: i64,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&post_id) {
            Some(m) if m.total_views == observed_total_views => {
                m.viral_score = score;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_candidates(
        &self,
        active_since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PostMetrics>> {
        let rows = self.rows.lock().unwrap();
        let mut candidates: Vec<PostMetrics> = rows
            .values()
            .filter(|m| m.distribution_phase != DistributionPhase::Blast)
            .filter(|m| m.last_event_at.map_or(false, |at| at >= active_since))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.last_event_at.cmp(&a.last_event_at));
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn transition_phase(
        &self,
        post_id: Uuid,
        from: DistributionPhase,
        to: DistributionPhase,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&post_id) {
            Some(m) if m.distribution_phase == from => {
                m.distribution_phase = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_skip_signal(&self, post_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&post_id) {
            Some(m) if !m.skip_signal_raised => {
                m.skip_signal_raised = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_skip_signal(&self, post_id: Uuid) -> Result<()> {
        if let Some(m) = self.rows.lock().unwrap().get_mut(&post_id) {
            m.skip_signal_raised = false;
        }
        Ok(())
    }
}

// =====================================================================
// Creator trust
// =====================================================================

#[derive(Default)]
pub struct MemoryTrust {
    rows: Mutex<HashMap<Uuid, CreatorTrustScore>>,
    failing_users: Mutex<HashSet<Uuid>>,
    failing_writes: AtomicUsize,
}

impl MemoryTrust {
    pub fn seed(&self, record: CreatorTrustScore) {
        self.rows.lock().unwrap().insert(record.user_id, record);
    }

    pub fn snapshot(&self, user_id: Uuid) -> Option<CreatorTrustScore> {
        self.rows.lock().unwrap().get(&user_id).cloned()
    }

    pub fn fail_reads_for(&self, user_id: Uuid) {
        self.failing_users.lock().unwrap().insert(user_id);
    }

    /// The next `count` compare-and-swap writes fail
    pub fn fail_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreatorTrustRepository for MemoryTrust {
    async fn insert_if_absent(&self, record: &CreatorTrustScore) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.user_id) {
            return Ok(false);
        }
        rows.insert(record.user_id, record.clone());
        Ok(true)
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<CreatorTrustScore>> {
        if self.failing_users.lock().unwrap().contains(&user_id) {
            return Err(storage_error("trust read"));
        }
        Ok(self.snapshot(user_id))
    }

    async fn compare_and_swap(
        &self,
        record: &CreatorTrustScore,
        expected_version: i64,
    ) -> Result<bool> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(storage_error("trust write"));
        }

        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&record.user_id) {
            Some(current) if current.version == expected_version => {
                let mut next = record.clone();
                next.version = expected_version + 1;
                next.created_at = current.created_at;
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn shadow_banned_among(&self, user_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        let rows = self.rows.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter(|id| rows.get(id).map_or(false, |r| r.is_shadow_banned))
            .copied()
            .collect())
    }

    async fn decay_all(&self, policy: &TrustPolicy, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut changed = 0;
        for record in rows.values_mut() {
            let settled = record.spam_signals == 0.0
                && record.report_weight == 0.0
                && record.trust_score == policy.neutral_score;
            if settled {
                continue;
            }
            let mut next = creator_trust::decay(record, policy, now);
            next.version = record.version + 1;
            *record = next;
            changed += 1;
        }
        Ok(changed)
    }

    async fn lift_expired_bans(
        &self,
        policy: &TrustPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut rows = self.rows.lock().unwrap();
        let mut lifted = Vec::new();
        for record in rows.values_mut() {
            if creator_trust::ban_expired(record, policy, now) {
                record.is_shadow_banned = false;
                record.shadow_ban_expires_at = None;
                record.version += 1;
                record.updated_at = now;
                lifted.push(record.user_id);
            }
        }
        Ok(lifted)
    }
}

// =====================================================================
// Interests
// =====================================================================

#[derive(Default)]
pub struct MemoryInterests {
    vectors: Mutex<HashMap<Uuid, Vec<TagWeight>>>,
    profiles: Mutex<HashMap<Uuid, BTreeMap<String, f64>>>,
}

impl MemoryInterests {
    pub fn vector(&self, post_id: Uuid) -> Vec<TagWeight> {
        self.vectors
            .lock()
            .unwrap()
            .get(&post_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_weight(&self, user_id: Uuid, tag: &str, weight: f64) {
        self.profiles
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .insert(tag.to_string(), weight);
    }

    pub fn weight(&self, user_id: Uuid, tag: &str) -> Option<f64> {
        self.profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .and_then(|p| p.get(tag).copied())
    }
}

#[async_trait]
impl InterestRepository for MemoryInterests {
    async fn upsert_content_vector(&self, post_id: Uuid, tags: &[TagWeight]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut vectors = self.vectors.lock().unwrap();
        let vector = vectors.entry(post_id).or_default();
        for tag in tags {
            match vector.iter_mut().find(|t| t.tag == tag.tag) {
                Some(existing) => existing.weight = tag.weight,
                None => vector.push(tag.clone()),
            }
        }
        Ok(())
    }

    async fn content_vector(&self, post_id: Uuid) -> Result<Vec<TagWeight>> {
        Ok(self.vector(post_id))
    }

    async fn blend_interests(
        &self,
        user_id: Uuid,
        targets: &[TagWeight],
        learning_rate: f64,
        _now: DateTime<Utc>,
    ) -> Result<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.entry(user_id).or_default();
        for target in targets {
            let current = profile.get(&target.tag).copied().unwrap_or(0.0);
            let next = (current * (1.0 - learning_rate) + learning_rate * target.weight).max(0.0);
            profile.insert(target.tag.clone(), next);
        }
        Ok(())
    }

    async fn decay_all(&self, factor: f64, prune_floor: f64) -> Result<InterestDecayReport> {
        let mut profiles = self.profiles.lock().unwrap();
        let mut report = InterestDecayReport::default();
        for profile in profiles.values_mut() {
            for weight in profile.values_mut() {
                if *weight > 0.0 {
                    *weight = (*weight * factor).max(0.0);
                    report.decayed += 1;
                }
            }
            let before = profile.len();
            profile.retain(|_, w| *w >= prune_floor);
            report.pruned += (before - profile.len()) as u64;
        }
        Ok(report)
    }

    async fn profile(&self, user_id: Uuid, limit: i64) -> Result<Vec<TagWeight>> {
        let profiles = self.profiles.lock().unwrap();
        let mut tags: Vec<TagWeight> = profiles
            .get(&user_id)
            .map(|p| p.iter().map(|(t, w)| TagWeight::new(t.clone(), *w)).collect())
            .unwrap_or_default();
        tags.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        tags.truncate(limit.max(0) as usize);
        Ok(tags)
    }
}

// =====================================================================
// Feed cache
// =====================================================================

#[derive(Default)]
pub struct MemoryFeedCache {
    expiries: Mutex<Vec<DateTime<Utc>>>,
}

impl MemoryFeedCache {
    pub fn seed(&self, expires_at: DateTime<Utc>) {
        self.expiries.lock().unwrap().push(expires_at);
    }

    pub fn remaining(&self) -> usize {
        self.expiries.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedCacheRepository for MemoryFeedCache {
    async fn purge_expired_batch(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let mut expiries = self.expiries.lock().unwrap();
        let mut removed = 0i64;
        expiries.retain(|at| {
            if removed < batch_size && *at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }
}

// =====================================================================
// Analytics
// =====================================================================

/// Builds the snapshot from the other fakes' state
pub struct MemoryAnalytics {
    pub metrics: Arc<MemoryPostMetrics>,
    pub trust: Arc<MemoryTrust>,
}

#[async_trait]
impl AnalyticsRepository for MemoryAnalytics {
    async fn snapshot(&self, _query: &SnapshotQuery) -> Result<AlgorithmSnapshot> {
        let rows: Vec<(String, i64, f64)> = {
            let metrics = self.metrics.rows.lock().unwrap();
            DistributionPhase::ALL
                .iter()
                .filter_map(|phase| {
                    let scores: Vec<f64> = metrics
                        .values()
                        .filter(|m| m.distribution_phase == *phase)
                        .map(|m| m.viral_score)
                        .collect();
                    if scores.is_empty() {
                        return None;
                    }
                    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
                    Some((phase.as_str().to_string(), scores.len() as i64, avg))
                })
                .collect()
        };

        let (creators, banned) = {
            let trust = self.trust.rows.lock().unwrap();
            let banned = trust.values().filter(|r| r.is_shadow_banned).count();
            (trust.len() as i64, banned as i64)
        };

        Ok(AlgorithmSnapshot {
            phases: phase_stats(rows),
            shadow_bans: ShadowBanStats::new(creators, banned),
            ..AlgorithmSnapshot::default()
        })
    }
}

// =====================================================================
// Redis-backed collaborators
// =====================================================================

#[derive(Default)]
pub struct MemoryViewDedup {
    seen: Mutex<HashSet<(Uuid, String)>>,
    failing: AtomicBool,
}

impl MemoryViewDedup {
    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ViewDeduplicator for MemoryViewDedup {
    async fn first_view(&self, post_id: Uuid, viewer_key: &str) -> Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(storage_error("view dedup"));
        }
        Ok(self
            .seen
            .lock()
            .unwrap()
            .insert((post_id, viewer_key.to_string())))
    }
}

#[derive(Default)]
pub struct MemoryJobLock {
    held: Mutex<HashMap<String, String>>,
    acquisitions: AtomicUsize,
}

impl MemoryJobLock {
    /// Simulate another instance holding `name`
    pub fn hold(&self, name: &str) {
        self.held
            .lock()
            .unwrap()
            .insert(name.to_string(), "elsewhere".to_string());
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().unwrap().contains_key(name)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobLock for MemoryJobLock {
    async fn try_acquire(&self, name: &str, _ttl: StdDuration) -> Result<Option<LockToken>> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(name) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        held.insert(name.to_string(), token.clone());
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Some(LockToken(token)))
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        match held.get(name) {
            Some(current) if *current == token.0 => {
                held.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
