use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{JobContext, MaintenanceStep};
use crate::services::{
    CreatorTrustScoreManager, DistributionPhaseController, FeedCacheJanitor, InterestProfiler,
    WatchEventStore,
};

pub struct InterestDecayStep {
    profiler: Arc<InterestProfiler>,
}

impl InterestDecayStep {
    pub fn new(profiler: Arc<InterestProfiler>) -> Self {
        Self { profiler }
    }
}

#[async_trait]
impl MaintenanceStep for InterestDecayStep {
    fn name(&self) -> &'static str {
        "interest_decay"
    }

    async fn run(&self, _ctx: &JobContext) -> anyhow::Result<Value> {
        let report = self.profiler.apply_interest_decay().await?;
        Ok(serde_json::to_value(report)?)
    }
}

pub struct SpamDecayStep {
    trust: Arc<CreatorTrustScoreManager>,
}

impl SpamDecayStep {
    pub fn new(trust: Arc<CreatorTrustScoreManager>) -> Self {
        Self { trust }
    }
}

#[async_trait]
impl MaintenanceStep for SpamDecayStep {
    fn name(&self) -> &'static str {
        "spam_decay"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let updated = self.trust.decay_spam_signals(ctx.now).await?;
        Ok(json!({ "updated": updated }))
    }
}

pub struct ShadowBanExpiryStep {
    trust: Arc<CreatorTrustScoreManager>,
}

impl ShadowBanExpiryStep {
    pub fn new(trust: Arc<CreatorTrustScoreManager>) -> Self {
        Self { trust }
    }
}

#[async_trait]
impl MaintenanceStep for ShadowBanExpiryStep {
    fn name(&self) -> &'static str {
        "shadow_ban_expiry"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let lifted = self.trust.check_expired_shadow_bans(ctx.now).await?;
        Ok(json!({ "lifted": lifted.len(), "userIds": lifted }))
    }
}

/// Aggregates views whose background task was lost
pub struct AggregationReconcileStep {
    store: Arc<WatchEventStore>,
}

impl AggregationReconcileStep {
    pub fn new(store: Arc<WatchEventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MaintenanceStep for AggregationReconcileStep {
    fn name(&self) -> &'static str {
        "aggregation_reconcile"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let folded = self.store.reconcile_pending(ctx.now).await?;
        Ok(json!({ "aggregated": folded }))
    }
}

pub struct WatchEventPurgeStep {
    store: Arc<WatchEventStore>,
}

impl WatchEventPurgeStep {
    pub fn new(store: Arc<WatchEventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MaintenanceStep for WatchEventPurgeStep {
    fn name(&self) -> &'static str {
        "watch_event_purge"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let deleted = self.store.purge_expired(ctx.now).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

pub struct FeedCachePurgeStep {
    janitor: Arc<FeedCacheJanitor>,
}

impl FeedCachePurgeStep {
    pub fn new(janitor: Arc<FeedCacheJanitor>) -> Self {
        Self { janitor }
    }
}

#[async_trait]
impl MaintenanceStep for FeedCachePurgeStep {
    fn name(&self) -> &'static str {
        "feed_cache_purge"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let deleted = self.janitor.purge_expired(ctx.now).await?;
        Ok(json!({ "deleted": deleted }))
    }
}

pub struct PhaseSweepStep {
    controller: Arc<DistributionPhaseController>,
}

impl PhaseSweepStep {
    pub fn new(controller: Arc<DistributionPhaseController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl MaintenanceStep for PhaseSweepStep {
    fn name(&self) -> &'static str {
        "phase_sweep"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<Value> {
        let report = self.controller.run_sweep(ctx.now).await?;
        Ok(serde_json::to_value(report)?)
    }
}
