/// Admin dashboard: algorithm health at a glance
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;

use crate::db::{AlgorithmSnapshot, SnapshotQuery};
use crate::error::Result;
use crate::services::TaskPoolStats;
use crate::AppState;

const LOW_TRUST_LIMIT: i64 = 20;
const TOP_POSTS_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmOverview {
    pub generated_at: String,
    #[serde(flatten)]
    pub snapshot: AlgorithmSnapshot,
    pub background_tasks: TaskPoolStats,
}

pub async fn algorithm_overview(state: web::Data<AppState>) -> Result<HttpResponse> {
    let now = Utc::now();
    let query = SnapshotQuery {
        now,
        low_trust_watermark: state.trust.policy().low_trust_watermark,
        low_trust_limit: LOW_TRUST_LIMIT,
        top_posts_limit: TOP_POSTS_LIMIT,
    };

    let snapshot = state.analytics.snapshot(&query).await?;

    Ok(HttpResponse::Ok().json(AlgorithmOverview {
        generated_at: now.to_rfc3339(),
        snapshot,
        background_tasks: state.tasks.stats(),
    }))
}
