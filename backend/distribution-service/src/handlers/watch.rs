/// Watch event ingestion endpoints
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Viewer, WatchEventPayload};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WatchBatchRequest {
    pub events: Vec<serde_json::Value>,
}

/// Record one watch event
pub async fn record_watch(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    viewer: Viewer,
    body: web::Json<WatchEventPayload>,
) -> Result<HttpResponse> {
    state
        .watch_events
        .record_watch_event(path.into_inner(), &viewer, body.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// Record up to 100 watch events; invalid items are skipped and counted
pub async fn record_watch_batch(
    state: web::Data<AppState>,
    viewer: Viewer,
    body: web::Json<WatchBatchRequest>,
) -> Result<HttpResponse> {
    let outcome = state
        .watch_events
        .record_watch_events_batch(&viewer, body.into_inner().events)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "processed": outcome.processed,
        "failed": outcome.failed,
    })))
}
