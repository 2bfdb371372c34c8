/// Service-to-service endpoints used by the post and moderation services
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::{NegativeSignal, ReportReason};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostCreatedRequest {
    pub author_id: Uuid,
    #[serde(default)]
    #[validate(length(max = 10000))]
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: ReportReason,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PhaseResetRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Queue metrics, trust and tagging setup for a new post
pub async fn post_created(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PostCreatedRequest>,
) -> Result<HttpResponse> {
    let req = body.into_inner();
    req.validate()?;
    let post_id = path.into_inner();

    let queued = state.post_hooks.on_post_created(
        post_id,
        req.author_id,
        req.content,
        req.created_at.unwrap_or_else(Utc::now),
    );
    if !queued {
        return Err(AppError::Unavailable(
            "background queue is full, retry later".into(),
        ));
    }

    Ok(HttpResponse::Accepted().json(serde_json::json!({ "accepted": true, "postId": post_id })))
}

/// Apply a moderation report against a creator
pub async fn report_creator(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ReportRequest>,
) -> Result<HttpResponse> {
    let record = state
        .trust
        .record_signal(
            path.into_inner(),
            NegativeSignal::Report(body.reason),
            Utc::now(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(record.verdict()))
}

/// The boolean gate other services read
pub async fn creator_trust(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let verdict = state.trust.verdict(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(verdict))
}

pub async fn reset_phase(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PhaseResetRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let post_id = path.into_inner();
    let previous = state.phases.reset_to_test(post_id, &body.reason).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "postId": post_id,
        "previousPhase": previous,
        "distributionPhase": "TEST",
    })))
}

pub async fn user_interests(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let profile = state.interests.profile(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}
