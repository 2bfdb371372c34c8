/// Cron-triggered maintenance
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::Result;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    /// Comma separated step names; all steps when absent
    pub steps: Option<String>,
}

impl RunQuery {
    fn step_names(&self) -> Option<Vec<String>> {
        let names: Vec<String> = self
            .steps
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        (!names.is_empty()).then_some(names)
    }
}

/// Always 200 once the run starts; per-step failures are in the report
pub async fn run_maintenance(
    state: web::Data<AppState>,
    query: web::Query<RunQuery>,
) -> Result<HttpResponse> {
    let names = query.step_names();
    let report = state.maintenance.run(names.as_deref()).await?;
    Ok(HttpResponse::Ok().json(report))
}
