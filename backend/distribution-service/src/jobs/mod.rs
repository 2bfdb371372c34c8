//! Maintenance jobs
//!
//! Daily housekeeping runs as a list of independent steps:
//! - interest decay and spam-signal decay
//! - shadow-ban expiry
//! - aggregation reconciliation for views whose task was lost
//! - watch event and feed cache purges
//! - the distribution phase sweep
//!
//! A run is triggered by the cron endpoint or the optional in-process
//! scheduler. Each step holds a Redis lock while it runs so overlapping
//! triggers across instances do not double-apply decay. One step failing
//! or panicking never stops the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::JobLock;
use crate::error::{AppError, Result};
use crate::metrics::maintenance as maintenance_metrics;

pub mod steps;

/// Per-run context shared by every step
#[derive(Debug, Clone)]
pub struct JobContext {
    pub correlation_id: String,
    pub now: DateTime<Utc>,
}

impl JobContext {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            now,
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of maintenance work. The returned JSON lands in the run report.
#[async_trait]
pub trait MaintenanceStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Ok {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        result: serde_json::Value,
    },
    Error {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl StepOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            StepOutcome::Ok { .. } => "ok",
            StepOutcome::Error { .. } => "error",
            StepOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StepOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    /// False if any step errored; skipped steps do not count as failures
    pub success: bool,
    pub steps: BTreeMap<String, StepOutcome>,
}

pub struct MaintenanceRunner {
    steps: Vec<Arc<dyn MaintenanceStep>>,
    lock: Arc<dyn JobLock>,
    lock_ttl: Duration,
}

impl MaintenanceRunner {
    pub fn new(
        steps: Vec<Arc<dyn MaintenanceStep>>,
        lock: Arc<dyn JobLock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            steps,
            lock,
            lock_ttl,
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step, or only the named ones, in registration order
    pub async fn run(&self, only: Option<&[String]>) -> Result<MaintenanceReport> {
        self.run_with(JobContext::new(), only).await
    }

    pub async fn run_with(
        &self,
        ctx: JobContext,
        only: Option<&[String]>,
    ) -> Result<MaintenanceReport> {
        let selected = self.select(only)?;

        info!(
            correlation_id = %ctx.correlation_id,
            steps = ?selected.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "maintenance run started"
        );

        let mut outcomes = BTreeMap::new();
        for step in selected {
            let outcome = self.run_step(step, &ctx).await;
            maintenance_metrics::record_step_run(step.name(), outcome.status());
            outcomes.insert(step.name().to_string(), outcome);
        }

        let success = !outcomes.values().any(StepOutcome::is_error);
        info!(
            correlation_id = %ctx.correlation_id,
            success,
            "maintenance run finished"
        );

        Ok(MaintenanceReport {
            correlation_id: ctx.correlation_id,
            started_at: ctx.now,
            success,
            steps: outcomes,
        })
    }

    fn select(&self, only: Option<&[String]>) -> Result<Vec<&Arc<dyn MaintenanceStep>>> {
        let Some(names) = only else {
            return Ok(self.steps.iter().collect());
        };

        let known = self.step_names();
        let unknown: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !known.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(AppError::Validation(format!(
                "unknown maintenance steps: {}",
                unknown.join(", ")
            )));
        }

        Ok(self
            .steps
            .iter()
            .filter(|s| names.iter().any(|n| n == s.name()))
            .collect())
    }

    async fn run_step(&self, step: &Arc<dyn MaintenanceStep>, ctx: &JobContext) -> StepOutcome {
        let name = step.name();
        let lock_name = format!("maintenance:{}", name);

        let token = match self.lock.try_acquire(&lock_name, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!(correlation_id = %ctx.correlation_id, step = name, "step already running elsewhere");
                return StepOutcome::Skipped {
                    reason: "already running".to_string(),
                };
            }
            Err(e) => {
                error!(correlation_id = %ctx.correlation_id, step = name, error = %e, "step lock unavailable");
                return StepOutcome::Error {
                    duration_ms: 0,
                    error: format!("lock unavailable: {}", e),
                };
            }
        };

        let started = Instant::now();
        let task_step = step.clone();
        let task_ctx = ctx.clone();
        let joined = tokio::spawn(async move { task_step.run(&task_ctx).await }).await;
        let elapsed = started.elapsed();
        maintenance_metrics::record_step_duration(name, elapsed);

        if let Err(e) = self.lock.release(&lock_name, &token).await {
            warn!(step = name, error = %e, "failed to release step lock, it will expire");
        }

        let duration_ms = elapsed.as_millis() as u64;
        match joined {
            Ok(Ok(result)) => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    step = name,
                    elapsed_ms = duration_ms,
                    "maintenance step completed"
                );
                StepOutcome::Ok {
                    duration_ms,
                    result,
                }
            }
            Ok(Err(e)) => {
                error!(correlation_id = %ctx.correlation_id, step = name, error = %e, "maintenance step failed");
                StepOutcome::Error {
                    duration_ms,
                    error: format!("{:#}", e),
                }
            }
            Err(join_err) => {
                error!(correlation_id = %ctx.correlation_id, step = name, error = %join_err, "maintenance step panicked");
                StepOutcome::Error {
                    duration_ms,
                    error: "step panicked".to_string(),
                }
            }
        }
    }
}

/// Run the full maintenance set every `period` until shutdown. The first run
/// happens one period after start.
pub async fn run_scheduler(
    runner: Arc<MaintenanceRunner>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    info!(interval_secs = period.as_secs(), "maintenance scheduler started");

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match runner.run(None).await {
                    Ok(report) if !report.success => {
                        warn!(correlation_id = %report.correlation_id, "scheduled maintenance finished with failed steps");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "scheduled maintenance could not start"),
                }
            }
            _ = shutdown.recv() => {
                info!("maintenance scheduler stopping");
                break;
            }
        }
    }
}
