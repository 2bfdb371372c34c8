/// Configuration management for Distribution Service
///
/// All settings are read from environment variables (optionally seeded from a
/// `.env` file by `main`). Every tunable of the scoring, phase, trust and
/// interest algorithms has a default here and can be overridden per
/// deployment without a code change.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Cache (Redis) configuration
    pub cache: CacheConfig,
    /// Shared secrets for admin, cron and internal callers
    pub security: SecurityConfig,
    /// Algorithm and background-work tunables
    pub settings: ServiceSettings,
}

/// Application settings. `host` and `port` come from `DISTRIBUTION_SERVICE_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application environment (development, staging, production), from `APP_ENV`
    #[serde(skip)]
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
    /// Emit JSON log lines instead of the human-readable format (`LOG_FORMAT=json`)
    #[serde(skip)]
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8090,
            json_logs: false,
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

/// Database configuration, from `DATABASE_*`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
    /// Min idle connections kept open
    pub min_connections: u32,
    /// Seconds to wait for a connection before failing
    pub acquire_timeout_secs: u64,
    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/nova".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

/// Cache (Redis) configuration, from `REDIS_*`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Bearer secrets. An empty secret disables the routes it guards.
#[derive(Clone, Default)]
pub struct SecurityConfig {
    /// Token for `/api/v1/admin/*`
    pub admin_token: String,
    /// Secret the external scheduler presents to `/api/v1/internal/maintenance/*`
    pub cron_secret: String,
    /// Secret for service-to-service calls on `/api/v1/internal/*`
    pub internal_secret: String,
    /// Peers whose `X-Forwarded-For` is believed. Everyone else is identified
    /// by the socket address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("admin_token", &redacted(&self.admin_token))
            .field("cron_secret", &redacted(&self.cron_secret))
            .field("internal_secret", &redacted(&self.internal_secret))
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// Algorithm and background-work tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub scoring: ScoringConfig,
    pub phase: PhaseConfig,
    pub trust: TrustPolicy,
    pub interest: InterestConfig,
    pub retention: RetentionConfig,
    pub dedup: DedupConfig,
    pub tasks: TaskPoolConfig,
    pub maintenance: MaintenanceConfig,
    pub aggregation: AggregationConfig,
}

/// Viral score weights and freshness/velocity boost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub completion_weight: f64,
    pub replay_weight: f64,
    pub save_weight: f64,
    pub share_weight: f64,
    pub skip_weight: f64,
    /// Age at which the freshness boost has halved
    pub freshness_half_life_hours: f64,
    /// Extra multiplier for a brand new post
    pub freshness_boost: f64,
    /// Extra multiplier for a post at the velocity saturation point
    pub velocity_boost: f64,
    /// Views per hour at which the velocity boost saturates
    pub velocity_saturation: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            completion_weight: 0.4,
            replay_weight: 0.2,
            save_weight: 0.15,
            share_weight: 0.25,
            skip_weight: 0.3,
            freshness_half_life_hours: 24.0,
            freshness_boost: 0.5,
            velocity_boost: 0.5,
            velocity_saturation: 1_000.0,
        }
    }
}

/// Distribution phase gates and sweep bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub scale_threshold: f64,
    pub blast_threshold: f64,
    pub min_views_for_scale: i64,
    /// Only posts with a watch event inside this window are swept
    pub sweep_window_hours: i64,
    pub sweep_batch_size: i64,
    /// Skip rate above which the author receives a skip-pattern signal
    pub skip_signal_rate: f64,
    /// Minimum views before a skip rate is trusted
    pub skip_signal_min_views: i64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            scale_threshold: 0.5,
            blast_threshold: 0.9,
            min_views_for_scale: 100,
            sweep_window_hours: 48,
            sweep_batch_size: 1_000,
            skip_signal_rate: 0.7,
            skip_signal_min_views: 50,
        }
    }
}

/// Creator trust thresholds, signal weights and decay rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    /// Score a new creator starts at and relaxes back to
    pub neutral_score: f64,
    /// Shadow ban when trust drops below this
    #[serde(alias = "ban_threshold")]
    pub trust_threshold: f64,
    /// Shadow ban when spam signals exceed this
    pub spam_threshold: f64,
    pub ban_cooldown_hours: i64,
    /// Daily multiplier applied to spam signals and report weight
    pub spam_decay_factor: f64,
    /// Fraction of the gap to neutral recovered per decay cycle
    pub recovery_rate: f64,
    /// Trust only recovers after this long without a negative signal
    pub quiet_period_hours: i64,
    pub report_spam_weight: f64,
    pub report_trust_penalty: f64,
    pub report_weight_step: f64,
    pub skip_spam_weight: f64,
    pub skip_trust_penalty: f64,
    /// Creators below this trust are listed in analytics
    #[serde(alias = "low_watermark")]
    pub low_trust_watermark: f64,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            neutral_score: 0.5,
            trust_threshold: 0.2,
            spam_threshold: 0.8,
            ban_cooldown_hours: 72,
            spam_decay_factor: 0.9,
            recovery_rate: 0.1,
            quiet_period_hours: 24,
            report_spam_weight: 0.2,
            report_trust_penalty: 0.1,
            report_weight_step: 0.1,
            skip_spam_weight: 0.15,
            skip_trust_penalty: 0.05,
            low_trust_watermark: 0.3,
        }
    }
}

/// Interest profile learning and content tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestConfig {
    pub learning_rate: f64,
    pub decay_factor: f64,
    /// Affinities below this are deleted by the decay job
    pub prune_floor: f64,
    pub hashtag_weight: f64,
    pub keyword_weight: f64,
    pub max_tags_per_post: usize,
    pub min_keyword_len: usize,
    pub profile_read_limit: i64,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.2,
            decay_factor: 0.95,
            prune_floor: 0.001,
            hashtag_weight: 1.0,
            keyword_weight: 0.5,
            max_tags_per_post: 20,
            min_keyword_len: 4,
            profile_read_limit: 100,
        }
    }
}

/// Retention windows for purge jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub watch_event_days: i64,
    pub purge_batch_size: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            watch_event_days: 90,
            purge_batch_size: 5_000,
        }
    }
}

/// Unique-view deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// A viewer counts as unique for a post once per window
    pub unique_view_window_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            unique_view_window_secs: 86_400,
        }
    }
}

/// Background worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Total attempts per task, first run included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 10_000,
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

/// Maintenance runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Single-flight lock lifetime per step
    pub lock_ttl_secs: u64,
    /// Run the maintenance steps in-process on an interval
    pub scheduler_enabled: bool,
    pub scheduler_interval_secs: u64,
}

/// Recovery of views whose aggregation task never completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Events younger than this are left to their in-flight task
    pub reconcile_grace_secs: i64,
    pub reconcile_batch_size: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            reconcile_grace_secs: 300,
            reconcile_batch_size: 1_000,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 900,
            scheduler_enabled: false,
            scheduler_interval_secs: 86_400,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let mut app: AppConfig = section("DISTRIBUTION_SERVICE_")?;
        app.env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        app.json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = Config {
            app,
            database: section("DATABASE_")?,
            cache: section("REDIS_")?,
            security: SecurityConfig {
                admin_token: std::env::var("ADMIN_API_TOKEN").unwrap_or_default(),
                cron_secret: std::env::var("CRON_SECRET").unwrap_or_default(),
                internal_secret: std::env::var("INTERNAL_API_SECRET").unwrap_or_default(),
                trusted_proxies: parse_proxies(
                    &std::env::var("TRUSTED_PROXIES").unwrap_or_default(),
                )?,
            },
            settings: ServiceSettings::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the service misbehave at runtime
    pub fn validate(&self) -> Result<(), String> {
        if self.app.is_production() {
            if self.security.cron_secret.trim().len() < 16 {
                return Err("CRON_SECRET must be at least 16 characters in production".to_string());
            }
            if self.security.admin_token.trim().is_empty() {
                return Err("ADMIN_API_TOKEN must be set in production".to_string());
            }
            if self.security.internal_secret.trim().is_empty() {
                return Err("INTERNAL_API_SECRET must be set in production".to_string());
            }
        }

        if self.database.max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS".to_string(),
            );
        }

        self.settings.validate()
    }
}

impl ServiceSettings {
    /// Load the algorithm tunables. Each section reads its own prefix, so
    /// `PHASE_SCALE_THRESHOLD` sets `phase.scale_threshold`; unset keys keep
    /// their defaults.
    pub fn from_env() -> Result<Self, String> {
        Ok(ServiceSettings {
            scoring: section("SCORE_")?,
            phase: section("PHASE_")?,
            trust: section("TRUST_")?,
            interest: section("INTEREST_")?,
            retention: section("RETENTION_")?,
            dedup: section("DEDUP_")?,
            tasks: section("TASK_POOL_")?,
            maintenance: section("MAINTENANCE_")?,
            aggregation: section("AGGREGATION_")?,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        let phase = &self.phase;
        if phase.scale_threshold > phase.blast_threshold {
            return Err(format!(
                "PHASE_SCALE_THRESHOLD ({}) cannot exceed PHASE_BLAST_THRESHOLD ({})",
                phase.scale_threshold, phase.blast_threshold
            ));
        }
        if phase.sweep_batch_size <= 0 || phase.sweep_window_hours <= 0 {
            return Err("phase sweep batch size and window must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&phase.skip_signal_rate) {
            return Err("PHASE_SKIP_SIGNAL_RATE must be within [0, 1]".to_string());
        }

        let trust = &self.trust;
        for (name, value) in [
            ("TRUST_NEUTRAL_SCORE", trust.neutral_score),
            ("TRUST_BAN_THRESHOLD", trust.trust_threshold),
            ("TRUST_SPAM_THRESHOLD", trust.spam_threshold),
            ("TRUST_RECOVERY_RATE", trust.recovery_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if trust.neutral_score < trust.trust_threshold {
            return Err("TRUST_NEUTRAL_SCORE cannot be below TRUST_BAN_THRESHOLD".to_string());
        }
        if !(trust.spam_decay_factor > 0.0 && trust.spam_decay_factor < 1.0) {
            return Err("TRUST_SPAM_DECAY_FACTOR must be within (0, 1)".to_string());
        }

        let interest = &self.interest;
        if !(interest.decay_factor > 0.0 && interest.decay_factor < 1.0) {
            return Err("INTEREST_DECAY_FACTOR must be within (0, 1)".to_string());
        }
        if !(interest.learning_rate > 0.0 && interest.learning_rate <= 1.0) {
            return Err("INTEREST_LEARNING_RATE must be within (0, 1]".to_string());
        }
        if interest.hashtag_weight <= 0.0 || interest.keyword_weight <= 0.0 {
            return Err("content vector weights must be positive".to_string());
        }

        if self.scoring.freshness_half_life_hours <= 0.0 || self.scoring.velocity_saturation <= 0.0
        {
            return Err("scoring half-life and velocity saturation must be positive".to_string());
        }

        if self.retention.watch_event_days <= 0 || self.retention.purge_batch_size <= 0 {
            return Err("retention days and purge batch size must be positive".to_string());
        }
        if self.dedup.unique_view_window_secs == 0 {
            return Err("DEDUP_UNIQUE_VIEW_WINDOW_SECS must be greater than 0".to_string());
        }

        let tasks = &self.tasks;
        if tasks.workers == 0 || tasks.queue_capacity == 0 || tasks.max_attempts == 0 {
            return Err("task pool workers, capacity and attempts must be positive".to_string());
        }

        if self.aggregation.reconcile_grace_secs < 0 || self.aggregation.reconcile_batch_size <= 0 {
            return Err("aggregation reconcile grace and batch size must be positive".to_string());
        }

        if self.maintenance.scheduler_enabled && self.maintenance.scheduler_interval_secs == 0 {
            return Err("MAINTENANCE_SCHEDULER_INTERVAL_SECS must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Comma-separated IP addresses
fn parse_proxies(raw: &str) -> Result<Vec<IpAddr>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map_err(|e| format!("TRUSTED_PROXIES entry '{}': {}", entry, e))
        })
        .collect()
}

fn section<T: DeserializeOwned>(prefix: &str) -> Result<T, String> {
    envy::prefixed(prefix)
        .from_env::<T>()
        .map_err(|e| format!("invalid {}* settings: {}", prefix, e))
}
