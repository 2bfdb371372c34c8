/// HTTP handlers for distribution-service
///
/// - Watch: single and batch watch event ingestion
/// - Admin: algorithm overview for the dashboard
/// - Maintenance: cron-triggered housekeeping
/// - Internal: post creation hooks, reports, trust gate, interests
pub mod admin;
pub mod health;
pub mod internal;
pub mod maintenance;
pub mod watch;

pub use admin::algorithm_overview;
pub use internal::{creator_trust, post_created, report_creator, reset_phase, user_interests};
pub use maintenance::run_maintenance;
pub use watch::{record_watch, record_watch_batch};
