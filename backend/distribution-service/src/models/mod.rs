/// Data models for distribution-service
pub mod interest;
pub mod post_metrics;
pub mod trust;
pub mod watch_event;

pub use interest::{InterestDecayReport, InterestProfile, TagWeight};
pub use post_metrics::{DistributionPhase, PostMetrics};
pub use trust::{CreatorTrustScore, NegativeSignal, ReportReason, TrustVerdict};
pub use watch_event::{ViewSample, Viewer, WatchEvent, WatchEventPayload, WatchSource};
