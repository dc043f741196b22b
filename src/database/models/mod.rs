pub mod company;
pub mod integration;
pub mod membership;
pub mod metric;
pub mod sync_log;

pub use company::Company;
pub use integration::{Integration, IntegrationOwner, NewIntegration, Platform};
pub use membership::{Membership, Role};
pub use metric::{AdMetric, MetricWrite};
pub use sync_log::{RecordFailure, SyncCounts, SyncErrorDetail, SyncLog, SyncStatus};

/// Error raised when a persisted enum column holds an unknown value
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
