//! Ad-platform ingestion.
//!
//! A run moves its SyncLog PENDING -> IN_PROGRESS -> terminal. The
//! IN_PROGRESS step is gated on an expiring lease per integration so
//! overlapping triggers cannot sync the same account twice.

pub mod orchestrator;
pub mod platforms;
pub mod scheduler;

use thiserror::Error;
use uuid::Uuid;

use crate::database::models::Platform;
use crate::database::DatabaseError;

pub use orchestrator::{SyncOrchestrator, SyncSummary};
pub use platforms::{DateRange, FetchedRecord, PlatformClient, PlatformRegistry};
pub use scheduler::CronScheduler;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Integration not found: {0}")]
    IntegrationNotFound(Uuid),

    #[error("Integration is inactive: {0}")]
    IntegrationInactive(Uuid),

    #[error("Sync log not found: {0}")]
    SyncLogNotFound(Uuid),

    #[error("Sync run {0} is already finished")]
    NotCancellable(Uuid),

    #[error("{platform} upstream failure: {message}")]
    Upstream {
        platform: Platform,
        status: Option<u16>,
        message: String,
    },

    #[error("Sync task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SyncError {
    pub fn upstream(platform: Platform, status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Upstream {
            platform,
            status,
            message: message.into(),
        }
    }
}

/// Lease scope guarding runs of one integration
pub fn lease_scope(integration_id: Uuid) -> String {
    format!("sync:{}", integration_id)
}
