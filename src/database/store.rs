use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{
    AdMetric, Company, Integration, IntegrationOwner, Membership, MetricWrite, NewIntegration, SyncCounts,
    SyncErrorDetail, SyncLog, SyncStatus,
};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Looks up the unique (user, company) membership
    async fn find_membership(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Membership>, DatabaseError>;

    /// Companies the user belongs to, ordered by membership creation ascending
    async fn list_companies(&self, user_id: Uuid) -> Result<Vec<Company>, DatabaseError>;

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, DatabaseError>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Inserts or refreshes credentials on (owner, platform, account_id); reactivates the row
    async fn upsert_integration(&self, new: NewIntegration) -> Result<Integration, DatabaseError>;

    async fn find_integration(&self, id: Uuid) -> Result<Option<Integration>, DatabaseError>;

    async fn list_integrations(&self, owner: IntegrationOwner) -> Result<Vec<Integration>, DatabaseError>;

    async fn list_active_integrations(&self) -> Result<Vec<Integration>, DatabaseError>;

    /// Soft-disables the integration. Returns false when it does not exist.
    async fn deactivate_integration(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait SyncLogStore: Send + Sync {
    /// Appends a PENDING row
    async fn create_sync_log(&self, integration_id: Uuid, company_id: Option<Uuid>) -> Result<SyncLog, DatabaseError>;

    /// Moves a row to `next` if the state machine allows it from its current status.
    /// Returns `None` when the row is missing or already terminal.
    async fn transition_sync_log(
        &self,
        id: Uuid,
        next: SyncStatus,
        counts: SyncCounts,
        error: Option<SyncErrorDetail>,
    ) -> Result<Option<SyncLog>, DatabaseError>;

    async fn find_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>, DatabaseError>;

    /// Most recent first
    async fn list_sync_logs(&self, company_id: Uuid, limit: i64) -> Result<Vec<SyncLog>, DatabaseError>;
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn upsert_metric(&self, metric: &AdMetric) -> Result<MetricWrite, DatabaseError>;
}

/// Expiring advisory leases that keep two runs of the same scope apart
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease if it is free or expired
    async fn try_acquire_lease(&self, scope: &str, holder: Uuid, ttl: Duration) -> Result<bool, DatabaseError>;

    /// Releases the lease if `holder` still owns it
    async fn release_lease(&self, scope: &str, holder: Uuid) -> Result<(), DatabaseError>;
}

/// Everything the service persists
pub trait Store: MembershipStore + IntegrationStore + SyncLogStore + MetricStore + LeaseStore {}

impl<T> Store for T where T: MembershipStore + IntegrationStore + SyncLogStore + MetricStore + LeaseStore {}
