use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{
    AdMetric, Company, Integration, IntegrationOwner, Membership, MetricWrite, NewIntegration, SyncCounts,
    SyncErrorDetail, SyncLog, SyncStatus,
};
use super::store::{IntegrationStore, LeaseStore, MembershipStore, MetricStore, SyncLogStore};

const INTEGRATION_COLUMNS: &str = r#"
    id, user_id, company_id, platform, account_id, account_name,
    access_token, refresh_token, is_active, created_at, updated_at
"#;

const SYNC_LOG_COLUMNS: &str = r#"
    id, integration_id, company_id, status,
    records_processed, records_created, records_updated, records_failed,
    error, started_at, completed_at, created_at
"#;

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn membership_from_row(row: &PgRow) -> Result<Membership, DatabaseError> {
    let role: String = row.try_get("role")?;
    Ok(Membership {
        user_id: row.try_get("user_id")?,
        company_id: row.try_get("company_id")?,
        role: role.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn integration_from_row(row: &PgRow) -> Result<Integration, DatabaseError> {
    let id: Uuid = row.try_get("id")?;
    let owner = IntegrationOwner::from_columns(row.try_get("user_id")?, row.try_get("company_id")?)
        .ok_or_else(|| DatabaseError::Corrupt(format!("integration {} has no single owner", id)))?;
    let platform: String = row.try_get("platform")?;

    Ok(Integration {
        id,
        owner,
        platform: platform.parse()?,
        account_id: row.try_get("account_id")?,
        account_name: row.try_get("account_name")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn sync_log_from_row(row: &PgRow) -> Result<SyncLog, DatabaseError> {
    let status: String = row.try_get("status")?;
    let error: Option<serde_json::Value> = row.try_get("error")?;
    let error = error
        .map(serde_json::from_value::<SyncErrorDetail>)
        .transpose()
        .map_err(|e| DatabaseError::Corrupt(format!("sync log error payload: {}", e)))?;

    Ok(SyncLog {
        id: row.try_get("id")?,
        integration_id: row.try_get("integration_id")?,
        company_id: row.try_get("company_id")?,
        status: status.parse()?,
        records_processed: row.try_get("records_processed")?,
        records_created: row.try_get("records_created")?,
        records_updated: row.try_get("records_updated")?,
        records_failed: row.try_get("records_failed")?,
        error,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn find_membership(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Membership>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, company_id, role, created_at
            FROM memberships
            WHERE user_id = $1 AND company_id = $2
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }

    async fn list_companies(&self, user_id: Uuid) -> Result<Vec<Company>, DatabaseError> {
        let companies = sqlx::query_as::<_, Company>(
            r#"
            SELECT c.id, c.name, c.created_at
            FROM memberships m
            JOIN companies c ON c.id = m.company_id
            WHERE m.user_id = $1
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(companies)
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, DatabaseError> {
        let company = sqlx::query_as::<_, Company>("SELECT id, name, created_at FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(company)
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn upsert_integration(&self, new: NewIntegration) -> Result<Integration, DatabaseError> {
        let conflict_target = match new.owner {
            IntegrationOwner::User(_) => "(user_id, platform, account_id) WHERE user_id IS NOT NULL",
            IntegrationOwner::Company(_) => "(company_id, platform, account_id) WHERE company_id IS NOT NULL",
        };
        let sql = format!(
            r#"
            INSERT INTO integrations
                (id, user_id, company_id, platform, account_id, account_name, access_token, refresh_token, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true)
            ON CONFLICT {}
            DO UPDATE SET
                account_name = EXCLUDED.account_name,
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, integrations.refresh_token),
                is_active = true,
                updated_at = now()
            RETURNING {}
            "#,
            conflict_target, INTEGRATION_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(new.owner.user_id())
            .bind(new.owner.company_id())
            .bind(new.platform.as_str())
            .bind(&new.account_id)
            .bind(&new.account_name)
            .bind(&new.access_token)
            .bind(&new.refresh_token)
            .fetch_one(&self.pool)
            .await?;

        integration_from_row(&row)
    }

    async fn find_integration(&self, id: Uuid) -> Result<Option<Integration>, DatabaseError> {
        let sql = format!("SELECT {} FROM integrations WHERE id = $1", INTEGRATION_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(integration_from_row).transpose()
    }

    async fn list_integrations(&self, owner: IntegrationOwner) -> Result<Vec<Integration>, DatabaseError> {
        let (column, id) = match owner {
            IntegrationOwner::User(id) => ("user_id", id),
            IntegrationOwner::Company(id) => ("company_id", id),
        };
        let sql = format!(
            "SELECT {} FROM integrations WHERE {} = $1 ORDER BY created_at ASC",
            INTEGRATION_COLUMNS, column
        );
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        rows.iter().map(integration_from_row).collect()
    }

    async fn list_active_integrations(&self) -> Result<Vec<Integration>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM integrations WHERE is_active = true ORDER BY created_at ASC",
            INTEGRATION_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(integration_from_row).collect()
    }

    async fn deactivate_integration(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE integrations SET is_active = false, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SyncLogStore for PgStore {
    async fn create_sync_log(&self, integration_id: Uuid, company_id: Option<Uuid>) -> Result<SyncLog, DatabaseError> {
        let sql = format!(
            r#"
            INSERT INTO sync_logs (id, integration_id, company_id, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            SYNC_LOG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(integration_id)
            .bind(company_id)
            .bind(SyncStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;

        sync_log_from_row(&row)
    }

    async fn transition_sync_log(
        &self,
        id: Uuid,
        next: SyncStatus,
        counts: SyncCounts,
        error: Option<SyncErrorDetail>,
    ) -> Result<Option<SyncLog>, DatabaseError> {
        let allowed_from: Vec<String> = SyncStatus::predecessors(next)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let error = error
            .map(|detail| serde_json::to_value(&detail))
            .transpose()
            .map_err(|e| DatabaseError::Corrupt(format!("sync log error payload: {}", e)))?;
        let now = Utc::now();

        // Compare-and-set on status keeps terminal rows immutable
        let sql = format!(
            r#"
            UPDATE sync_logs SET
                status = $2,
                records_processed = $3,
                records_created = $4,
                records_updated = $5,
                records_failed = $6,
                error = COALESCE($7, error),
                started_at = CASE WHEN $2 = 'IN_PROGRESS' THEN $8 ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('PENDING', 'IN_PROGRESS') THEN completed_at ELSE $8 END
            WHERE id = $1 AND status = ANY($9)
            RETURNING {}
            "#,
            SYNC_LOG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(counts.processed)
            .bind(counts.created)
            .bind(counts.updated)
            .bind(counts.failed)
            .bind(error)
            .bind(now)
            .bind(&allowed_from)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sync_log_from_row).transpose()
    }

    async fn find_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>, DatabaseError> {
        let sql = format!("SELECT {} FROM sync_logs WHERE id = $1", SYNC_LOG_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(sync_log_from_row).transpose()
    }

    async fn list_sync_logs(&self, company_id: Uuid, limit: i64) -> Result<Vec<SyncLog>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM sync_logs WHERE company_id = $1 ORDER BY created_at DESC LIMIT $2",
            SYNC_LOG_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(company_id).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(sync_log_from_row).collect()
    }
}

#[async_trait]
impl MetricStore for PgStore {
    async fn upsert_metric(&self, metric: &AdMetric) -> Result<MetricWrite, DatabaseError> {
        // xmax is 0 only for freshly inserted tuples
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO ad_metrics
                (integration_id, campaign_id, campaign_name, date, impressions, clicks, spend, conversions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (integration_id, campaign_id, date)
            DO UPDATE SET
                campaign_name = EXCLUDED.campaign_name,
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks,
                spend = EXCLUDED.spend,
                conversions = EXCLUDED.conversions,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(metric.integration_id)
        .bind(&metric.campaign_id)
        .bind(&metric.campaign_name)
        .bind(metric.date)
        .bind(metric.impressions)
        .bind(metric.clicks)
        .bind(metric.spend)
        .bind(metric.conversions)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted { MetricWrite::Created } else { MetricWrite::Updated })
    }
}

#[async_trait]
impl LeaseStore for PgStore {
    async fn try_acquire_lease(&self, scope: &str, holder: Uuid, ttl: Duration) -> Result<bool, DatabaseError> {
        let expires_at = Utc::now() + ttl;
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO sync_leases (scope, holder, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope)
            DO UPDATE SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE sync_leases.expires_at <= now()
            RETURNING holder
            "#,
        )
        .bind(scope)
        .bind(holder)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired == Some(holder))
    }

    async fn release_lease(&self, scope: &str, holder: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM sync_leases WHERE scope = $1 AND holder = $2")
            .bind(scope)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
