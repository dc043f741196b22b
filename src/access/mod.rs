//! Tenant access guard.
//!
//! Every company-scoped operation resolves a [`Membership`] through here first.
//! A missing membership and an unknown company are deliberately the same
//! failure so callers cannot learn which companies exist.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{Company, Membership, Role};
use crate::database::{DatabaseError, MembershipStore};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Access denied")]
    Denied,

    #[error("Insufficient role: {required} required")]
    InsufficientRole { required: Role },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Clone)]
pub struct AccessGuard {
    store: Arc<dyn MembershipStore>,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    /// Resolve the caller's membership in `company_id` or deny
    pub async fn check_access(&self, user_id: Uuid, company_id: Uuid) -> Result<Membership, AccessError> {
        match self.store.find_membership(user_id, company_id).await? {
            Some(membership) => Ok(membership),
            None => {
                tracing::warn!("Access denied: user {} has no membership in company {}", user_id, company_id);
                Err(AccessError::Denied)
            }
        }
    }

    /// Companies the user belongs to, oldest membership first
    pub async fn list_companies(&self, user_id: Uuid) -> Result<Vec<Company>, AccessError> {
        Ok(self.store.list_companies(user_id).await?)
    }

    /// Whether the user's role meets `required`. No membership is `false`, never an error.
    pub async fn has_role(&self, user_id: Uuid, company_id: Uuid, required: Role) -> bool {
        match self.store.find_membership(user_id, company_id).await {
            Ok(Some(membership)) => membership.role.satisfies(required),
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Role lookup failed for user {} in company {}: {}", user_id, company_id, e);
                false
            }
        }
    }

    /// Like [`check_access`](Self::check_access) but also enforces a minimum role
    pub async fn require_role(&self, user_id: Uuid, company_id: Uuid, required: Role) -> Result<Membership, AccessError> {
        let membership = self.check_access(user_id, company_id).await?;
        if membership.role.satisfies(required) {
            Ok(membership)
        } else {
            tracing::warn!(
                "User {} holds {} in company {}, {} required",
                user_id, membership.role, company_id, required
            );
            Err(AccessError::InsufficientRole { required })
        }
    }
}
