use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "meta")]
    Meta,
    #[serde(rename = "google-ads")]
    GoogleAds,
    #[serde(rename = "ga4")]
    Ga4,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Meta => "meta",
            Platform::GoogleAds => "google-ads",
            Platform::Ga4 => "ga4",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(Platform::Meta),
            "google-ads" => Ok(Platform::GoogleAds),
            "ga4" => Ok(Platform::Ga4),
            other => Err(UnknownVariant { kind: "platform", value: other.to_string() }),
        }
    }
}

/// Who an integration belongs to. Serialized flattened as either
/// `userId` or `companyId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrationOwner {
    #[serde(rename = "userId")]
    User(Uuid),
    #[serde(rename = "companyId")]
    Company(Uuid),
}

impl IntegrationOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            IntegrationOwner::User(id) => Some(*id),
            IntegrationOwner::Company(_) => None,
        }
    }

    pub fn company_id(&self) -> Option<Uuid> {
        match self {
            IntegrationOwner::Company(id) => Some(*id),
            IntegrationOwner::User(_) => None,
        }
    }

    /// Rebuilds the owner from the two nullable columns; exactly one must be set
    pub fn from_columns(user_id: Option<Uuid>, company_id: Option<Uuid>) -> Option<Self> {
        match (user_id, company_id) {
            (Some(user), None) => Some(IntegrationOwner::User(user)),
            (None, Some(company)) => Some(IntegrationOwner::Company(company)),
            _ => None,
        }
    }
}

/// Stored OAuth credential set for one external ad account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: Uuid,
    #[serde(flatten)]
    pub owner: IntegrationOwner,
    pub platform: Platform,
    pub account_id: String,
    pub account_name: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

/// Payload of an OAuth callback; upserted on (owner, platform, account_id)
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub owner: IntegrationOwner,
    pub platform: Platform,
    pub account_id: String,
    pub account_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}
