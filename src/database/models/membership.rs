use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Role a user holds within a company.
///
/// Variants are declared lowest privilege first so the derived `Ord`
/// gives owner > manager > analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Analyst,
    Manager,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Analyst => "analyst",
            Role::Manager => "manager",
            Role::Owner => "owner",
        }
    }

    /// Whether this role meets or exceeds `required`
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "manager" => Ok(Role::Manager),
            "analyst" => Ok(Role::Analyst),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

/// Grants a user a role within one company. Unique per (user_id, company_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_totally_ordered() {
        assert!(Role::Owner > Role::Manager);
        assert!(Role::Manager > Role::Analyst);
        assert!(Role::Owner.satisfies(Role::Analyst));
        assert!(Role::Manager.satisfies(Role::Manager));
        assert!(!Role::Analyst.satisfies(Role::Manager));
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [Role::Owner, Role::Manager, Role::Analyst] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }
}
