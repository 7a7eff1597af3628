use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

/// Supply-chain role of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Manufacturer,
    Distributor,
    Retailer,
    Inspector,
    Admin,
}

impl core::str::FromStr for UserRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manufacturer" => Ok(UserRole::Manufacturer),
            "distributor" => Ok(UserRole::Distributor),
            "retailer" => Ok(UserRole::Retailer),
            "inspector" => Ok(UserRole::Inspector),
            "admin" => Ok(UserRole::Admin),
            other => Err(DomainError::validation(format!("unknown user role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: RecordId,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
}

impl NewUser {
    pub fn validate(&self) -> DomainResult<()> {
        require("email", &self.email)?;
        require("display_name", &self.display_name)?;
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(DomainError::validation(format!(
                "'{}' is not a valid email address",
                self.email
            ))),
        }
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<User> {
        self.validate()?;
        Ok(User {
            id,
            email: self.email.trim().to_lowercase(),
            display_name: self.display_name,
            role: self.role,
            created_at: now,
        })
    }
}
