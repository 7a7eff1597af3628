//! Strongly-typed identifiers used across the offline layer.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Prefix carried by every identifier minted on this device.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Identifier of a queued mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

/// Key sent with every replay so the backend can drop duplicate deliveries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OperationId, "OperationId");
impl_uuid_newtype!(IdempotencyKey, "IdempotencyKey");

/// Identifier of a record in one of the backend collections.
///
/// Either minted locally (`local_<uuid>`) while the backend is unreachable,
/// or assigned by the backend. The two spaces never overlap, so a record id
/// alone tells whether it still needs translating before replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Mint a fresh local identifier.
    pub fn new_local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Wrap an identifier handed out by the backend.
    pub fn remote(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("RecordId: empty"));
        }
        if trimmed == LOCAL_ID_PREFIX {
            return Err(DomainError::invalid_id("RecordId: missing local suffix"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_prefixed_and_unique() {
        let a = RecordId::new_local();
        let b = RecordId::new_local();

        assert!(a.is_local());
        assert!(a.as_str().starts_with(LOCAL_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn remote_ids_are_not_local() {
        let id = RecordId::remote("8d1f0c4e-2b7a-4c4e-9a55-0d7d1f4bb2a1");
        assert!(!id.is_local());
    }

    #[test]
    fn parse_rejects_empty_and_bare_prefix() {
        assert!("".parse::<RecordId>().is_err());
        assert!("   ".parse::<RecordId>().is_err());
        assert!("local_".parse::<RecordId>().is_err());
        assert_eq!("42".parse::<RecordId>().unwrap(), RecordId::remote("42"));
    }

    #[test]
    fn record_id_serializes_as_plain_string() {
        let id = RecordId::remote("abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc"));
    }

    #[test]
    fn operation_id_parses_its_display_form() {
        let id = OperationId::new();
        let parsed: OperationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<OperationId>().is_err());
    }
}
