//! Backend collections (tables) the offline layer reads and writes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Products,
    Shipments,
    IotData,
    QualityTests,
    ComplianceRecords,
    Users,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Products,
        Collection::Shipments,
        Collection::IotData,
        Collection::QualityTests,
        Collection::ComplianceRecords,
        Collection::Users,
    ];

    /// Table name on the backend.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Shipments => "shipments",
            Collection::IotData => "iot_data",
            Collection::QualityTests => "quality_tests",
            Collection::ComplianceRecords => "compliance_records",
            Collection::Users => "users",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.table_name() == s)
            .ok_or_else(|| DomainError::invalid_id(format!("unknown collection '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip_through_from_str() {
        for c in Collection::ALL {
            assert_eq!(c.table_name().parse::<Collection>().unwrap(), c);
        }
        assert!("widgets".parse::<Collection>().is_err());
    }
}
