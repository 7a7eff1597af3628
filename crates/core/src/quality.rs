use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
    Pending,
}

impl core::str::FromStr for TestResult {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(TestResult::Pass),
            "fail" => Ok(TestResult::Fail),
            "pending" => Ok(TestResult::Pending),
            other => Err(DomainError::validation(format!("unknown test result '{other}'"))),
        }
    }
}

/// Inspection performed on a product (row in `quality_tests`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTest {
    pub id: RecordId,
    pub product_id: RecordId,
    pub test_type: String,
    pub result: TestResult,
    pub inspector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl Record for QualityTest {
    const COLLECTION: Collection = Collection::QualityTests;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQualityTest {
    pub product_id: RecordId,
    pub test_type: String,
    pub result: TestResult,
    pub inspector: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewQualityTest {
    pub fn validate(&self) -> DomainResult<()> {
        require("test_type", &self.test_type)?;
        require("inspector", &self.inspector)
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<QualityTest> {
        self.validate()?;
        Ok(QualityTest {
            id,
            product_id: self.product_id,
            test_type: self.test_type,
            result: self.result,
            inspector: self.inspector,
            notes: self.notes,
            tested_at: now,
        })
    }
}
