use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    PendingReview,
}

impl core::str::FromStr for ComplianceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compliant" => Ok(ComplianceStatus::Compliant),
            "non_compliant" => Ok(ComplianceStatus::NonCompliant),
            "pending_review" => Ok(ComplianceStatus::PendingReview),
            other => Err(DomainError::validation(format!(
                "unknown compliance status '{other}'"
            ))),
        }
    }
}

/// Regulatory standard a product was checked against (`compliance_records`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub id: RecordId,
    pub product_id: RecordId,
    pub standard: String,
    pub status: ComplianceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_number: Option<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ComplianceRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl Record for ComplianceRecord {
    const COLLECTION: Collection = Collection::ComplianceRecords;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComplianceRecord {
    pub product_id: RecordId,
    pub standard: String,
    pub status: ComplianceStatus,
    #[serde(default)]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewComplianceRecord {
    pub fn validate(&self) -> DomainResult<()> {
        require("standard", &self.standard)?;
        if self.status == ComplianceStatus::Compliant
            && self
                .certificate_number
                .as_deref()
                .is_none_or(|c| c.trim().is_empty())
        {
            return Err(DomainError::validation(
                "compliant records require a certificate_number",
            ));
        }
        Ok(())
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<ComplianceRecord> {
        self.validate()?;
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(DomainError::validation("expires_at must be in the future"));
            }
        }
        Ok(ComplianceRecord {
            id,
            product_id: self.product_id,
            standard: self.standard,
            status: self.status,
            certificate_number: self.certificate_number,
            issued_at: now,
            expires_at: self.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input(status: ComplianceStatus, cert: Option<&str>) -> NewComplianceRecord {
        NewComplianceRecord {
            product_id: RecordId::remote("p-1"),
            standard: "ISO 22000".to_string(),
            status,
            certificate_number: cert.map(str::to_string),
            expires_at: None,
        }
    }

    #[test]
    fn compliant_records_need_a_certificate() {
        assert!(input(ComplianceStatus::Compliant, None).validate().is_err());
        assert!(input(ComplianceStatus::Compliant, Some(" ")).validate().is_err());
        assert!(input(ComplianceStatus::Compliant, Some("CERT-9")).validate().is_ok());
        assert!(input(ComplianceStatus::PendingReview, None).validate().is_ok());
    }

    #[test]
    fn expiry_is_checked_against_issue_time() {
        let now = Utc::now();
        let mut past = input(ComplianceStatus::PendingReview, None);
        past.expires_at = Some(now - Duration::days(1));
        assert!(past.into_record(RecordId::new_local(), now).is_err());

        let mut future = input(ComplianceStatus::PendingReview, None);
        future.expires_at = Some(now + Duration::days(30));
        let record = future.into_record(RecordId::new_local(), now).unwrap();
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::days(31)));
    }
}
