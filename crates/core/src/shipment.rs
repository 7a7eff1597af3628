use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

/// Shipment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    Delivered,
    Delayed,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Delayed => "delayed",
        }
    }

    /// `delivered` is terminal; `delayed` can be entered before delivery and
    /// left toward transit or delivery.
    pub fn can_transition_to(&self, target: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!(
            (self, target),
            (Pending, InTransit)
                | (Pending, Delayed)
                | (InTransit, Delivered)
                | (InTransit, Delayed)
                | (Delayed, InTransit)
                | (Delayed, Delivered)
        )
    }
}

impl FromStr for ShipmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShipmentStatus::Pending),
            "in_transit" => Ok(ShipmentStatus::InTransit),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "delayed" => Ok(ShipmentStatus::Delayed),
            other => Err(DomainError::invalid_id(format!(
                "unknown shipment status '{other}'"
            ))),
        }
    }
}

/// Movement of a product between two locations (row in `shipments`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: RecordId,
    pub product_id: RecordId,
    pub origin: String,
    pub destination: String,
    pub carrier: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    pub fn transition(&mut self, to: ShipmentStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(format!(
                "shipment {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn status_patch(&self) -> Value {
        json!({
            "status": self.status,
            "updated_at": self.updated_at,
        })
    }
}

impl Record for Shipment {
    const COLLECTION: Collection = Collection::Shipments;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShipment {
    pub product_id: RecordId,
    pub origin: String,
    pub destination: String,
    pub carrier: String,
    pub tracking_number: String,
    #[serde(default)]
    pub estimated_arrival: Option<DateTime<Utc>>,
}

impl NewShipment {
    pub fn validate(&self) -> DomainResult<()> {
        require("origin", &self.origin)?;
        require("destination", &self.destination)?;
        require("carrier", &self.carrier)?;
        require("tracking_number", &self.tracking_number)?;
        if self.origin.trim() == self.destination.trim() {
            return Err(DomainError::validation(
                "origin and destination must differ",
            ));
        }
        Ok(())
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<Shipment> {
        self.validate()?;
        Ok(Shipment {
            id,
            product_id: self.product_id,
            origin: self.origin,
            destination: self.destination,
            carrier: self.carrier,
            tracking_number: self.tracking_number,
            status: ShipmentStatus::Pending,
            estimated_arrival: self.estimated_arrival,
            created_at: now,
            updated_at: now,
        })
    }
}
