//! IoT sensor readings attached to products (`iot_data`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Location,
    Shock,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Location => "location",
            SensorKind::Shock => "shock",
        }
    }
}

impl core::str::FromStr for SensorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(SensorKind::Temperature),
            "humidity" => Ok(SensorKind::Humidity),
            "location" => Ok(SensorKind::Location),
            "shock" => Ok(SensorKind::Shock),
            other => Err(DomainError::invalid_id(format!("unknown sensor '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoTReading {
    pub id: RecordId,
    pub product_id: RecordId,
    pub device_id: String,
    pub sensor: SensorKind,
    pub value: f64,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
}

impl Record for IoTReading {
    const COLLECTION: Collection = Collection::IotData;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIoTReading {
    pub product_id: RecordId,
    pub device_id: String,
    pub sensor: SensorKind,
    pub value: f64,
    pub unit: String,
    /// Defaults to the time the reading is stored.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewIoTReading {
    pub fn validate(&self) -> DomainResult<()> {
        require("device_id", &self.device_id)?;
        require("unit", &self.unit)?;
        if !self.value.is_finite() {
            return Err(DomainError::validation("value must be a finite number"));
        }
        if self.sensor == SensorKind::Humidity && !(0.0..=100.0).contains(&self.value) {
            return Err(DomainError::validation(
                "humidity must be between 0 and 100 percent",
            ));
        }
        Ok(())
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<IoTReading> {
        self.validate()?;
        Ok(IoTReading {
            id,
            product_id: self.product_id,
            device_id: self.device_id,
            sensor: self.sensor,
            value: self.value,
            unit: self.unit,
            recorded_at: self.recorded_at.unwrap_or(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor: SensorKind, value: f64) -> NewIoTReading {
        NewIoTReading {
            product_id: RecordId::remote("p-1"),
            device_id: "sensor-7".to_string(),
            sensor,
            value,
            unit: "C".to_string(),
            recorded_at: None,
        }
    }

    #[test]
    fn recorded_at_defaults_to_now() {
        let now = Utc::now();
        let r = reading(SensorKind::Temperature, 4.5)
            .into_record(RecordId::new_local(), now)
            .unwrap();
        assert_eq!(r.recorded_at, now);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(reading(SensorKind::Temperature, f64::NAN).validate().is_err());
        assert!(reading(SensorKind::Shock, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn humidity_is_a_percentage() {
        assert!(reading(SensorKind::Humidity, 55.0).validate().is_ok());
        assert!(reading(SensorKind::Humidity, 120.0).validate().is_err());
    }
}
