//! Deterministic demo fixtures.
//!
//! Same records, ids and timestamps on every call, so demo screens and tests
//! can refer to them by id. Fixture ids (`demo_*`) are neither local
//! (`local_*`) nor backend-assigned, and they are never queued for replay.

use chrono::{DateTime, TimeDelta, Utc};
use protrack_core::{
    Collection, ComplianceRecord, ComplianceStatus, IoTReading, Product, ProductStatus,
    QualityTest, RecordId, SensorKind, Shipment, ShipmentStatus, TestResult, User, UserRole,
};
use serde::Serialize;
use serde_json::Value;

/// 2024-01-15T08:00:00Z
const BASE_TIMESTAMP: i64 = 1_705_305_600;

fn at(hours: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(BASE_TIMESTAMP) + TimeDelta::hours(hours)
}

fn id(raw: &str) -> RecordId {
    RecordId::remote(raw)
}

pub fn products() -> Vec<Product> {
    let product = |n: u32, name: &str, category: &str, origin: &str, status, hours| Product {
        id: id(&format!("demo_product_{n}")),
        name: name.to_string(),
        description: format!("{name} (demo batch)"),
        category: category.to_string(),
        batch_number: format!("BATCH-2024-{n:03}"),
        manufacturer: "ProTrack Demo Manufacturing".to_string(),
        origin: origin.to_string(),
        status,
        rfid_tag: Some(format!("RFID-{n:06}")),
        created_at: at(0),
        updated_at: at(hours),
    };

    vec![
        product(1, "Organic Coffee Beans", "food", "Colombia", ProductStatus::Delivered, 96),
        product(2, "Insulin Pens", "pharmaceutical", "Denmark", ProductStatus::InTransit, 48),
        product(3, "Lithium Cells", "electronics", "South Korea", ProductStatus::Packaged, 12),
        product(4, "Merino Wool Yarn", "textiles", "New Zealand", ProductStatus::Manufactured, 0),
    ]
}

pub fn shipments() -> Vec<Shipment> {
    let shipment = |n: u32, product: u32, from: &str, to: &str, status, hours| Shipment {
        id: id(&format!("demo_shipment_{n}")),
        product_id: id(&format!("demo_product_{product}")),
        origin: from.to_string(),
        destination: to.to_string(),
        carrier: "Demo Freight".to_string(),
        tracking_number: format!("TRK{n:08}"),
        status,
        estimated_arrival: Some(at(120)),
        created_at: at(2),
        updated_at: at(hours),
    };

    vec![
        shipment(1, 1, "Bogotá", "Rotterdam", ShipmentStatus::Delivered, 96),
        shipment(2, 2, "Copenhagen", "Boston", ShipmentStatus::InTransit, 48),
        shipment(3, 3, "Busan", "Los Angeles", ShipmentStatus::Delayed, 30),
    ]
}

pub fn iot_readings() -> Vec<IoTReading> {
    let reading = |n: u32, product: u32, sensor, value, unit: &str, hours| IoTReading {
        id: id(&format!("demo_iot_{n}")),
        product_id: id(&format!("demo_product_{product}")),
        device_id: format!("SENSOR-{product:03}"),
        sensor,
        value,
        unit: unit.to_string(),
        recorded_at: at(hours),
    };

    vec![
        reading(1, 2, SensorKind::Temperature, 4.5, "celsius", 24),
        reading(2, 2, SensorKind::Temperature, 5.1, "celsius", 36),
        reading(3, 2, SensorKind::Humidity, 41.0, "percent", 36),
        reading(4, 3, SensorKind::Shock, 2.3, "g", 28),
    ]
}

pub fn quality_tests() -> Vec<QualityTest> {
    let test = |n: u32, product: u32, test_type: &str, result, notes: Option<&str>| QualityTest {
        id: id(&format!("demo_quality_{n}")),
        product_id: id(&format!("demo_product_{product}")),
        test_type: test_type.to_string(),
        result,
        inspector: "Demo Inspector".to_string(),
        notes: notes.map(str::to_string),
        tested_at: at(6),
    };

    vec![
        test(1, 1, "moisture_content", TestResult::Pass, None),
        test(2, 2, "sterility", TestResult::Pass, Some("lot released")),
        test(3, 3, "capacity", TestResult::Pending, None),
    ]
}

pub fn compliance_records() -> Vec<ComplianceRecord> {
    let record = |n: u32, product: u32, standard: &str, status, cert: Option<&str>| {
        ComplianceRecord {
            id: id(&format!("demo_compliance_{n}")),
            product_id: id(&format!("demo_product_{product}")),
            standard: standard.to_string(),
            status,
            certificate_number: cert.map(str::to_string),
            issued_at: at(8),
            expires_at: Some(at(8 + 24 * 365)),
        }
    };

    vec![
        record(1, 1, "USDA Organic", ComplianceStatus::Compliant, Some("ORG-2024-0001")),
        record(2, 2, "EU GMP", ComplianceStatus::Compliant, Some("GMP-DK-7731")),
        record(3, 3, "UN 38.3", ComplianceStatus::PendingReview, None),
    ]
}

pub fn users() -> Vec<User> {
    let user = |n: u32, email: &str, name: &str, role| User {
        id: id(&format!("demo_user_{n}")),
        email: email.to_string(),
        display_name: name.to_string(),
        role,
        created_at: at(0),
    };

    vec![
        user(1, "maker@protrack.demo", "Demo Manufacturer", UserRole::Manufacturer),
        user(2, "shipper@protrack.demo", "Demo Distributor", UserRole::Distributor),
        user(3, "inspector@protrack.demo", "Demo Inspector", UserRole::Inspector),
    ]
}

/// Fixture rows of `collection`, as the mirror stores them.
pub fn records(collection: Collection) -> Vec<(RecordId, Value)> {
    fn rows<T: Serialize>(items: Vec<T>, id: impl Fn(&T) -> RecordId) -> Vec<(RecordId, Value)> {
        items
            .into_iter()
            .filter_map(|item| {
                let rid = id(&item);
                serde_json::to_value(&item).ok().map(|v| (rid, v))
            })
            .collect()
    }

    match collection {
        Collection::Products => rows(products(), |r| r.id.clone()),
        Collection::Shipments => rows(shipments(), |r| r.id.clone()),
        Collection::IotData => rows(iot_readings(), |r| r.id.clone()),
        Collection::QualityTests => rows(quality_tests(), |r| r.id.clone()),
        Collection::ComplianceRecords => rows(compliance_records(), |r| r.id.clone()),
        Collection::Users => rows(users(), |r| r.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_deterministic() {
        assert_eq!(products(), products());
        assert_eq!(shipments(), shipments());
        assert_eq!(records(Collection::IotData), records(Collection::IotData));
    }

    #[test]
    fn fixture_ids_are_not_local() {
        for collection in Collection::ALL {
            for (id, row) in records(collection) {
                assert!(!id.is_local(), "{collection}: {id}");
                assert_eq!(row["id"], id.as_str());
            }
        }
    }

    #[test]
    fn children_point_at_fixture_products() {
        let product_ids: Vec<_> = products().into_iter().map(|p| p.id).collect();
        for shipment in shipments() {
            assert!(product_ids.contains(&shipment.product_id));
        }
        for reading in iot_readings() {
            assert!(product_ids.contains(&reading.product_id));
        }
    }

    #[test]
    fn base_timestamp_is_mid_january_2024() {
        assert_eq!(at(0).to_rfc3339(), "2024-01-15T08:00:00+00:00");
    }
}
