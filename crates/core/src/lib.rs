//! Supply-chain record types shared by the ProTrack offline layer.
//!
//! This crate contains **pure domain** primitives (no IO, no async): record
//! shapes for each backend collection, their identifiers, and the status
//! lifecycles that updates must respect.

pub mod collection;
pub mod compliance;
pub mod entity;
pub mod error;
pub mod id;
pub mod product;
pub mod quality;
pub mod shipment;
pub mod telemetry;
pub mod user;

pub use collection::Collection;
pub use compliance::{ComplianceRecord, ComplianceStatus, NewComplianceRecord};
pub use entity::Record;
pub use error::{DomainError, DomainResult};
pub use id::{IdempotencyKey, OperationId, RecordId};
pub use product::{NewProduct, Product, ProductStatus};
pub use quality::{NewQualityTest, QualityTest, TestResult};
pub use shipment::{NewShipment, Shipment, ShipmentStatus};
pub use telemetry::{IoTReading, NewIoTReading, SensorKind};
pub use user::{NewUser, User, UserRole};
