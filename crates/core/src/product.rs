use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::collection::Collection;
use crate::entity::Record;
use crate::error::{DomainError, DomainResult, require};
use crate::id::RecordId;

/// Product status lifecycle.
///
/// Products move one step at a time: manufactured, packaged, in transit,
/// delivered. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Manufactured,
    Packaged,
    InTransit,
    Delivered,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Manufactured => "manufactured",
            ProductStatus::Packaged => "packaged",
            ProductStatus::InTransit => "in_transit",
            ProductStatus::Delivered => "delivered",
        }
    }

    /// The only status this one may advance to.
    pub fn next(&self) -> Option<ProductStatus> {
        match self {
            ProductStatus::Manufactured => Some(ProductStatus::Packaged),
            ProductStatus::Packaged => Some(ProductStatus::InTransit),
            ProductStatus::InTransit => Some(ProductStatus::Delivered),
            ProductStatus::Delivered => None,
        }
    }

    pub fn can_transition_to(&self, target: ProductStatus) -> bool {
        self.next() == Some(target)
    }
}

impl FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manufactured" => Ok(ProductStatus::Manufactured),
            "packaged" => Ok(ProductStatus::Packaged),
            "in_transit" => Ok(ProductStatus::InTransit),
            "delivered" => Ok(ProductStatus::Delivered),
            other => Err(DomainError::invalid_id(format!(
                "unknown product status '{other}'"
            ))),
        }
    }
}

/// A tracked product (row in `products`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub batch_number: String,
    pub manufacturer: String,
    #[serde(default)]
    pub origin: String,
    pub status: ProductStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfid_tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Advance the product to `to`, enforcing the lifecycle.
    pub fn transition(&mut self, to: ProductStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(format!(
                "product {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Patch body describing the current status (used for update replays).
    pub fn status_patch(&self) -> Value {
        json!({
            "status": self.status,
            "updated_at": self.updated_at,
        })
    }
}

impl Record for Product {
    const COLLECTION: Collection = Collection::Products;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

/// Fields supplied by the caller when registering a product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub batch_number: String,
    pub manufacturer: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub rfid_tag: Option<String>,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        require("name", &self.name)?;
        require("batch_number", &self.batch_number)?;
        require("manufacturer", &self.manufacturer)?;
        if let Some(tag) = &self.rfid_tag {
            require("rfid_tag", tag)?;
        }
        Ok(())
    }

    /// Build the record under `id`; every product starts as manufactured.
    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> DomainResult<Product> {
        self.validate()?;
        Ok(Product {
            id,
            name: self.name,
            description: self.description,
            category: self.category,
            batch_number: self.batch_number,
            manufacturer: self.manufacturer,
            origin: self.origin,
            status: ProductStatus::Manufactured,
            rfid_tag: self.rfid_tag,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product() -> NewProduct {
        NewProduct {
            name: "Organic Coffee Beans".to_string(),
            description: "Single origin arabica".to_string(),
            category: "food".to_string(),
            batch_number: "BATCH-001".to_string(),
            manufacturer: "Andes Growers".to_string(),
            origin: "Colombia".to_string(),
            rfid_tag: None,
        }
    }

    #[test]
    fn new_product_starts_manufactured() {
        let now = Utc::now();
        let product = new_product()
            .into_record(RecordId::new_local(), now)
            .unwrap();

        assert_eq!(product.status, ProductStatus::Manufactured);
        assert_eq!(product.created_at, now);
        assert!(product.id.is_local());
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let mut input = new_product();
        input.batch_number = "  ".to_string();

        let err = input.into_record(RecordId::new_local(), Utc::now()).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("batch_number") => {}
            _ => panic!("Expected Validation error for batch_number"),
        }
    }

    #[test]
    fn lifecycle_advances_one_step_at_a_time() {
        let mut product = new_product()
            .into_record(RecordId::new_local(), Utc::now())
            .unwrap();

        product.transition(ProductStatus::Packaged, Utc::now()).unwrap();
        product.transition(ProductStatus::InTransit, Utc::now()).unwrap();
        product.transition(ProductStatus::Delivered, Utc::now()).unwrap();
        assert_eq!(product.status, ProductStatus::Delivered);
        assert_eq!(product.status.next(), None);
    }

    #[test]
    fn skipping_or_repeating_a_status_is_rejected() {
        let mut product = new_product()
            .into_record(RecordId::new_local(), Utc::now())
            .unwrap();

        assert!(matches!(
            product.transition(ProductStatus::Delivered, Utc::now()),
            Err(DomainError::InvalidTransition(_))
        ));
        assert!(matches!(
            product.transition(ProductStatus::Manufactured, Utc::now()),
            Err(DomainError::InvalidTransition(_))
        ));
        assert_eq!(product.status, ProductStatus::Manufactured);
    }

    #[test]
    fn status_serializes_in_snake_case() {
        assert_eq!(
            serde_json::to_value(ProductStatus::InTransit).unwrap(),
            serde_json::json!("in_transit")
        );
        assert_eq!("in_transit".parse::<ProductStatus>().unwrap(), ProductStatus::InTransit);
    }

    #[test]
    fn backend_rows_with_extra_columns_still_decode() {
        let now = Utc::now();
        let product = new_product().into_record(RecordId::remote("17"), now).unwrap();
        let mut row = serde_json::to_value(&product).unwrap();
        row["client_ref"] = serde_json::json!("local_abc");

        let decoded: Product = serde_json::from_value(row).unwrap();
        assert_eq!(decoded, product);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn status_strategy() -> impl Strategy<Value = ProductStatus> {
            prop_oneof![
                Just(ProductStatus::Manufactured),
                Just(ProductStatus::Packaged),
                Just(ProductStatus::InTransit),
                Just(ProductStatus::Delivered),
            ]
        }

        fn rank(status: ProductStatus) -> u8 {
            match status {
                ProductStatus::Manufactured => 0,
                ProductStatus::Packaged => 1,
                ProductStatus::InTransit => 2,
                ProductStatus::Delivered => 3,
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of moves is attempted, the status
            /// only ever advances by exactly one step.
            #[test]
            fn status_never_moves_backwards(targets in prop::collection::vec(status_strategy(), 0..20)) {
                let mut product = new_product()
                    .into_record(RecordId::new_local(), Utc::now())
                    .unwrap();

                for target in targets {
                    let before = product.status;
                    match product.transition(target, Utc::now()) {
                        Ok(()) => prop_assert_eq!(rank(product.status), rank(before) + 1),
                        Err(_) => prop_assert_eq!(product.status, before),
                    }
                }
            }
        }
    }
}
