//! Record trait: identity + the collection a record lives in.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::collection::Collection;
use crate::id::RecordId;

/// A row in one of the backend collections.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection the record is stored in.
    const COLLECTION: Collection;

    /// Returns the record identifier.
    fn id(&self) -> &RecordId;

    /// Parent record this one refers to (e.g. a shipment's product), if any.
    fn parent_id(&self) -> Option<&RecordId> {
        None
    }
}
