use crate::geometry::Ring;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parcel's tabular fields as read from an attribute document.
///
/// Every field except `parcel_no` is optional: a missing or unparseable
/// source element leaves the field `None`, never a zero or empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttributeRecord {
    pub city: Option<String>,
    pub district: Option<String>,
    pub section_code: Option<String>,
    pub section_name: Option<String>,
    /// Raw parcel number as written in the source; empty when the element is absent
    pub parcel_no: String,
    /// Registered area in square metres
    pub area: Option<f64>,
    pub land_use_zone: Option<String>,
    pub land_use_type: Option<String>,
    /// Announced current value per square metre
    pub announced_value: Option<i64>,
    /// Announced land price per square metre
    pub announced_land_price: Option<i64>,
    pub owner: Option<OwnerRecord>,
}

/// Owner sub-record; present only when the source carried an owner element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub name: Option<String>,
    pub id: Option<String>,
    pub owner_type: Option<String>,
    pub right_range_type: Option<String>,
    pub right_denominator: Option<i64>,
    pub right_numerator: Option<i64>,
    pub declared_land_price: Option<i64>,
    pub manager_name: Option<String>,
}

impl RawAttributeRecord {
    pub fn new(parcel_no: impl Into<String>) -> Self {
        RawAttributeRecord {
            parcel_no: parcel_no.into(),
            ..Default::default()
        }
    }

    /// Owner fields flattened for persistence; all `None` when there is no owner.
    pub fn owner_fields(&self) -> OwnerRecord {
        self.owner.clone().unwrap_or_default()
    }

    pub fn has_parcel_no(&self) -> bool {
        !self.parcel_no.is_empty()
    }
}

/// A reconciled parcel ready for persistence: attributes plus a closed ring.
///
/// Identity and creation time are assigned by the store, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalParcel {
    pub record: RawAttributeRecord,
    pub boundary: Ring,
}

impl CanonicalParcel {
    pub fn new(record: RawAttributeRecord, boundary: Ring) -> Self {
        CanonicalParcel { record, boundary }
    }

    pub fn parcel_no(&self) -> &str {
        &self.record.parcel_no
    }
}

/// A parcel as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredParcel {
    pub id: i64,
    pub parcel_uuid: String,
    pub created_at: DateTime<Utc>,
    pub source_file: Option<String>,
    #[serde(flatten)]
    pub record: RawAttributeRecord,
    #[serde(skip)]
    pub boundary: Option<Ring>,
}
