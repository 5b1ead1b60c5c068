// Attribute extractor: land-register XML -> RawAttributeRecord

use crate::error::Result;
use crate::parcel::{OwnerRecord, RawAttributeRecord};
use crate::parser::{self, SourceParser, SourceType};
use roxmltree::Node;
use std::path::Path;

/// Land register element names (local names; namespaces are ignored).
pub mod tags {
    pub const RECORD: &str = "土地標示部";
    pub const CITY: &str = "縣市";
    pub const DISTRICT: &str = "鄉鎮市區";
    pub const SECTION_CODE: &str = "段代碼";
    pub const SECTION_NAME: &str = "段小段";
    pub const PARCEL_NO: &str = "地號";
    pub const AREA: &str = "登記面積";
    pub const LAND_USE_ZONE: &str = "使用分區";
    pub const LAND_USE_TYPE: &str = "使用地類別";
    pub const ANNOUNCED_VALUE: &str = "公告現值";
    pub const ANNOUNCED_LAND_PRICE: &str = "公告地價";

    pub const OWNER: &str = "所有權人";
    pub const OWNER_NAME: &str = "所有權人名稱";
    pub const OWNER_ID: &str = "統一編號";
    pub const OWNER_TYPE: &str = "所有權人類別";
    pub const RIGHT_RANGE_TYPE: &str = "權利範圍類別";
    pub const RIGHT_DENOMINATOR: &str = "權利範圍持分分母";
    pub const RIGHT_NUMERATOR: &str = "權利範圍持分分子";
    pub const DECLARED_LAND_PRICE: &str = "申報地價";
    pub const MANAGER_NAME: &str = "管理者名稱";
}

/// Reads every parcel record of an attribute document, in document order.
///
/// Only a document that cannot be parsed at all is an error. Individual
/// fields that are missing, blank or not numeric are simply left unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeExtractor;

impl AttributeExtractor {
    pub fn new() -> Self {
        AttributeExtractor
    }

    fn read_record(&self, node: Node) -> RawAttributeRecord {
        RawAttributeRecord {
            city: parser::child_text(node, tags::CITY),
            district: parser::child_text(node, tags::DISTRICT),
            section_code: parser::child_text(node, tags::SECTION_CODE),
            section_name: parser::child_text(node, tags::SECTION_NAME),
            parcel_no: parser::child_text(node, tags::PARCEL_NO).unwrap_or_default(),
            area: parser::child_decimal(node, tags::AREA),
            land_use_zone: parser::child_text(node, tags::LAND_USE_ZONE),
            land_use_type: parser::child_text(node, tags::LAND_USE_TYPE),
            announced_value: parser::child_int(node, tags::ANNOUNCED_VALUE),
            announced_land_price: parser::child_int(node, tags::ANNOUNCED_LAND_PRICE),
            owner: parser::child(node, tags::OWNER).map(|owner| self.read_owner(owner)),
        }
    }

    fn read_owner(&self, node: Node) -> OwnerRecord {
        OwnerRecord {
            name: parser::child_text(node, tags::OWNER_NAME),
            id: parser::child_text(node, tags::OWNER_ID),
            owner_type: parser::child_text(node, tags::OWNER_TYPE),
            right_range_type: parser::child_text(node, tags::RIGHT_RANGE_TYPE),
            right_denominator: parser::child_int(node, tags::RIGHT_DENOMINATOR),
            right_numerator: parser::child_int(node, tags::RIGHT_NUMERATOR),
            declared_land_price: parser::child_int(node, tags::DECLARED_LAND_PRICE),
            manager_name: parser::child_text(node, tags::MANAGER_NAME),
        }
    }
}

impl SourceParser for AttributeExtractor {
    type Output = Vec<RawAttributeRecord>;

    fn parse_str(&self, text: &str, origin: &Path) -> Result<Vec<RawAttributeRecord>> {
        let doc = parser::parse_document(text, origin)?;

        let records = doc
            .descendants()
            .filter(|n| parser::is_element(*n, tags::RECORD))
            .map(|n| self.read_record(n))
            .collect();

        Ok(records)
    }

    fn source_type(&self) -> SourceType {
        SourceType::Attribute
    }
}
