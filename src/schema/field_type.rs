use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberType {
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
}

/// Declared semantic type of a field.
///
/// Once registered a field's type is immutable for the life of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Keyword,
    Number(NumberType),
    Boolean,
    Date,
    GeoPoint,
    Email,
    Url,
    Phone,
    Object,
}

impl FieldType {
    /// Fields analyzed into terms. Geo-points and objects are not.
    pub fn is_indexed(&self) -> bool {
        !matches!(self, FieldType::GeoPoint | FieldType::Object)
    }

    /// Fields the `*` field wildcard fans out across.
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Email | FieldType::Url | FieldType::Phone
        )
    }

    /// Fields legal as aggregation targets.
    pub fn is_facetable(&self) -> bool {
        matches!(
            self,
            FieldType::Keyword | FieldType::Number(_) | FieldType::Boolean | FieldType::Date
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Number(NumberType::Byte) => "byte",
            FieldType::Number(NumberType::Short) => "short",
            FieldType::Number(NumberType::Integer) => "integer",
            FieldType::Number(NumberType::Long) => "long",
            FieldType::Number(NumberType::Float) => "float",
            FieldType::Number(NumberType::Double) => "double",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::GeoPoint => "geo_point",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Phone => "phone",
            FieldType::Object => "object",
        };
        write!(f, "{}", name)
    }
}
