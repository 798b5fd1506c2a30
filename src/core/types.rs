use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::core::error::{Error, Result};

/// Opaque per-index document identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_string())
    }
}

/// Identifier of one logical collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexName(String);

impl IndexName {
    pub fn new(name: impl Into<String>) -> Self {
        IndexName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IndexName {
    fn from(name: &str) -> Self {
        IndexName(name.to_string())
    }
}

/// A field value, mirroring the JSON shapes documents arrive in.
///
/// Dates and geo-points stay in their surface representation; the mapped
/// [`FieldType`](crate::schema::field_type::FieldType) decides how a value is
/// analyzed and compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
    Array(Vec<FieldValue>),
    Object(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => {
                FieldValue::Array(items.iter().map(FieldValue::from_json).collect())
            }
            Value::Object(map) => FieldValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            FieldValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Text(s) => parse_date(s),
            // Numeric dates are epoch milliseconds.
            FieldValue::Number(n) => Utc.timestamp_millis_opt(*n as i64).single(),
            _ => None,
        }
    }

    /// Interpret the value as a geo-point.
    ///
    /// Accepts `{lat, lon}` objects and two-element arrays. Arrays default to
    /// `[lat, lon]`; when the first component cannot be a latitude but the
    /// second can, the pair is read as `[lon, lat]`.
    pub fn as_geo_point(&self) -> Option<(f64, f64)> {
        match self {
            FieldValue::Object(map) => {
                let lat = map.get("lat").and_then(FieldValue::as_f64)?;
                let lon = map.get("lon").and_then(FieldValue::as_f64)?;
                Some((lat, lon))
            }
            FieldValue::Array(items) if items.len() == 2 => {
                let a = items[0].as_f64()?;
                let b = items[1].as_f64()?;
                if a.abs() > 90.0 && b.abs() <= 90.0 {
                    Some((b, a))
                } else {
                    Some((a, b))
                }
            }
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::Array(_) => "array",
            FieldValue::Object(_) => "object",
        }
    }
}

/// Parse the date formats accepted for `Date` fields.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Canonical text form of a numeric value, shared by the index and query
/// sides so term lookups agree.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// One record in one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: HashMap<String, FieldValue>,
    pub version: u64,
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Document {
            id,
            fields: HashMap::new(),
            version: 1,
        }
    }

    /// Build a document from a JSON object carrying an `id` field.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be a JSON object".into()))?;
        let id = match map.get("id") {
            Some(Value::String(s)) => DocumentId::new(s.clone()),
            Some(Value::Number(n)) => DocumentId::new(n.to_string()),
            _ => return Err(Error::InvalidDocument("missing `id` field".into())),
        };
        if id.is_empty() {
            return Err(Error::InvalidDocument("empty `id` field".into()));
        }
        let mut doc = Document::new(id);
        for (name, v) in map {
            if name == "id" {
                continue;
            }
            doc.fields
                .insert(name.clone(), FieldValue::from_json(v));
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), Value::String(self.id.as_str().to_string()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Resolve a possibly dotted field path against nested objects.
    pub fn field(&self, path: &str) -> Option<&FieldValue> {
        if let Some(v) = self.fields.get(path) {
            return Some(v);
        }
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            match current {
                FieldValue::Object(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

/// Flatten nested objects into dotted leaf paths.
///
/// Arrays stay whole at their leaf; objects recurse one level per dot.
pub fn flatten_fields(fields: &HashMap<String, FieldValue>) -> Vec<(String, &FieldValue)> {
    let mut out = Vec::new();
    for (name, value) in fields {
        flatten_into(name, value, &mut out);
    }
    out
}

fn flatten_into<'a>(path: &str, value: &'a FieldValue, out: &mut Vec<(String, &'a FieldValue)>) {
    match value {
        FieldValue::Object(map) => {
            // A {lat, lon} object is a geo-point leaf, not a nested document.
            if value.as_geo_point().is_some() {
                out.push((path.to_string(), value));
                return;
            }
            for (k, v) in map {
                flatten_into(&format!("{}.{}", path, k), v, out);
            }
        }
        _ => out.push((path.to_string(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_from_json_round_trip() {
        let source = json!({"id": "a", "title": "hello world", "year": 2020});
        let doc = Document::from_json(&source).unwrap();
        assert_eq!(doc.id.as_str(), "a");
        assert_eq!(
            doc.fields.get("title"),
            Some(&FieldValue::Text("hello world".to_string()))
        );
        let back = doc.to_json();
        assert_eq!(back["title"], json!("hello world"));
        assert_eq!(back["year"], json!(2020.0));
    }

    #[test]
    fn test_document_rejects_missing_id() {
        assert!(Document::from_json(&json!({"title": "x"})).is_err());
        assert!(Document::from_json(&json!({"id": "", "title": "x"})).is_err());
    }

    #[test]
    fn test_geo_point_heuristic() {
        let obj = FieldValue::from_json(&json!({"lat": 10.0, "lon": 120.0}));
        assert_eq!(obj.as_geo_point(), Some((10.0, 120.0)));

        // [lat, lon] by default
        let arr = FieldValue::from_json(&json!([10.0, 120.0]));
        assert_eq!(arr.as_geo_point(), Some((10.0, 120.0)));

        // First component out of latitude range flips the order.
        let flipped = FieldValue::from_json(&json!([120.0, 10.0]));
        assert_eq!(flipped.as_geo_point(), Some((10.0, 120.0)));
    }

    #[test]
    fn test_flatten_dotted_paths() {
        let doc = Document::from_json(&json!({
            "id": "1",
            "user": {"name": "ada", "address": {"city": "london"}}
        }))
        .unwrap();
        let flat = flatten_fields(&doc.fields);
        let paths: Vec<&str> = flat.iter().map(|(p, _)| p.as_str()).collect();
        assert!(paths.contains(&"user.name"));
        assert!(paths.contains(&"user.address.city"));
        assert_eq!(doc.field("user.address.city").unwrap().as_str(), Some("london"));
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2024-05-01T10:30:00Z").is_some());
        assert!(parse_date("2024-05-01").is_some());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_format_number_canonical() {
        assert_eq!(format_number(2020.0), "2020");
        assert_eq!(format_number(3.5), "3.5");
    }
}
