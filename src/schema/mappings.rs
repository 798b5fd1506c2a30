use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, flatten_fields, parse_date};
use crate::schema::field_type::{FieldType, NumberType};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email regex"));

/// Field names inferred as full-text regardless of value shape.
const TEXT_HINTS: &[&str] = &[
    "title",
    "description",
    "content",
    "body",
    "summary",
    "text",
    "comment",
    "message",
    "bio",
];

/// Field names inferred as exact-match keywords.
const KEYWORD_HINTS: &[&str] = &[
    "id", "status", "category", "type", "tag", "tags", "genre", "genres", "kind", "state", "slug",
    "label", "labels",
];

/// Registry of field types for one index.
///
/// Single-writer, many-reader: registration happens under the index's
/// exclusive mappings lock, lookups under the shared one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mappings {
    fields: HashMap<String, FieldType>,
    /// Extra keyword hints, seeded from the index's facet fields.
    keyword_hints: HashSet<String>,
}

impl Mappings {
    pub fn new() -> Self {
        Mappings::default()
    }

    pub fn with_keyword_hints(hints: impl IntoIterator<Item = String>) -> Self {
        Mappings {
            fields: HashMap::new(),
            keyword_hints: hints.into_iter().collect(),
        }
    }

    /// Register a field type. Re-registering the same type is a no-op;
    /// changing it is a conflict.
    pub fn register(&mut self, field: &str, field_type: FieldType) -> Result<()> {
        match self.fields.get(field) {
            Some(existing) if *existing != field_type => Err(Error::FieldConflict {
                field: field.to_string(),
                existing: existing.to_string(),
                requested: field_type.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.fields.insert(field.to_string(), field_type);
                Ok(())
            }
        }
    }

    pub fn type_of(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldType)> {
        self.fields.iter()
    }

    /// Fields the `*` field wildcard fans out across, sorted for determinism.
    pub fn text_like_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, t)| t.is_text_like())
            .map(|(f, _)| f.clone())
            .collect();
        fields.sort();
        fields
    }

    /// Infer and register types for every unseen field of a document.
    /// Nested objects recurse with dotted path keys.
    pub fn auto_map(&mut self, fields: &HashMap<String, FieldValue>) -> Result<()> {
        for (path, value) in flatten_fields(fields) {
            if matches!(value, FieldValue::Null) {
                continue;
            }
            if self.fields.contains_key(&path) {
                continue;
            }
            let inferred = self.infer(&path, value);
            self.register(&path, inferred)?;
            // Register the enclosing object paths so nested aggregations can
            // check path validity.
            let parts: Vec<&str> = path.split('.').collect();
            let mut prefix = String::new();
            for part in &parts[..parts.len() - 1] {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(part);
                if !self.fields.contains_key(&prefix) {
                    self.fields.insert(prefix.clone(), FieldType::Object);
                }
            }
        }
        Ok(())
    }

    fn infer(&self, path: &str, value: &FieldValue) -> FieldType {
        let leaf = path.rsplit('.').next().unwrap_or(path).to_lowercase();
        let text_shaped = matches!(value, FieldValue::Text(_))
            || matches!(value, FieldValue::Array(items)
                if items.iter().all(|v| matches!(v, FieldValue::Text(_))) && !items.is_empty());
        if text_shaped {
            if TEXT_HINTS.contains(&leaf.as_str()) {
                return FieldType::Text;
            }
            if KEYWORD_HINTS.contains(&leaf.as_str()) || self.keyword_hints.contains(&leaf) {
                return FieldType::Keyword;
            }
        }
        infer_from_value(value)
    }

    /// Type-check a document's fields against the registry.
    pub fn validate(&self, fields: &HashMap<String, FieldValue>) -> Result<()> {
        for (path, value) in flatten_fields(fields) {
            if matches!(value, FieldValue::Null) {
                continue;
            }
            if let Some(expected) = self.fields.get(&path) {
                check_compatible(&path, *expected, value)?;
            }
        }
        Ok(())
    }
}

fn infer_from_value(value: &FieldValue) -> FieldType {
    match value {
        FieldValue::Boolean(_) => FieldType::Boolean,
        FieldValue::Number(n) => {
            if n.fract() == 0.0 {
                FieldType::Number(NumberType::Integer)
            } else {
                FieldType::Number(NumberType::Float)
            }
        }
        FieldValue::Text(s) => infer_from_text(s),
        FieldValue::Object(_) => {
            if value.as_geo_point().is_some() {
                FieldType::GeoPoint
            } else {
                FieldType::Object
            }
        }
        FieldValue::Array(items) => {
            if value.as_geo_point().is_some() {
                return FieldType::GeoPoint;
            }
            items
                .iter()
                .find(|v| !matches!(v, FieldValue::Null))
                .map(infer_from_value)
                .unwrap_or(FieldType::Keyword)
        }
        FieldValue::Null => FieldType::Keyword,
    }
}

fn infer_from_text(s: &str) -> FieldType {
    if EMAIL_RE.is_match(s) {
        return FieldType::Email;
    }
    if is_url(s) {
        return FieldType::Url;
    }
    // Dates win over phone numbers: "2024-05-01" is digits-and-dashes too.
    if parse_date(s).is_some() {
        return FieldType::Date;
    }
    if is_phone(s) {
        return FieldType::Phone;
    }
    FieldType::Text
}

fn is_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split('/').next().unwrap_or("");
            !host.is_empty() && host.contains('.')
        }
        None => false,
    }
}

fn is_phone(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')' | '.'))
}

fn check_compatible(field: &str, expected: FieldType, value: &FieldValue) -> Result<()> {
    if let FieldValue::Array(items) = value {
        if expected == FieldType::GeoPoint && value.as_geo_point().is_some() {
            return Ok(());
        }
        for item in items {
            if matches!(item, FieldValue::Null) {
                continue;
            }
            check_compatible(field, expected, item)?;
        }
        return Ok(());
    }

    let ok = match expected {
        FieldType::Text | FieldType::Email | FieldType::Url | FieldType::Phone => {
            matches!(value, FieldValue::Text(_))
        }
        FieldType::Keyword => matches!(
            value,
            FieldValue::Text(_) | FieldValue::Number(_) | FieldValue::Boolean(_)
        ),
        FieldType::Number(_) => matches!(value, FieldValue::Number(_)),
        FieldType::Boolean => matches!(value, FieldValue::Boolean(_)),
        FieldType::Date => value.as_date().is_some(),
        FieldType::GeoPoint => value.as_geo_point().is_some(),
        FieldType::Object => matches!(value, FieldValue::Object(_)),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            actual: value.type_name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields_of(v: serde_json::Value) -> HashMap<String, FieldValue> {
        match FieldValue::from_json(&v) {
            FieldValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_auto_map_value_inference() {
        let mut mappings = Mappings::new();
        mappings
            .auto_map(&fields_of(json!({
                "alive": true,
                "rank": 3,
                "score": 1.5,
                "contact": "ada@example.com",
                "homepage": "https://example.com/about",
                "phone": "+44 1234 5678",
                "joined": "2024-05-01",
                "position": {"lat": 51.5, "lon": -0.1},
                "note": "free text here"
            })))
            .unwrap();

        assert_eq!(mappings.type_of("alive"), Some(FieldType::Boolean));
        assert_eq!(mappings.type_of("rank"), Some(FieldType::Number(NumberType::Integer)));
        assert_eq!(mappings.type_of("score"), Some(FieldType::Number(NumberType::Float)));
        assert_eq!(mappings.type_of("contact"), Some(FieldType::Email));
        assert_eq!(mappings.type_of("homepage"), Some(FieldType::Url));
        assert_eq!(mappings.type_of("phone"), Some(FieldType::Phone));
        assert_eq!(mappings.type_of("joined"), Some(FieldType::Date));
        assert_eq!(mappings.type_of("position"), Some(FieldType::GeoPoint));
        assert_eq!(mappings.type_of("note"), Some(FieldType::Text));
    }

    #[test]
    fn test_name_hints_override_values() {
        let mut mappings = Mappings::new();
        mappings
            .auto_map(&fields_of(json!({
                "title": "2024-05-01",
                "status": "Alive",
                "genres": ["Action", "Drama"]
            })))
            .unwrap();
        assert_eq!(mappings.type_of("title"), Some(FieldType::Text));
        assert_eq!(mappings.type_of("status"), Some(FieldType::Keyword));
        assert_eq!(mappings.type_of("genres"), Some(FieldType::Keyword));
    }

    #[test]
    fn test_register_conflict() {
        let mut mappings = Mappings::new();
        mappings.register("year", FieldType::Number(NumberType::Integer)).unwrap();
        assert!(mappings.register("year", FieldType::Number(NumberType::Integer)).is_ok());
        let err = mappings.register("year", FieldType::Text).unwrap_err();
        assert!(matches!(err, Error::FieldConflict { .. }));
    }

    #[test]
    fn test_nested_objects_use_dotted_paths() {
        let mut mappings = Mappings::new();
        mappings
            .auto_map(&fields_of(json!({"user": {"name": "ada", "age": 36}})))
            .unwrap();
        assert_eq!(mappings.type_of("user"), Some(FieldType::Object));
        assert_eq!(mappings.type_of("user.name"), Some(FieldType::Text));
        assert_eq!(mappings.type_of("user.age"), Some(FieldType::Number(NumberType::Integer)));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let mut mappings = Mappings::new();
        mappings.register("year", FieldType::Number(NumberType::Integer)).unwrap();
        let err = mappings
            .validate(&fields_of(json!({"year": "not a number"})))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(mappings.validate(&fields_of(json!({"year": 2024}))).is_ok());
    }
}
