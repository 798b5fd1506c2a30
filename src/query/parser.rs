use serde_json::{Map, Value};

use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, format_number};
use crate::query::ast::{
    BoolQuery, FuzzyQuery, GeoDistanceQuery, MatchOperator, MatchQuery, PhraseQuery, PrefixQuery,
    Query, RangeQuery, TermQuery, WildcardQuery,
};

/// How multi-token values combine when no operator is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

const MAX_FUZZINESS: u8 = 2;

/// Parses declarative query objects into the [`Query`] tree.
///
/// Both `{field, value}` and `{<field>: value}` leaf forms are accepted and
/// unified; arrays are accepted wherever singletons are valid.
pub struct QueryParser {
    pub default_field: String,
    pub default_operator: BoolOperator,
}

impl QueryParser {
    pub fn new(default_operator: BoolOperator) -> Self {
        QueryParser {
            default_field: "*".to_string(),
            default_operator,
        }
    }

    pub fn parse(&self, value: &Value) -> Result<Query> {
        match value {
            // A bare string searches all text-like fields.
            Value::String(s) => Ok(Query::Match(MatchQuery {
                field: self.default_field.clone(),
                value: s.clone(),
                fuzziness: 0,
                operator: None,
                boost: None,
            })),
            Value::Object(map) => self.parse_node(map),
            other => Err(malformed(format!(
                "query must be an object or string, got {}",
                json_kind(other)
            ))),
        }
    }

    fn parse_node(&self, map: &Map<String, Value>) -> Result<Query> {
        if map.len() != 1 {
            return Err(malformed(format!(
                "query object must have exactly one key, got {}",
                map.len()
            )));
        }
        let (kind, body) = map.iter().next().expect("len checked");
        match kind.as_str() {
            "match_all" => self.parse_match_all(body),
            "term" => self.parse_term(body, false),
            "match" => self.parse_term(body, true),
            "prefix" => self.parse_prefix(body),
            "wildcard" => self.parse_wildcard(body),
            "fuzzy" => self.parse_fuzzy(body),
            "range" => self.parse_range(body),
            "match_phrase" => self.parse_phrase(body),
            "geo_distance" => self.parse_geo(body),
            "bool" => self.parse_bool(body),
            other => Err(malformed(format!("unknown query kind `{}`", other))),
        }
    }

    fn parse_match_all(&self, body: &Value) -> Result<Query> {
        let map = as_object(body, "match_all")?;
        let mut boost = 1.0f32;
        for (key, value) in map {
            match key.as_str() {
                "boost" => boost = as_f32(value, "match_all.boost")?,
                other => return Err(malformed(format!("unknown key `{}` in match_all", other))),
            }
        }
        Ok(Query::MatchAll { boost })
    }

    /// Shared shape for `term` and `match`.
    fn parse_term(&self, body: &Value, is_match: bool) -> Result<Query> {
        let kind = if is_match { "match" } else { "term" };
        let leaf = self.parse_leaf(body, kind)?;
        if is_match {
            Ok(Query::Match(MatchQuery {
                field: leaf.field,
                value: leaf.value,
                fuzziness: leaf.fuzziness,
                operator: leaf.operator,
                boost: leaf.boost,
            }))
        } else {
            Ok(Query::Term(TermQuery {
                field: leaf.field,
                value: leaf.value,
                fuzziness: leaf.fuzziness,
                boost: leaf.boost,
            }))
        }
    }

    fn parse_prefix(&self, body: &Value) -> Result<Query> {
        let leaf = self.parse_leaf(body, "prefix")?;
        Ok(Query::Prefix(PrefixQuery {
            field: leaf.field,
            value: leaf.value,
            boost: leaf.boost,
        }))
    }

    fn parse_wildcard(&self, body: &Value) -> Result<Query> {
        let leaf = self.parse_leaf(body, "wildcard")?;
        Ok(Query::Wildcard(WildcardQuery {
            field: leaf.field,
            pattern: leaf.value,
            boost: leaf.boost,
        }))
    }

    fn parse_fuzzy(&self, body: &Value) -> Result<Query> {
        let leaf = self.parse_leaf(body, "fuzzy")?;
        Ok(Query::Fuzzy(FuzzyQuery {
            field: leaf.field,
            value: leaf.value,
            // Fuzzy means fuzzy even when unspecified.
            fuzziness: if leaf.fuzziness == 0 { 1 } else { leaf.fuzziness },
            boost: leaf.boost,
        }))
    }

    fn parse_range(&self, body: &Value) -> Result<Query> {
        let map = as_object(body, "range")?;
        let (field, bounds) = if let Some(field) = map.get("field").and_then(Value::as_str) {
            (field.to_string(), body.clone())
        } else {
            if map.len() != 1 {
                return Err(malformed(
                    "range must be {<field>: {bounds}} or carry a `field` key".to_string(),
                ));
            }
            let (field, bounds) = map.iter().next().expect("len checked");
            (field.clone(), bounds.clone())
        };

        let bounds_map = as_object(&bounds, "range bounds")?;
        let mut query = RangeQuery {
            field,
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            boost: None,
        };
        for (key, value) in bounds_map {
            match key.as_str() {
                "gt" => query.gt = Some(FieldValue::from_json(value)),
                "gte" => query.gte = Some(FieldValue::from_json(value)),
                "lt" => query.lt = Some(FieldValue::from_json(value)),
                "lte" => query.lte = Some(FieldValue::from_json(value)),
                "boost" => query.boost = Some(as_f32(value, "range.boost")?),
                "field" => {}
                other => return Err(malformed(format!("unknown range bound `{}`", other))),
            }
        }
        if query.gt.is_none() && query.gte.is_none() && query.lt.is_none() && query.lte.is_none() {
            return Err(malformed(format!(
                "range on `{}` needs at least one bound",
                query.field
            )));
        }
        Ok(Query::Range(query))
    }

    fn parse_phrase(&self, body: &Value) -> Result<Query> {
        let map = as_object(body, "match_phrase")?;
        if let Some(field) = map.get("field").and_then(Value::as_str) {
            let phrase = map
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("match_phrase needs a `query` string".to_string()))?;
            return self.build_phrase(field, phrase, map);
        }
        if map.len() != 1 {
            return Err(malformed(
                "match_phrase must be {<field>: {query, slop?}} with one field".to_string(),
            ));
        }
        let (field, spec) = map.iter().next().expect("len checked");
        match spec {
            Value::String(phrase) => self.build_phrase(field, phrase, &Map::new()),
            Value::Object(spec_map) => {
                let phrase = spec_map
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("match_phrase needs a `query` string".to_string()))?;
                self.build_phrase(field, phrase, spec_map)
            }
            other => Err(malformed(format!(
                "match_phrase body must be a string or object, got {}",
                json_kind(other)
            ))),
        }
    }

    fn build_phrase(&self, field: &str, phrase: &str, spec: &Map<String, Value>) -> Result<Query> {
        let mut slop = 0u32;
        let mut fuzziness = 0u8;
        let mut boost = None;
        for (key, value) in spec {
            match key.as_str() {
                "query" | "field" => {}
                "slop" => {
                    slop = value
                        .as_u64()
                        .ok_or_else(|| malformed("slop must be a non-negative integer".to_string()))?
                        as u32
                }
                "fuzziness" => fuzziness = parse_fuzziness(value)?,
                "boost" => boost = Some(as_f32(value, "match_phrase.boost")?),
                other => return Err(malformed(format!("unknown key `{}` in match_phrase", other))),
            }
        }
        Ok(Query::Phrase(PhraseQuery {
            field: field.to_string(),
            phrase: phrase.to_string(),
            slop,
            fuzziness,
            boost,
        }))
    }

    fn parse_geo(&self, body: &Value) -> Result<Query> {
        let map = as_object(body, "geo_distance")?;
        let distance = map
            .get("distance")
            .ok_or_else(|| malformed("geo_distance needs a `distance`".to_string()))?;
        let distance_meters = parse_distance(distance)?;

        let explicit_field = map.get("field").and_then(Value::as_str).map(str::to_string);
        let (field, center) = if let Some(field) = explicit_field {
            let center = map
                .get("center")
                .or_else(|| map.get(&field))
                .ok_or_else(|| malformed(format!("geo_distance on `{}` needs a center", field)))?;
            (field, center)
        } else {
            let mut remaining = map
                .iter()
                .filter(|(k, _)| k.as_str() != "distance" && k.as_str() != "center");
            match (remaining.next(), remaining.next()) {
                (Some((field, center)), None) => (field.clone(), center),
                _ => {
                    return Err(malformed(
                        "geo_distance must name exactly one field".to_string(),
                    ));
                }
            }
        };

        let (lat, lon) = FieldValue::from_json(center)
            .as_geo_point()
            .ok_or_else(|| malformed(format!("invalid geo_distance center for `{}`", field)))?;
        Ok(Query::GeoDistance(GeoDistanceQuery {
            field,
            lat,
            lon,
            distance_meters,
        }))
    }

    fn parse_bool(&self, body: &Value) -> Result<Query> {
        let map = as_object(body, "bool")?;
        let mut query = BoolQuery::new();
        for (key, value) in map {
            match key.as_str() {
                "must" => query.must = self.parse_clauses(value)?,
                "should" => query.should = Some(self.parse_clauses(value)?),
                "must_not" => query.must_not = self.parse_clauses(value)?,
                "filter" => query.filter = self.parse_clauses(value)?,
                "minimum_should_match" => {
                    query.minimum_should_match = value.as_u64().ok_or_else(|| {
                        malformed("minimum_should_match must be a non-negative integer".to_string())
                    })? as u32
                }
                "boost" => query.boost = Some(as_f32(value, "bool.boost")?),
                other => return Err(malformed(format!("unknown key `{}` in bool", other))),
            }
        }
        Ok(Query::Bool(query))
    }

    /// A clause position accepts an array or a single node.
    fn parse_clauses(&self, value: &Value) -> Result<Vec<Query>> {
        match value {
            Value::Array(items) => items.iter().map(|v| self.parse(v)).collect(),
            other => Ok(vec![self.parse(other)?]),
        }
    }

    fn parse_leaf(&self, body: &Value, kind: &str) -> Result<LeafSpec> {
        let map = as_object(body, kind)?;

        // Object-level form: {field, value, ...}
        if let Some(field) = map.get("field").and_then(Value::as_str) {
            let mut leaf = LeafSpec::new(field);
            for (key, value) in map {
                match key.as_str() {
                    "field" => {}
                    "value" | "query" => leaf.value = scalar_text(value, kind)?,
                    "fuzziness" => leaf.fuzziness = parse_fuzziness(value)?,
                    "operator" => leaf.operator = Some(parse_operator(value)?),
                    "boost" => leaf.boost = Some(as_f32(value, kind)?),
                    other => {
                        return Err(malformed(format!("unknown key `{}` in {}", other, kind)));
                    }
                }
            }
            if leaf.value.is_empty() {
                return Err(malformed(format!("{} on `{}` needs a value", kind, field)));
            }
            return Ok(leaf);
        }

        // Field-keyed form: {<field>: value} or {<field>: {value, ...}}
        if map.len() != 1 {
            return Err(malformed(format!(
                "{} must be {{<field>: value}} or carry a `field` key",
                kind
            )));
        }
        let (field, spec) = map.iter().next().expect("len checked");
        let mut leaf = LeafSpec::new(field);
        match spec {
            Value::Object(spec_map) => {
                for (key, value) in spec_map {
                    match key.as_str() {
                        "value" | "query" => leaf.value = scalar_text(value, kind)?,
                        "fuzziness" => leaf.fuzziness = parse_fuzziness(value)?,
                        "operator" => leaf.operator = Some(parse_operator(value)?),
                        "boost" => leaf.boost = Some(as_f32(value, kind)?),
                        other => {
                            return Err(malformed(format!("unknown key `{}` in {}", other, kind)));
                        }
                    }
                }
            }
            scalar => leaf.value = scalar_text(scalar, kind)?,
        }
        if leaf.value.is_empty() {
            return Err(malformed(format!("{} on `{}` needs a value", kind, field)));
        }
        Ok(leaf)
    }
}

struct LeafSpec {
    field: String,
    value: String,
    fuzziness: u8,
    operator: Option<MatchOperator>,
    boost: Option<f32>,
}

impl LeafSpec {
    fn new(field: &str) -> Self {
        LeafSpec {
            field: field.to_string(),
            value: String::new(),
            fuzziness: 0,
            operator: None,
            boost: None,
        }
    }
}

fn malformed(message: String) -> Error {
    Error::MalformedQuery(message)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object<'a>(value: &'a Value, kind: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("{} body must be an object", kind)))
}

fn as_f32(value: &Value, context: &str) -> Result<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| malformed(format!("{} must be a number", context)))
}

fn scalar_text(value: &Value, kind: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(format_number(n.as_f64().unwrap_or(0.0))),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(malformed(format!(
            "{} value must be a scalar, got {}",
            kind,
            json_kind(other)
        ))),
    }
}

fn parse_fuzziness(value: &Value) -> Result<u8> {
    let n = value
        .as_u64()
        .ok_or_else(|| malformed("fuzziness must be an integer".to_string()))?;
    if n > MAX_FUZZINESS as u64 {
        return Err(malformed(format!(
            "fuzziness must be between 0 and {}, got {}",
            MAX_FUZZINESS, n
        )));
    }
    Ok(n as u8)
}

fn parse_operator(value: &Value) -> Result<MatchOperator> {
    match value.as_str() {
        Some("and") | Some("AND") => Ok(MatchOperator::And),
        Some("or") | Some("OR") => Ok(MatchOperator::Or),
        _ => Err(malformed("operator must be \"and\" or \"or\"".to_string())),
    }
}

/// Distance: bare numbers are kilometres; strings accept `km` and `m`.
fn parse_distance(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => {
            let km = n
                .as_f64()
                .ok_or_else(|| malformed("invalid distance".to_string()))?;
            Ok(km * 1000.0)
        }
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            if let Some(km) = s.strip_suffix("km") {
                km.trim()
                    .parse::<f64>()
                    .map(|v| v * 1000.0)
                    .map_err(|_| malformed(format!("invalid distance `{}`", s)))
            } else if let Some(m) = s.strip_suffix('m') {
                m.trim()
                    .parse::<f64>()
                    .map_err(|_| malformed(format!("invalid distance `{}`", s)))
            } else {
                s.parse::<f64>()
                    .map(|v| v * 1000.0)
                    .map_err(|_| malformed(format!("invalid distance `{}`", s)))
            }
        }
        other => Err(malformed(format!(
            "distance must be a number or string, got {}",
            json_kind(other)
        ))),
    }
}
