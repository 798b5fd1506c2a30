use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use roaring::RoaringBitmap;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::types::parse_date;
use crate::facet::index::AggregationIndex;
use crate::schema::mappings::Mappings;

const DEFAULT_TERMS_SIZE: usize = 10;

/// Calendar interval of a date histogram, applied as fixed milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarInterval {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl CalendarInterval {
    pub fn parse(s: &str) -> Option<CalendarInterval> {
        match s {
            "1s" => Some(CalendarInterval::Second),
            "1m" => Some(CalendarInterval::Minute),
            "1h" => Some(CalendarInterval::Hour),
            "1d" => Some(CalendarInterval::Day),
            "1w" => Some(CalendarInterval::Week),
            "1M" => Some(CalendarInterval::Month),
            "1y" => Some(CalendarInterval::Year),
            _ => None,
        }
    }

    pub fn millis(self) -> i64 {
        match self {
            CalendarInterval::Second => 1_000,
            CalendarInterval::Minute => 60_000,
            CalendarInterval::Hour => 3_600_000,
            CalendarInterval::Day => 86_400_000,
            CalendarInterval::Week => 604_800_000,
            CalendarInterval::Month => 2_592_000_000,
            CalendarInterval::Year => 31_536_000_000,
        }
    }
}

/// One enumerated `[from, to)` range; a missing bound is unbounded.
#[derive(Debug, Clone)]
pub struct RangeBucketDef {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub key: Option<String>,
}

/// Parsed aggregation request, one per named aggregation.
#[derive(Debug, Clone)]
pub enum AggregationRequest {
    Terms {
        field: String,
        size: usize,
        min_doc_count: u64,
    },
    Histogram {
        field: String,
        interval: f64,
    },
    DateHistogram {
        field: String,
        interval: CalendarInterval,
    },
    Range {
        field: String,
        ranges: Vec<RangeBucketDef>,
    },
    Nested {
        path: String,
        aggs: Vec<(String, AggregationRequest)>,
    },
}

/// Mergeable per-shard aggregation state.
#[derive(Debug, Clone)]
pub enum AggregationPartial {
    Terms(HashMap<String, u64>),
    /// Bucket index → count; the key is index · interval.
    Histogram(HashMap<i64, u64>),
    /// Bucket start in epoch milliseconds → count.
    DateHistogram(HashMap<i64, u64>),
    /// Counts aligned with the request's range definitions.
    Range(Vec<u64>),
    Nested {
        doc_count: u64,
        subs: HashMap<String, AggregationPartial>,
    },
}

/// Finalised aggregation, shaped for the response envelope.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AggregationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_count: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<Bucket>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub aggregations: HashMap<String, AggregationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bucket {
    pub key: Value,
    pub doc_count: u64,
}

/// Parse the `aggregations` request object, validating field types.
pub fn parse_aggregations(
    value: &Value,
    mappings: &Mappings,
) -> Result<Vec<(String, AggregationRequest)>> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::MalformedQuery("aggregations must be an object".to_string()))?;
    let mut requests = Vec::with_capacity(map.len());
    for (name, spec) in map {
        requests.push((name.clone(), parse_one(name, spec, mappings)?));
    }
    Ok(requests)
}

fn parse_one(name: &str, spec: &Value, mappings: &Mappings) -> Result<AggregationRequest> {
    let map = spec.as_object().ok_or_else(|| {
        Error::MalformedQuery(format!("aggregation `{}` must be an object", name))
    })?;
    if map.len() != 1 {
        return Err(Error::MalformedQuery(format!(
            "aggregation `{}` must have exactly one kind",
            name
        )));
    }
    let (kind, body) = map.iter().next().expect("len checked");
    let body = body.as_object().ok_or_else(|| {
        Error::MalformedQuery(format!("aggregation `{}.{}` must be an object", name, kind))
    })?;

    match kind.as_str() {
        "terms" => {
            let field = required_field(name, body)?;
            check_facetable(&field, mappings)?;
            Ok(AggregationRequest::Terms {
                field,
                size: body
                    .get("size")
                    .and_then(Value::as_u64)
                    .map(|s| s as usize)
                    .unwrap_or(DEFAULT_TERMS_SIZE),
                min_doc_count: body
                    .get("min_doc_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(1),
            })
        }
        "histogram" => {
            let field = required_field(name, body)?;
            check_facetable(&field, mappings)?;
            let interval = body
                .get("interval")
                .and_then(Value::as_f64)
                .filter(|i| *i > 0.0)
                .ok_or_else(|| {
                    Error::MalformedQuery(format!(
                        "histogram `{}` needs a positive interval",
                        name
                    ))
                })?;
            Ok(AggregationRequest::Histogram { field, interval })
        }
        "date_histogram" => {
            let field = required_field(name, body)?;
            check_facetable(&field, mappings)?;
            let interval = body
                .get("interval")
                .and_then(Value::as_str)
                .and_then(CalendarInterval::parse)
                .ok_or_else(|| {
                    Error::MalformedQuery(format!(
                        "date_histogram `{}` interval must be one of 1s/1m/1h/1d/1w/1M/1y",
                        name
                    ))
                })?;
            Ok(AggregationRequest::DateHistogram { field, interval })
        }
        "range" => {
            let field = required_field(name, body)?;
            check_facetable(&field, mappings)?;
            let ranges = body
                .get("ranges")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    Error::MalformedQuery(format!("range `{}` needs a `ranges` array", name))
                })?
                .iter()
                .map(|r| parse_range_def(name, r))
                .collect::<Result<Vec<_>>>()?;
            if ranges.is_empty() {
                return Err(Error::MalformedQuery(format!(
                    "range `{}` needs at least one range",
                    name
                )));
            }
            Ok(AggregationRequest::Range { field, ranges })
        }
        "nested" => {
            let path = body
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::MalformedQuery(format!("nested `{}` needs a `path`", name))
                })?
                .to_string();
            let aggs = match body.get("aggs").or_else(|| body.get("aggregations")) {
                Some(subs) => parse_aggregations(subs, mappings)?,
                None => Vec::new(),
            };
            Ok(AggregationRequest::Nested { path, aggs })
        }
        other => Err(Error::MalformedQuery(format!(
            "unknown aggregation kind `{}` in `{}`",
            other, name
        ))),
    }
}

fn required_field(name: &str, body: &Map<String, Value>) -> Result<String> {
    body.get("field")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedQuery(format!("aggregation `{}` needs a `field`", name)))
}

fn check_facetable(field: &str, mappings: &Mappings) -> Result<()> {
    // Unmapped fields aggregate to empty buckets; mapped text-like fields
    // are rejected outright.
    match mappings.type_of(field) {
        Some(t) if !t.is_facetable() && t.is_indexed() => {
            Err(Error::InvalidAggregationField(field.to_string()))
        }
        _ => Ok(()),
    }
}

fn parse_range_def(name: &str, value: &Value) -> Result<RangeBucketDef> {
    let map = value.as_object().ok_or_else(|| {
        Error::MalformedQuery(format!("range `{}` entries must be objects", name))
    })?;
    let bound = |key: &str| -> Result<Option<f64>> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => parse_date(s)
                .map(|d| Some(d.timestamp_millis() as f64))
                .ok_or_else(|| {
                    Error::MalformedQuery(format!("invalid range bound `{}` in `{}`", s, name))
                }),
            Some(other) => Err(Error::MalformedQuery(format!(
                "invalid range bound in `{}`: {}",
                name, other
            ))),
        }
    };
    Ok(RangeBucketDef {
        from: bound("from")?,
        to: bound("to")?,
        key: map.get("key").and_then(Value::as_str).map(str::to_string),
    })
}

/// Numeric view of a facet value: plain number, or date → epoch millis.
fn numeric_value(value: &str) -> Option<f64> {
    if let Ok(n) = value.parse::<f64>() {
        return Some(n);
    }
    parse_date(value).map(|d| d.timestamp_millis() as f64)
}

/// Compute one aggregation over a shard's hit set.
///
/// Buckets are document counts: a document contributing several values to
/// the same bucket is still counted once.
pub fn compute_partial(
    index: &AggregationIndex,
    hits: &RoaringBitmap,
    request: &AggregationRequest,
) -> AggregationPartial {
    match request {
        AggregationRequest::Terms { field, .. } => {
            let mut counts = HashMap::new();
            if let Some(values) = index.values(field) {
                for (value, bitmap) in values {
                    let overlap = (bitmap & hits).len();
                    if overlap > 0 {
                        counts.insert(value.clone(), overlap);
                    }
                }
            }
            AggregationPartial::Terms(counts)
        }
        AggregationRequest::Histogram { field, interval } => {
            let mut buckets: HashMap<i64, RoaringBitmap> = HashMap::new();
            if let Some(values) = index.values(field) {
                for (value, bitmap) in values {
                    let Some(v) = numeric_value(value) else {
                        continue;
                    };
                    let bucket = (v / interval).floor() as i64;
                    *buckets.entry(bucket).or_default() |= bitmap;
                }
            }
            AggregationPartial::Histogram(
                buckets
                    .into_iter()
                    .map(|(bucket, bitmap)| (bucket, (&bitmap & hits).len()))
                    .filter(|(_, count)| *count > 0)
                    .collect(),
            )
        }
        AggregationRequest::DateHistogram { field, interval } => {
            let interval_ms = interval.millis();
            let mut buckets: HashMap<i64, RoaringBitmap> = HashMap::new();
            if let Some(values) = index.values(field) {
                for (value, bitmap) in values {
                    let Some(ms) = numeric_value(value) else {
                        continue;
                    };
                    let bucket = (ms as i64).div_euclid(interval_ms) * interval_ms;
                    *buckets.entry(bucket).or_default() |= bitmap;
                }
            }
            AggregationPartial::DateHistogram(
                buckets
                    .into_iter()
                    .map(|(bucket, bitmap)| (bucket, (&bitmap & hits).len()))
                    .filter(|(_, count)| *count > 0)
                    .collect(),
            )
        }
        AggregationRequest::Range { field, ranges } => {
            let mut counts = vec![0u64; ranges.len()];
            if let Some(values) = index.values(field) {
                for (i, range) in ranges.iter().enumerate() {
                    let mut matched = RoaringBitmap::new();
                    for (value, bitmap) in values {
                        let Some(v) = numeric_value(value) else {
                            continue;
                        };
                        let ge_from = range.from.map(|f| v >= f).unwrap_or(true);
                        let lt_to = range.to.map(|t| v < t).unwrap_or(true);
                        if ge_from && lt_to {
                            matched |= bitmap;
                        }
                    }
                    counts[i] = (&matched & hits).len();
                }
            }
            AggregationPartial::Range(counts)
        }
        AggregationRequest::Nested { path, aggs } => {
            let present = index.path_docs(path).cloned().unwrap_or_default();
            let nested_hits = &present & hits;
            let subs = aggs
                .iter()
                .map(|(name, sub)| (name.clone(), compute_partial(index, &nested_hits, sub)))
                .collect();
            AggregationPartial::Nested {
                doc_count: nested_hits.len(),
                subs,
            }
        }
    }
}

/// Merge a shard partial into the accumulated one by summing counts.
pub fn merge_partials(into: &mut AggregationPartial, from: AggregationPartial) {
    match (into, from) {
        (AggregationPartial::Terms(a), AggregationPartial::Terms(b)) => {
            for (key, count) in b {
                *a.entry(key).or_insert(0) += count;
            }
        }
        (AggregationPartial::Histogram(a), AggregationPartial::Histogram(b))
        | (AggregationPartial::DateHistogram(a), AggregationPartial::DateHistogram(b)) => {
            for (key, count) in b {
                *a.entry(key).or_insert(0) += count;
            }
        }
        (AggregationPartial::Range(a), AggregationPartial::Range(b)) => {
            for (i, count) in b.into_iter().enumerate() {
                if let Some(slot) = a.get_mut(i) {
                    *slot += count;
                }
            }
        }
        (
            AggregationPartial::Nested { doc_count, subs },
            AggregationPartial::Nested {
                doc_count: other_count,
                subs: other_subs,
            },
        ) => {
            *doc_count += other_count;
            for (name, partial) in other_subs {
                match subs.entry(name) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        merge_partials(entry.get_mut(), partial)
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(partial);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Turn a merged partial into response buckets.
///
/// `replication` divides counts: with factor R every document was counted
/// exactly R times across shards.
pub fn finalize(
    request: &AggregationRequest,
    partial: AggregationPartial,
    replication: u64,
) -> AggregationResult {
    let replication = replication.max(1);
    match (request, partial) {
        (
            AggregationRequest::Terms {
                size,
                min_doc_count,
                ..
            },
            AggregationPartial::Terms(counts),
        ) => {
            let mut buckets: Vec<(String, u64)> = counts
                .into_iter()
                .map(|(key, count)| (key, count / replication))
                .filter(|(_, count)| *count >= *min_doc_count)
                .collect();
            buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            buckets.truncate(*size);
            AggregationResult {
                doc_count: None,
                buckets: buckets
                    .into_iter()
                    .map(|(key, doc_count)| Bucket {
                        key: Value::String(key),
                        doc_count,
                    })
                    .collect(),
                aggregations: HashMap::new(),
            }
        }
        (AggregationRequest::Histogram { interval, .. }, AggregationPartial::Histogram(counts)) => {
            let mut keys: Vec<i64> = counts.keys().copied().collect();
            keys.sort_unstable();
            AggregationResult {
                doc_count: None,
                buckets: keys
                    .into_iter()
                    .map(|bucket| Bucket {
                        key: json!(bucket as f64 * interval),
                        doc_count: counts[&bucket] / replication,
                    })
                    .collect(),
                aggregations: HashMap::new(),
            }
        }
        (AggregationRequest::DateHistogram { .. }, AggregationPartial::DateHistogram(counts)) => {
            let mut keys: Vec<i64> = counts.keys().copied().collect();
            keys.sort_unstable();
            AggregationResult {
                doc_count: None,
                buckets: keys
                    .into_iter()
                    .map(|bucket| Bucket {
                        key: Value::String(iso_key(bucket)),
                        doc_count: counts[&bucket] / replication,
                    })
                    .collect(),
                aggregations: HashMap::new(),
            }
        }
        (AggregationRequest::Range { ranges, .. }, AggregationPartial::Range(counts)) => {
            AggregationResult {
                doc_count: None,
                buckets: ranges
                    .iter()
                    .zip(counts)
                    .map(|(range, count)| Bucket {
                        key: Value::String(range_key(range)),
                        doc_count: count / replication,
                    })
                    .collect(),
                aggregations: HashMap::new(),
            }
        }
        (
            AggregationRequest::Nested { aggs, .. },
            AggregationPartial::Nested {
                doc_count,
                mut subs,
            },
        ) => {
            let aggregations = aggs
                .iter()
                .filter_map(|(name, sub)| {
                    subs.remove(name)
                        .map(|partial| (name.clone(), finalize(sub, partial, replication)))
                })
                .collect();
            AggregationResult {
                doc_count: Some(doc_count / replication),
                buckets: Vec::new(),
                aggregations,
            }
        }
        _ => AggregationResult::default(),
    }
}

fn iso_key(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}

fn range_key(range: &RangeBucketDef) -> String {
    if let Some(key) = &range.key {
        return key.clone();
    }
    let from = range
        .from
        .map(|v| v.to_string())
        .unwrap_or_else(|| "*".to_string());
    let to = range
        .to
        .map(|v| v.to_string())
        .unwrap_or_else(|| "*".to_string());
    format!("{}-{}", from, to)
}
