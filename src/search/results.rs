use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::types::{DocumentId, IndexName};
use crate::facet::engine::AggregationResult;

/// One matched document with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_index")]
    pub index: IndexName,
    #[serde(rename = "_score")]
    pub score: f32,
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(rename = "_source")]
    pub source: Value,
}

/// Search response envelope.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    /// Deduplicated merged total across all clauses, before pagination.
    pub total: u64,
    pub from: usize,
    pub size: usize,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub aggregations: HashMap<String, AggregationResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub facets: HashMap<String, HashMap<String, u64>>,
    #[serde(rename = "took")]
    pub took_ms: u64,
    /// Set when one or more shards failed or were cancelled.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_shards: Vec<usize>,
}
