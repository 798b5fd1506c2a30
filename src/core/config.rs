use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::query::parser::BoolOperator;
use crate::schema::field_type::FieldType;
use crate::storage::compress::CompressionType;
use std::collections::HashMap;

/// Placement strategy mapping a document id to its primary shard.
#[derive(Clone)]
pub enum ShardStrategy {
    /// Stable FNV-1a hash of the id, mod shard count.
    Hash,
    /// Per-index counter, mod shard count.
    RoundRobin,
    /// First character bucketed across the shard count.
    Range,
    /// Caller-supplied placement function.
    Custom(Arc<dyn Fn(&str, usize) -> usize + Send + Sync>),
}

impl ShardStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ShardStrategy::Hash => "hash",
            ShardStrategy::RoundRobin => "round-robin",
            ShardStrategy::Range => "range",
            ShardStrategy::Custom(_) => "custom",
        }
    }

    pub fn from_name(name: &str) -> ShardStrategy {
        match name {
            "round-robin" => ShardStrategy::RoundRobin,
            "range" => ShardStrategy::Range,
            _ => ShardStrategy::Hash,
        }
    }
}

impl fmt::Debug for ShardStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl PartialEq for ShardStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

/// Per-index options supplied at index creation.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub sharding_enabled: bool,
    pub num_shards: usize,
    pub replication_factor: usize,
    pub shard_strategy: ShardStrategy,
    /// Fields surfaced by the `facets` endpoint. Aggregations may target any
    /// facetable field; this list only selects the precomputed view.
    pub facet_fields: Vec<String>,
    /// Seed mappings registered before the first document arrives.
    pub mappings: Option<HashMap<String, FieldType>>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            sharding_enabled: false,
            num_shards: 4,
            replication_factor: 1,
            shard_strategy: ShardStrategy::Hash,
            facet_fields: Vec::new(),
            mappings: None,
        }
    }
}

impl IndexOptions {
    /// Effective shard count: one unless sharded storage is enabled.
    pub fn effective_shards(&self) -> usize {
        if self.sharding_enabled {
            self.num_shards.max(1)
        } else {
            1
        }
    }

    /// Replication factor clamped to the shard count.
    pub fn effective_replication(&self) -> usize {
        self.replication_factor.clamp(1, self.effective_shards())
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for snapshot storage.
    pub data_dir: PathBuf,

    pub query_cache_entries: usize,
    pub query_cache_ttl: Duration,
    /// Per-shard-worker analyzed-value cache.
    pub token_cache_entries: usize,
    /// Bound of each shard worker's ingest queue; producers block when full.
    pub worker_queue_size: usize,

    // Per-shard caps; ingest beyond these fails with ResourceExhausted.
    pub max_docs_per_shard: usize,
    pub max_terms_per_shard: usize,

    /// How multi-token `match` values combine.
    pub default_operator: BoolOperator,
    /// Lowercase keyword fields at index and query time.
    pub lowercase_keywords: bool,
    /// Stopwords dropped by the standard analyzer.
    pub stopwords: Vec<String>,
    /// Enable the stemming hook on text fields.
    pub enable_stemming: bool,

    pub auto_rebalance: bool,
    /// Max relative deviation from the mean shard size before a rebalance.
    pub rebalance_threshold: f64,
    /// Skip rebalancing below this document count.
    pub rebalance_min_docs: u64,

    pub snapshot_compression: CompressionType,
    /// Newest snapshots kept by retention; older ones are deleted.
    pub max_snapshots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./data"),
            query_cache_entries: 256,
            query_cache_ttl: Duration::from_secs(60),
            token_cache_entries: 1024,
            worker_queue_size: 1024,
            max_docs_per_shard: 1_000_000,
            max_terms_per_shard: 5_000_000,
            default_operator: BoolOperator::And,
            lowercase_keywords: false,
            stopwords: Vec::new(),
            enable_stemming: false,
            auto_rebalance: true,
            rebalance_threshold: 0.3,
            rebalance_min_docs: 128,
            snapshot_compression: CompressionType::Lz4,
            max_snapshots: 10,
        }
    }
}
