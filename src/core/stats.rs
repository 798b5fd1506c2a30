use serde::Serialize;

use crate::core::types::IndexName;

/// Per-shard breakdown inside [`IndexStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub id: usize,
    pub documents: u64,
    pub terms: u64,
    pub tokens: u64,
}

/// Index-level statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: IndexName,
    pub documents: u64,
    pub tokens: u64,
    /// Rough in-memory footprint estimate.
    pub memory_bytes: u64,
    pub shards: Vec<ShardStats>,
}

/// Listing entry for one index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: IndexName,
    pub doc_count: u64,
    pub shards: usize,
    pub facet_fields: Vec<String>,
}

/// Query-cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Per-document outcome report for a batch ingest or delete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub id: Option<String>,
    pub error: String,
}

impl BatchReport {
    pub fn ok(&mut self) {
        self.processed += 1;
    }

    pub fn fail(&mut self, id: Option<String>, error: impl std::fmt::Display) {
        self.failed += 1;
        self.errors.push(BatchError {
            id,
            error: error.to_string(),
        });
    }
}
