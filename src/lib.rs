pub mod analysis;
pub mod core;
pub mod facet;
pub mod index;
pub mod query;
pub mod schema;
pub mod scoring;
pub mod search;
pub mod shard;
pub mod storage;
pub mod store;

pub use crate::core::config::{EngineConfig, IndexOptions, ShardStrategy};
pub use crate::core::engine::{MergeStrategy, RestoreOptions, SearchEngine, SearchOptions};
pub use crate::core::error::{Error, Result};
pub use crate::core::stats::{BatchReport, IndexInfo, IndexStats};
pub use crate::core::types::{Document, DocumentId, FieldValue, IndexName};
pub use crate::search::results::{Hit, SearchResponse};
pub use crate::storage::snapshot::{SnapshotFilter, SnapshotMetadata};

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                           KESTREL ARCHITECTURE                               │
└──────────────────────────────────────────────────────────────────────────────┘

  SearchEngine ──owns──> {IndexName → ShardedIndexManager}
      │                        │
      ├──owns──> QueryCache    ├──owns──> Mappings (single-writer registry)
      ├──owns──> QueryParser   ├──owns──> AnalyzerRegistry, SynonymEngine
      └──owns──> SnapshotManager ──schedules──> SnapshotScheduler
                               │
                               ├──owns──> ShardRouter (hash/round-robin/range/custom)
                               └──owns──> N × (Shard + ShardWorker)

  Shard ──owns──> InvertedIndex ──contains──> {field → {Term → PostingList}}
      │                 └──builds──> PrefixIndex (FST, lazily)
      ├──owns──> DocumentStore  (id maps, doc lengths, ingest sequence)
      └──owns──> AggregationIndex (field → value → RoaringBitmap)

  Ingest:  Document → Mappings.auto_map → Analyzer → shard worker queue
           → InvertedIndex.add_token + DocumentStore.put + AggregationIndex
  Query:   JSON → QueryParser → Query tree → per-shard QueryExecutor
           → RoaringBitmap candidates + TermContributions
           → manager merge (global BM25 stats) → RankingPipeline
           → FacetEngine buckets → SearchResponse
  Persist: Shard.snapshot_state → bincode → CompressedBlock → blob + crc32
           → restore rebuilds shards directly or re-ingests for merges
*/
