use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::config::{EngineConfig, IndexOptions, ShardStrategy};
use crate::core::error::{Error, Result};
use crate::core::stats::{BatchReport, CacheStats, IndexInfo, IndexStats};
use crate::core::types::{Document, DocumentId, IndexName};
use crate::facet::engine::{AggregationRequest, parse_aggregations};
use crate::query::cache::{QueryCache, QueryKey};
use crate::query::parser::QueryParser;
use crate::schema::mappings::Mappings;
use crate::search::context::SearchContext;
use crate::search::results::SearchResponse;
use crate::shard::manager::ShardedIndexManager;
use crate::storage::snapshot::{
    IndexSnapshotState, SnapshotFilter, SnapshotManager, SnapshotMetadata, SnapshotScheduler,
};

/// Options for one search call.
#[derive(Clone, Default)]
pub struct SearchOptions {
    pub from: usize,
    pub size: Option<usize>,
    pub aggregations: Option<Value>,
    pub deadline: Option<Duration>,
}

const DEFAULT_PAGE_SIZE: usize = 10;

/// How restored documents combine with existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    #[default]
    Replace,
    Merge,
    Skip,
}

/// Options for a snapshot restore.
#[derive(Clone, Default)]
pub struct RestoreOptions {
    pub clear_existing: bool,
    pub index_filter: Option<String>,
    pub document_filter: Option<Arc<dyn Fn(&Document) -> bool + Send + Sync>>,
    pub merge_strategy: MergeStrategy,
}

struct EngineInner {
    config: Arc<EngineConfig>,
    indices: RwLock<HashMap<IndexName, Arc<ShardedIndexManager>>>,
    cache: QueryCache,
    snapshots: SnapshotManager,
    scheduler: Mutex<Option<SnapshotScheduler>>,
    parser: QueryParser,
}

/// Multi-index in-process search engine.
///
/// The façade every external collaborator talks to: index lifecycle,
/// ingest, search, facets, statistics and snapshots.
#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<EngineInner>,
}

impl SearchEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let snapshots = SnapshotManager::new(
            config.data_dir.clone(),
            config.snapshot_compression,
            config.max_snapshots,
        )?;
        let cache = QueryCache::new(config.query_cache_entries, config.query_cache_ttl);
        let parser = QueryParser::new(config.default_operator);
        Ok(SearchEngine {
            inner: Arc::new(EngineInner {
                config: Arc::new(config),
                indices: RwLock::new(HashMap::new()),
                cache,
                snapshots,
                scheduler: Mutex::new(None),
                parser,
            }),
        })
    }

    fn manager(&self, index: &str) -> Result<Arc<ShardedIndexManager>> {
        self.inner
            .indices
            .read()
            .get(&IndexName::from(index))
            .cloned()
            .ok_or_else(|| Error::UnknownIndex(IndexName::from(index)))
    }

    pub fn create_index(&self, name: &str, options: IndexOptions) -> Result<()> {
        let index_name = IndexName::from(name);
        let mut indices = self.inner.indices.write();
        if indices.contains_key(&index_name) {
            return Err(Error::IndexExists(index_name));
        }
        let manager = ShardedIndexManager::new(
            index_name.clone(),
            options,
            self.inner.config.clone(),
        )?;
        info!(index = %index_name, shards = manager.options().effective_shards(), "index created");
        indices.insert(index_name, Arc::new(manager));
        Ok(())
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        let index_name = IndexName::from(name);
        let removed = self.inner.indices.write().remove(&index_name);
        match removed {
            Some(_) => {
                self.inner.cache.invalidate_index(&index_name);
                info!(index = %index_name, "index deleted");
                Ok(())
            }
            None => Err(Error::UnknownIndex(index_name)),
        }
    }

    pub fn list_indexes(&self) -> Vec<IndexInfo> {
        let mut infos: Vec<IndexInfo> = self
            .inner
            .indices
            .read()
            .values()
            .map(|manager| IndexInfo {
                name: manager.name().clone(),
                doc_count: manager.doc_count(),
                shards: manager.options().effective_shards(),
                facet_fields: manager.options().facet_fields.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Batch ingest. Failures are isolated per document; the report carries
    /// one entry per rejected document.
    pub fn put(&self, index: &str, documents: &[Value]) -> Result<BatchReport> {
        let manager = self.manager(index)?;
        let mut report = BatchReport::default();
        for source in documents {
            match manager.put_json(source) {
                Ok(()) => report.ok(),
                Err(e) => {
                    let id = source
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    debug!(index, id = id.as_deref().unwrap_or("?"), error = %e, "document rejected");
                    report.fail(id, e);
                }
            }
        }
        // Writes completed; invalidate before any caller can observe stale
        // cached results.
        self.inner.cache.invalidate_index(&IndexName::from(index));
        manager.maybe_rebalance();
        Ok(report)
    }

    pub fn get(&self, index: &str, id: &str) -> Result<Option<Document>> {
        Ok(self.manager(index)?.get(&DocumentId::from(id)))
    }

    pub fn delete(&self, index: &str, ids: &[&str]) -> Result<BatchReport> {
        let manager = self.manager(index)?;
        let mut report = BatchReport::default();
        for id in ids {
            match manager.delete_document(&DocumentId::from(*id)) {
                Ok(true) => report.ok(),
                Ok(false) => report.fail(Some(id.to_string()), "not found"),
                Err(e) => report.fail(Some(id.to_string()), e),
            }
        }
        self.inner.cache.invalidate_index(&IndexName::from(index));
        Ok(report)
    }

    pub fn search(&self, index: &str, query: &Value, options: SearchOptions) -> Result<SearchResponse> {
        let start = Instant::now();
        let manager = self.manager(index)?;
        let parsed = self.inner.parser.parse(query)?;
        let canonical = serde_json::to_string(&parsed)?;

        let aggregations: Vec<(String, AggregationRequest)> = match &options.aggregations {
            Some(spec) => {
                let mappings = manager.mappings();
                let guard = mappings.read();
                parse_aggregations(spec, &guard)?
            }
            None => Vec::new(),
        };

        let size = options.size.unwrap_or(DEFAULT_PAGE_SIZE);
        let key = QueryKey {
            index: IndexName::from(index),
            query: canonical,
            options_hash: options_fingerprint(options.from, size, options.aggregations.as_ref()),
        };
        if let Some(cached) = self.inner.cache.get(&key) {
            debug!(index, "query served from cache");
            return Ok(cached);
        }

        let ctx = SearchContext::new(options.deadline.map(|d| Instant::now() + d));
        let mut response = manager.search(&parsed, options.from, size, &aggregations, &ctx)?;
        response.took_ms = start.elapsed().as_millis() as u64;

        // Degraded responses are not worth keeping.
        if !response.partial {
            self.inner.cache.put(key, response.clone());
        }
        Ok(response)
    }

    /// Full facet view over all documents of an index.
    pub fn facets(&self, index: &str) -> Result<HashMap<String, HashMap<String, u64>>> {
        Ok(self.manager(index)?.facet_counts())
    }

    pub fn stats(&self, index: &str) -> Result<IndexStats> {
        Ok(self.manager(index)?.stats())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn register_synonyms(&self, index: &str, term: &str, synonyms: &[String]) -> Result<()> {
        self.manager(index)?.register_synonyms(term, synonyms);
        self.inner.cache.invalidate_index(&IndexName::from(index));
        Ok(())
    }

    pub fn remove_synonyms(&self, index: &str, term: &str) -> Result<()> {
        self.manager(index)?.remove_synonyms(term);
        self.inner.cache.invalidate_index(&IndexName::from(index));
        Ok(())
    }

    pub fn create_snapshot(&self, index: &str, tags: Vec<String>) -> Result<SnapshotMetadata> {
        let manager = self.manager(index)?;
        let state = manager.snapshot_state();
        self.inner.snapshots.create(index, &state, tags)
    }

    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> Vec<SnapshotMetadata> {
        self.inner.snapshots.list(filter)
    }

    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.inner.snapshots.delete(id)
    }

    /// Restore a snapshot into `target`. Atomic at the index level: the
    /// target is replaced only after the rebuilt index is complete, and on
    /// any error it is left untouched.
    pub fn restore_snapshot(&self, id: &str, target: &str, options: RestoreOptions) -> Result<()> {
        let (metadata, state) = self.inner.snapshots.load(id)?;
        if let Some(filter) = &options.index_filter {
            if &metadata.index != filter {
                return Err(Error::UnknownSnapshot(format!(
                    "snapshot `{}` holds index `{}`, not `{}`",
                    id, metadata.index, filter
                )));
            }
        }

        let target_name = IndexName::from(target);
        let mut indices = self.inner.indices.write();
        let existing = indices.get(&target_name).cloned();
        let fresh = options.clear_existing || existing.is_none();
        let facet_fields = existing
            .as_ref()
            .map(|m| m.options().facet_fields.clone())
            .unwrap_or_default();

        let direct = fresh
            && options.document_filter.is_none()
            && options.merge_strategy == MergeStrategy::Replace;
        let manager = if direct {
            // Shard states carry postings and facet bitmaps; no re-analysis.
            ShardedIndexManager::from_snapshot(
                target_name.clone(),
                facet_fields,
                state,
                self.inner.config.clone(),
            )?
        } else {
            self.rebuild_for_restore(&target_name, existing.as_deref(), fresh, state, &options)?
        };

        indices.insert(target_name.clone(), Arc::new(manager));
        drop(indices);
        self.inner.cache.invalidate_index(&target_name);
        info!(snapshot = %id, index = %target_name, "snapshot restored");
        Ok(())
    }

    /// Merge path: rebuild the target by re-ingesting the combined document
    /// set with preserved sequences and versions.
    fn rebuild_for_restore(
        &self,
        name: &IndexName,
        existing: Option<&ShardedIndexManager>,
        fresh: bool,
        state: IndexSnapshotState,
        options: &RestoreOptions,
    ) -> Result<ShardedIndexManager> {
        let mut mappings = match (fresh, existing) {
            (false, Some(existing)) => existing.mappings().read().clone(),
            _ => Mappings::new(),
        };
        for (field, field_type) in state.mappings.iter() {
            mappings.register(field, *field_type)?;
        }

        let mut by_id: HashMap<DocumentId, (Document, u64)> = HashMap::new();
        if !fresh {
            if let Some(existing) = existing {
                for (doc, seq) in existing.documents() {
                    by_id.insert(doc.id.clone(), (doc, seq));
                }
            }
        }

        // Snapshot shards hold replicas; first copy wins.
        let mut snapshot_docs: HashMap<DocumentId, (Document, u64)> = HashMap::new();
        for shard in state.shards {
            for entry in shard.documents {
                snapshot_docs
                    .entry(entry.doc.id.clone())
                    .or_insert((entry.doc, entry.seq));
            }
        }

        for (id, (doc, seq)) in snapshot_docs {
            if let Some(filter) = &options.document_filter {
                if !filter(&doc) {
                    continue;
                }
            }
            match options.merge_strategy {
                MergeStrategy::Replace => {
                    by_id.insert(id, (doc, seq));
                }
                MergeStrategy::Skip => {
                    by_id.entry(id).or_insert((doc, seq));
                }
                MergeStrategy::Merge => match by_id.entry(id) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        let merged = entry.get_mut();
                        for (field, value) in doc.fields {
                            merged.0.fields.insert(field, value);
                        }
                        merged.0.version = merged.0.version.max(doc.version);
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert((doc, seq));
                    }
                },
            }
        }

        let index_options = match existing {
            Some(existing) => {
                let mut opts = existing.options().clone();
                opts.mappings = Some(mappings.iter().map(|(f, t)| (f.clone(), *t)).collect());
                opts
            }
            None => IndexOptions {
                sharding_enabled: state.layout.num_shards > 1,
                num_shards: state.layout.num_shards,
                replication_factor: state.layout.replication_factor,
                shard_strategy: ShardStrategy::from_name(&state.layout.strategy),
                facet_fields: Vec::new(),
                mappings: Some(mappings.iter().map(|(f, t)| (f.clone(), *t)).collect()),
            },
        };

        let manager =
            ShardedIndexManager::new(name.clone(), index_options, self.inner.config.clone())?;
        let mut docs: Vec<(Document, u64)> = by_id.into_values().collect();
        docs.sort_by_key(|(_, seq)| *seq);
        for (doc, seq) in docs {
            manager.restore_document(doc, seq)?;
        }
        Ok(manager)
    }

    /// Start periodic snapshots of every index. Errors invoke `on_error`
    /// and the schedule continues.
    pub fn schedule_snapshots(
        &self,
        interval: Duration,
        on_error: Option<Box<dyn Fn(&Error) + Send + 'static>>,
    ) {
        let weak = Arc::downgrade(&self.inner);
        let scheduler = SnapshotScheduler::start(interval, move || {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let managers: Vec<Arc<ShardedIndexManager>> =
                inner.indices.read().values().cloned().collect();
            let mut last_error = None;
            for manager in managers {
                let state = manager.snapshot_state();
                if let Err(e) =
                    inner
                        .snapshots
                        .create(manager.name().as_str(), &state, vec!["scheduled".to_string()])
                {
                    if let Some(callback) = &on_error {
                        callback(&e);
                    }
                    last_error = Some(e);
                }
            }
            match last_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });
        *self.inner.scheduler.lock() = Some(scheduler);
    }

    pub fn cancel_snapshot_schedule(&self) {
        self.inner.scheduler.lock().take();
    }
}

fn options_fingerprint(from: usize, size: usize, aggregations: Option<&Value>) -> u64 {
    let mut hasher = DefaultHasher::new();
    from.hash(&mut hasher);
    size.hash(&mut hasher);
    if let Some(aggs) = aggregations {
        aggs.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> SearchEngine {
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        SearchEngine::new(config).unwrap()
    }

    fn sharded(num_shards: usize) -> IndexOptions {
        IndexOptions {
            sharding_enabled: num_shards > 1,
            num_shards,
            ..Default::default()
        }
    }

    fn ids(response: &SearchResponse) -> Vec<&str> {
        response.hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn test_exact_keyword_match() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("chars", IndexOptions::default()).unwrap();
        let report = engine
            .put(
                "chars",
                &[
                    json!({"id": "a", "status": "Alive"}),
                    json!({"id": "b", "status": "Dead"}),
                ],
            )
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);

        let response = engine
            .search("chars", &json!({"term": {"status": "Alive"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(ids(&response), vec!["a"]);
        assert!(response.hits[0].score >= 0.0);
    }

    #[test]
    fn test_phrase_with_slop() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("docs", IndexOptions::default()).unwrap();
        engine
            .put("docs", &[json!({"id": "1", "text": "hello brave new world"})])
            .unwrap();
        let strict = engine
            .search(
                "docs",
                &json!({"match_phrase": {"text": {"query": "hello new world"}}}),
                SearchOptions::default(),
            )
            .unwrap();
        assert_eq!(strict.total, 0);
        let sloppy = engine
            .search(
                "docs",
                &json!({"match_phrase": {"text": {"query": "hello new world", "slop": 1}}}),
                SearchOptions::default(),
            )
            .unwrap();
        assert_eq!(sloppy.total, 1);
    }

    #[test]
    fn test_fuzzy_edit_distance() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("people", IndexOptions::default()).unwrap();
        engine.put("people", &[json!({"id": "1", "name": "Naruto"})]).unwrap();

        let fuzzy = engine
            .search(
                "people",
                &json!({"fuzzy": {"name": {"value": "Naruta", "fuzziness": 1}}}),
                SearchOptions::default(),
            )
            .unwrap();
        assert_eq!(fuzzy.total, 1);

        let exact = engine
            .search(
                "people",
                &json!({"term": {"name": {"value": "Naruta", "fuzziness": 0}}}),
                SearchOptions::default(),
            )
            .unwrap();
        assert_eq!(exact.total, 0);
    }

    #[test]
    fn test_facet_aggregation_counts() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine
            .create_index(
                "anime",
                IndexOptions {
                    facet_fields: vec!["genres".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        engine
            .put(
                "anime",
                &[
                    json!({"id": "1", "genres": ["Action", "Adventure"]}),
                    json!({"id": "2", "genres": ["Action", "Adventure"]}),
                    json!({"id": "3", "genres": ["Action", "Drama"]}),
                ],
            )
            .unwrap();

        let response = engine
            .search(
                "anime",
                &json!({"match_all": {}}),
                SearchOptions {
                    aggregations: Some(json!({"genres": {"terms": {"field": "genres", "size": 10}}})),
                    ..Default::default()
                },
            )
            .unwrap();
        let buckets = &response.aggregations["genres"].buckets;
        let pairs: Vec<(&str, u64)> = buckets
            .iter()
            .map(|b| (b.key.as_str().unwrap(), b.doc_count))
            .collect();
        assert_eq!(pairs, vec![("Action", 3), ("Adventure", 2), ("Drama", 1)]);
        // Facet view mirrors the terms aggregation.
        assert_eq!(response.facets["genres"]["Action"], 3);

        // The standalone facet endpoint covers all documents.
        let facets = engine.facets("anime").unwrap();
        assert_eq!(facets["genres"]["Drama"], 1);
    }

    #[test]
    fn test_aggregations_ignore_pagination() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("n", IndexOptions::default()).unwrap();
        let docs: Vec<Value> = (0..20)
            .map(|i| json!({"id": format!("d{}", i), "genres": ["Action"]}))
            .collect();
        engine.put("n", &docs).unwrap();
        let response = engine
            .search(
                "n",
                &json!({"match_all": {}}),
                SearchOptions {
                    size: Some(3),
                    aggregations: Some(json!({"g": {"terms": {"field": "genres"}}})),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(response.hits.len(), 3);
        assert_eq!(response.total, 20);
        assert_eq!(response.aggregations["g"].buckets[0].doc_count, 20);
    }

    #[test]
    fn test_index_isolation() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("left", IndexOptions::default()).unwrap();
        engine.create_index("right", IndexOptions::default()).unwrap();
        engine.put("left", &[json!({"id": "1", "body": "alpha"})]).unwrap();
        engine.put("right", &[json!({"id": "1", "body": "beta"})]).unwrap();

        let left = engine
            .search("left", &json!({"match": {"body": "alpha"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(left.total, 1);
        let right = engine
            .search("right", &json!({"match": {"body": "alpha"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(right.total, 0);
        assert_eq!(
            engine.get("right", "1").unwrap().unwrap().fields["body"],
            crate::core::types::FieldValue::Text("beta".to_string())
        );
    }

    #[test]
    fn test_bool_empty_should_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("x", IndexOptions::default()).unwrap();
        engine.put("x", &[json!({"id": "1", "body": "something"})]).unwrap();
        let response = engine
            .search("x", &json!({"bool": {"should": []}}), SearchOptions::default())
            .unwrap();
        assert_eq!(response.total, 0);
        assert!(response.hits.is_empty());
    }

    #[test]
    fn test_round_trip_and_versioning() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("rt", IndexOptions::default()).unwrap();
        engine
            .put("rt", &[json!({"id": "a", "title": "first", "year": 1999})])
            .unwrap();
        let doc = engine.get("rt", "a").unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.to_json()["title"], json!("first"));

        engine.put("rt", &[json!({"id": "a", "title": "second"})]).unwrap();
        let doc = engine.get("rt", "a").unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.to_json()["title"], json!("second"));
        // Old content is unsearchable after the update.
        let stale = engine
            .search("rt", &json!({"match": {"title": "first"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(stale.total, 0);
    }

    #[test]
    fn test_delete_isolation() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("d", sharded(3)).unwrap();
        engine
            .put(
                "d",
                &[
                    json!({"id": "a", "body": "shared words here"}),
                    json!({"id": "b", "body": "shared words there"}),
                ],
            )
            .unwrap();
        let report = engine.delete("d", &["a", "missing"]).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);

        assert!(engine.get("d", "a").unwrap().is_none());
        let response = engine
            .search("d", &json!({"match": {"body": "shared"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(ids(&response), vec!["b"]);
        let all = engine
            .search("d", &json!({"match_all": {}}), SearchOptions::default())
            .unwrap();
        assert_eq!(all.total, 1);
    }

    #[test]
    fn test_shard_invariance() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let docs: Vec<Value> = (0..40)
            .map(|i| {
                json!({
                    "id": format!("doc-{}", i),
                    "body": format!("common token{} text", i % 7),
                    "genres": [if i % 2 == 0 { "Even" } else { "Odd" }],
                })
            })
            .collect();
        engine.create_index("one", sharded(1)).unwrap();
        engine.create_index("many", sharded(4)).unwrap();
        engine.put("one", &docs).unwrap();
        engine.put("many", &docs).unwrap();

        let query = json!({"match": {"body": "common"}});
        let options = || SearchOptions {
            size: Some(100),
            aggregations: Some(json!({"g": {"terms": {"field": "genres"}}})),
            ..Default::default()
        };
        let single = engine.search("one", &query, options()).unwrap();
        let multi = engine.search("many", &query, options()).unwrap();

        assert_eq!(single.total, multi.total);
        assert_eq!(ids(&single), ids(&multi));
        let scores_single: Vec<f32> = single.hits.iter().map(|h| h.score).collect();
        let scores_multi: Vec<f32> = multi.hits.iter().map(|h| h.score).collect();
        assert_eq!(scores_single, scores_multi);
        assert_eq!(
            single.aggregations["g"].buckets.len(),
            multi.aggregations["g"].buckets.len()
        );
        assert_eq!(
            single.aggregations["g"].buckets[0].doc_count,
            multi.aggregations["g"].buckets[0].doc_count
        );
    }

    #[test]
    fn test_replication_survives_reads() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine
            .create_index(
                "rep",
                IndexOptions {
                    sharding_enabled: true,
                    num_shards: 3,
                    replication_factor: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        let docs: Vec<Value> = (0..12)
            .map(|i| json!({"id": format!("r{}", i), "body": "replicated text"}))
            .collect();
        engine.put("rep", &docs).unwrap();

        let response = engine
            .search(
                "rep",
                &json!({"match": {"body": "replicated"}}),
                SearchOptions { size: Some(50), ..Default::default() },
            )
            .unwrap();
        // Deduplicated totals despite two copies of every document.
        assert_eq!(response.total, 12);
        let stats = engine.stats("rep").unwrap();
        assert_eq!(stats.documents, 12);
    }

    #[test]
    fn test_deterministic_ranking() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("det", sharded(2)).unwrap();
        let docs: Vec<Value> = (0..25)
            .map(|i| json!({"id": format!("doc-{}", i), "body": "same exact text"}))
            .collect();
        engine.put("det", &docs).unwrap();

        let query = json!({"match": {"body": "exact"}});
        let first = engine
            .search("det", &query, SearchOptions { size: Some(50), ..Default::default() })
            .unwrap();
        // Equal scores fall back to ingest order ascending.
        assert_eq!(first.hits[0].id.as_str(), "doc-0");
        for _ in 0..5 {
            let again = engine
                .search("det", &query, SearchOptions { size: Some(50), ..Default::default() })
                .unwrap();
            assert_eq!(ids(&first), ids(&again));
            let scores: Vec<f32> = again.hits.iter().map(|h| h.score).collect();
            let first_scores: Vec<f32> = first.hits.iter().map(|h| h.score).collect();
            assert_eq!(first_scores, scores);
        }
    }

    #[test]
    fn test_bm25_prefers_rarer_terms_and_shorter_docs() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("bm", IndexOptions::default()).unwrap();
        engine
            .put(
                "bm",
                &[
                    json!({"id": "short", "body": "quantum physics"}),
                    json!({"id": "long", "body": "quantum physics and a very long tail of extra words diluting the match"}),
                    json!({"id": "other", "body": "classical mechanics"}),
                ],
            )
            .unwrap();
        let response = engine
            .search("bm", &json!({"match": {"body": "quantum"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(ids(&response), vec!["short", "long"]);
        assert!(response.hits[0].score > response.hits[1].score);
    }

    #[test]
    fn test_snapshot_equivalence() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("snap", sharded(2)).unwrap();
        let docs: Vec<Value> = (0..15)
            .map(|i| json!({
                "id": format!("s{}", i),
                "body": format!("snapshot body {}", i % 4),
                "genres": ["Keep"],
            }))
            .collect();
        engine.put("snap", &docs).unwrap();

        let query = json!({"match": {"body": "snapshot"}});
        let options = || SearchOptions {
            size: Some(50),
            aggregations: Some(json!({"g": {"terms": {"field": "genres"}}})),
            ..Default::default()
        };
        let before = engine.search("snap", &query, options()).unwrap();

        let metadata = engine.create_snapshot("snap", vec!["test".to_string()]).unwrap();
        // Mutate, then restore over the damage.
        engine.delete("snap", &["s0", "s1"]).unwrap();
        engine.put("snap", &[json!({"id": "intruder", "body": "snapshot noise"})]).unwrap();

        engine
            .restore_snapshot(
                &metadata.id,
                "snap",
                RestoreOptions {
                    clear_existing: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let after = engine.search("snap", &query, options()).unwrap();
        assert_eq!(before.total, after.total);
        assert_eq!(ids(&before), ids(&after));
        let before_scores: Vec<f32> = before.hits.iter().map(|h| h.score).collect();
        let after_scores: Vec<f32> = after.hits.iter().map(|h| h.score).collect();
        assert_eq!(before_scores, after_scores);
        assert_eq!(
            before.aggregations["g"].buckets[0].doc_count,
            after.aggregations["g"].buckets[0].doc_count
        );
    }

    #[test]
    fn test_snapshot_restore_into_new_index_and_filters() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("src", IndexOptions::default()).unwrap();
        engine
            .put(
                "src",
                &[
                    json!({"id": "keep", "rank": 1, "body": "alpha"}),
                    json!({"id": "drop", "rank": 99, "body": "beta"}),
                ],
            )
            .unwrap();
        let metadata = engine.create_snapshot("src", Vec::new()).unwrap();

        engine
            .restore_snapshot(
                &metadata.id,
                "copy",
                RestoreOptions {
                    document_filter: Some(Arc::new(|doc: &Document| {
                        doc.field("rank").and_then(|v| v.as_f64()) == Some(1.0)
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let response = engine
            .search("copy", &json!({"match_all": {}}), SearchOptions::default())
            .unwrap();
        assert_eq!(ids(&response), vec!["keep"]);

        // Index filter mismatch leaves the engine untouched.
        let err = engine
            .restore_snapshot(
                &metadata.id,
                "other",
                RestoreOptions {
                    index_filter: Some("not-src".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSnapshot(_)));
        assert!(engine.search("other", &json!({"match_all": {}}), SearchOptions::default()).is_err());
    }

    #[test]
    fn test_snapshot_merge_strategies() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("m", IndexOptions::default()).unwrap();
        engine.put("m", &[json!({"id": "a", "body": "original"})]).unwrap();
        let metadata = engine.create_snapshot("m", Vec::new()).unwrap();

        engine.put("m", &[json!({"id": "a", "body": "changed"}), json!({"id": "b", "body": "extra"})]).unwrap();

        // Skip keeps the live version.
        engine
            .restore_snapshot(
                &metadata.id,
                "m",
                RestoreOptions {
                    merge_strategy: MergeStrategy::Skip,
                    ..Default::default()
                },
            )
            .unwrap();
        let doc = engine.get("m", "a").unwrap().unwrap();
        assert_eq!(doc.to_json()["body"], json!("changed"));
        assert!(engine.get("m", "b").unwrap().is_some());

        // Replace brings the snapshot copy back.
        engine
            .restore_snapshot(
                &metadata.id,
                "m",
                RestoreOptions {
                    merge_strategy: MergeStrategy::Replace,
                    ..Default::default()
                },
            )
            .unwrap();
        let doc = engine.get("m", "a").unwrap().unwrap();
        assert_eq!(doc.to_json()["body"], json!("original"));
        // Merge restore without clear keeps documents the snapshot lacks.
        assert!(engine.get("m", "b").unwrap().is_some());
    }

    #[test]
    fn test_cache_coherence_after_ingest() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("c", IndexOptions::default()).unwrap();
        engine.put("c", &[json!({"id": "1", "body": "cached text"})]).unwrap();

        let query = json!({"match": {"body": "cached"}});
        let first = engine.search("c", &query, SearchOptions::default()).unwrap();
        assert_eq!(first.total, 1);
        let warm = engine.search("c", &query, SearchOptions::default()).unwrap();
        assert_eq!(warm.total, 1);
        assert!(engine.cache_stats().hit_count >= 1);

        // A write invalidates before the next search returns.
        engine.put("c", &[json!({"id": "2", "body": "cached again"})]).unwrap();
        let after = engine.search("c", &query, SearchOptions::default()).unwrap();
        assert_eq!(after.total, 2);
    }

    #[test]
    fn test_unknown_index_and_exit_codes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .search("ghost", &json!({"match_all": {}}), SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownIndex(_)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(Error::MalformedQuery("x".to_string()).exit_code(), 2);
        assert_eq!(Error::ResourceExhausted("x".to_string()).exit_code(), 5);

        engine.create_index("ok", IndexOptions::default()).unwrap();
        let err = engine.create_index("ok", IndexOptions::default()).unwrap_err();
        assert!(matches!(err, Error::IndexExists(_)));
    }

    #[test]
    fn test_malformed_query_surfaces() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("q", IndexOptions::default()).unwrap();
        let err = engine
            .search("q", &json!({"unknown_kind": {}}), SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedQuery(_)));
    }

    #[test]
    fn test_batch_isolates_bad_documents() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("b", IndexOptions::default()).unwrap();
        engine.put("b", &[json!({"id": "seed", "year": 2000})]).unwrap();
        let report = engine
            .put(
                "b",
                &[
                    json!({"id": "good", "year": 2001}),
                    json!({"id": "bad", "year": "not a number"}),
                    json!({"body": "missing id"}),
                ],
            )
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 2);
        assert!(engine.get("b", "good").unwrap().is_some());
        assert!(engine.get("b", "bad").unwrap().is_none());
    }

    #[test]
    fn test_expired_deadline_returns_partial() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("t", sharded(2)).unwrap();
        engine.put("t", &[json!({"id": "1", "body": "text"})]).unwrap();
        let response = engine
            .search(
                "t",
                &json!({"match_all": {}}),
                SearchOptions {
                    deadline: Some(Duration::ZERO),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(response.partial);
        assert_eq!(response.degraded_shards.len(), 2);
        assert_eq!(response.total, 0);
    }

    #[test]
    fn test_list_indexes_and_stats() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("alpha", sharded(2)).unwrap();
        engine.create_index("beta", IndexOptions::default()).unwrap();
        engine.put("alpha", &[json!({"id": "1", "body": "hello world"})]).unwrap();

        let infos = engine.list_indexes();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name.as_str(), "alpha");
        assert_eq!(infos[0].doc_count, 1);
        assert_eq!(infos[0].shards, 2);

        let stats = engine.stats("alpha").unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.tokens, 2);
        assert_eq!(stats.shards.len(), 2);
        assert!(stats.memory_bytes > 0);

        engine.delete_index("beta").unwrap();
        assert!(matches!(engine.stats("beta"), Err(Error::UnknownIndex(_))));
    }

    #[test]
    fn test_synonym_registration() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("s", IndexOptions::default()).unwrap();
        engine.put("s", &[json!({"id": "1", "body": "a quick brown fox"})]).unwrap();
        engine
            .register_synonyms("s", "fast", &["quick".to_string()])
            .unwrap();
        let response = engine
            .search("s", &json!({"match": {"body": "fast"}}), SearchOptions::default())
            .unwrap();
        assert_eq!(response.total, 1);
    }

    #[test]
    fn test_scheduled_snapshots_fire() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.create_index("sched", IndexOptions::default()).unwrap();
        engine.put("sched", &[json!({"id": "1", "body": "x"})]).unwrap();
        engine.schedule_snapshots(Duration::from_millis(20), None);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let listed = engine.list_snapshots(&SnapshotFilter {
                index: Some("sched".to_string()),
                tag: Some("scheduled".to_string()),
            });
            if !listed.is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "no scheduled snapshot within 5s");
            std::thread::sleep(Duration::from_millis(10));
        }
        engine.cancel_snapshot_schedule();
    }
}
