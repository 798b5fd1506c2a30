use parking_lot::RwLock;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::analysis::analyzer::{AnalysisOptions, AnalyzerRegistry};
use crate::core::config::{EngineConfig, IndexOptions, ShardStrategy};
use crate::core::error::Result;
use crate::core::stats::{IndexStats, ShardStats};
use crate::core::types::{Document, DocumentId, IndexName};
use crate::facet::engine::{
    AggregationPartial, AggregationRequest, AggregationResult, finalize, merge_partials,
};
use crate::query::ast::Query;
use crate::scoring::scorer::{Bm25Scorer, DocStats, Scorer, TermStats};
use crate::search::context::SearchContext;
use crate::search::ranking::{RankedDoc, RankingPipeline};
use crate::search::results::{Hit, SearchResponse};
use crate::search::synonyms::SynonymEngine;
use crate::shard::router::ShardRouter;
use crate::shard::shard::{Shard, ShardCaps, ShardOutcome};
use crate::shard::worker::ShardWorker;
use crate::schema::mappings::Mappings;
use crate::storage::snapshot::{IndexSnapshotState, ShardLayoutMeta};

/// Owns one index's shards and merges their partial results.
///
/// Documents are placed by the router; every write fans out to the
/// document's replica set through the single-writer shard workers, and
/// every query scatters to all shards in parallel.
pub struct ShardedIndexManager {
    name: IndexName,
    options: IndexOptions,
    config: Arc<EngineConfig>,
    shards: Vec<Arc<Shard>>,
    workers: Vec<ShardWorker>,
    router: ShardRouter,
    mappings: Arc<RwLock<Mappings>>,
    analyzers: Arc<AnalyzerRegistry>,
    synonyms: RwLock<SynonymEngine>,
    next_seq: AtomicU64,
}

impl ShardedIndexManager {
    pub fn new(name: IndexName, options: IndexOptions, config: Arc<EngineConfig>) -> Result<Self> {
        let num_shards = options.effective_shards();
        let shards: Vec<Arc<Shard>> = (0..num_shards).map(|id| Arc::new(Shard::new(id))).collect();

        let mut mappings = Mappings::with_keyword_hints(
            options
                .facet_fields
                .iter()
                .map(|f| f.rsplit('.').next().unwrap_or(f).to_lowercase()),
        );
        if let Some(seed) = &options.mappings {
            for (field, field_type) in seed {
                mappings.register(field, *field_type)?;
            }
        }

        Self::assemble(name, options, config, shards, mappings, 0)
    }

    /// Rebuild an index directly from snapshot state (no re-analysis).
    pub fn from_snapshot(
        name: IndexName,
        facet_fields: Vec<String>,
        state: IndexSnapshotState,
        config: Arc<EngineConfig>,
    ) -> Result<Self> {
        let options = IndexOptions {
            sharding_enabled: state.layout.num_shards > 1,
            num_shards: state.layout.num_shards,
            replication_factor: state.layout.replication_factor,
            shard_strategy: ShardStrategy::from_name(&state.layout.strategy),
            facet_fields,
            mappings: None,
        };
        let shards: Vec<Arc<Shard>> = state
            .shards
            .into_iter()
            .enumerate()
            .map(|(id, shard_state)| Arc::new(Shard::from_snapshot_state(id, shard_state)))
            .collect();
        Self::assemble(name, options, config, shards, state.mappings, state.next_seq)
    }

    fn assemble(
        name: IndexName,
        options: IndexOptions,
        config: Arc<EngineConfig>,
        shards: Vec<Arc<Shard>>,
        mappings: Mappings,
        next_seq: u64,
    ) -> Result<Self> {
        let analyzers = Arc::new(AnalyzerRegistry::new(&AnalysisOptions {
            stopwords: config.stopwords.clone(),
            lowercase_keywords: config.lowercase_keywords,
            enable_stemming: config.enable_stemming,
        }));
        let mappings = Arc::new(RwLock::new(mappings));
        let caps = ShardCaps {
            max_docs: config.max_docs_per_shard,
            max_terms: config.max_terms_per_shard,
        };
        let workers = shards
            .iter()
            .map(|shard| {
                ShardWorker::spawn(
                    shard.clone(),
                    mappings.clone(),
                    analyzers.clone(),
                    caps,
                    config.worker_queue_size,
                    config.token_cache_entries,
                )
            })
            .collect();
        let router = ShardRouter::new(
            options.shard_strategy.clone(),
            options.effective_shards(),
            options.effective_replication(),
        );
        Ok(ShardedIndexManager {
            name,
            options,
            config,
            shards,
            workers,
            router,
            mappings,
            analyzers,
            synonyms: RwLock::new(SynonymEngine::new()),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    pub fn name(&self) -> &IndexName {
        &self.name
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn mappings(&self) -> Arc<RwLock<Mappings>> {
        self.mappings.clone()
    }

    fn replication(&self) -> u64 {
        self.router.replication() as u64
    }

    /// Deduplicated document count.
    pub fn doc_count(&self) -> u64 {
        let total: u64 = self.shards.iter().map(|s| s.doc_count()).sum();
        total / self.replication()
    }

    /// Ingest one JSON document: auto-map, validate, route, fan out.
    pub fn put_json(&self, source: &Value) -> Result<()> {
        let doc = Document::from_json(source)?;
        {
            let mut mappings = self.mappings.write();
            mappings.auto_map(&doc.fields)?;
            mappings.validate(&doc.fields)?;
        }
        self.put_document(doc)
    }

    fn put_document(&self, mut doc: Document) -> Result<()> {
        // Find existing copies: version bump, and cleanup of shards the
        // router no longer targets (rebalance may have moved the doc).
        let mut old_version = 0u64;
        let mut holders: Vec<usize> = Vec::new();
        for shard in &self.shards {
            let core = shard.core();
            if let Some(stored) = core.store.get(&doc.id) {
                old_version = old_version.max(stored.doc.version);
                holders.push(shard.id);
            }
        }
        doc.version = old_version + 1;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let targets = self.router.replicas(&doc.id);
        for holder in holders {
            if !targets.contains(&holder) {
                self.workers[holder].delete(doc.id.clone())?;
            }
        }
        for &target in &targets {
            self.workers[target].put(doc.clone(), seq)?;
        }
        Ok(())
    }

    /// Re-ingest with a preserved sequence and version (snapshot restore).
    pub fn restore_document(&self, doc: Document, seq: u64) -> Result<()> {
        self.next_seq.fetch_max(seq + 1, Ordering::SeqCst);
        for &target in &self.router.replicas(&doc.id) {
            self.workers[target].put(doc.clone(), seq)?;
        }
        Ok(())
    }

    /// Delete wherever the document lives; placement may predate a
    /// rebalance, so the delete broadcasts.
    pub fn delete_document(&self, id: &DocumentId) -> Result<bool> {
        let mut found = false;
        for worker in &self.workers {
            found |= worker.delete(id.clone())?;
        }
        Ok(found)
    }

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        for shard in &self.shards {
            let core = shard.core();
            if let Some(stored) = core.store.get(id) {
                return Some(stored.doc.clone());
            }
        }
        None
    }

    /// All documents with their ingest sequence, deduplicated, ascending.
    pub fn documents(&self) -> Vec<(Document, u64)> {
        let mut by_id: HashMap<DocumentId, (Document, u64)> = HashMap::new();
        for shard in &self.shards {
            for (doc, seq) in shard.documents() {
                by_id.entry(doc.id.clone()).or_insert((doc, seq));
            }
        }
        let mut docs: Vec<(Document, u64)> = by_id.into_values().collect();
        docs.sort_by_key(|(_, seq)| *seq);
        docs
    }

    pub fn register_synonyms(&self, term: &str, synonyms: &[String]) {
        self.synonyms.write().register(term, synonyms);
    }

    pub fn remove_synonyms(&self, term: &str) {
        self.synonyms.write().remove(term);
    }

    /// Scatter a query to every shard, gather and merge.
    pub fn search(
        &self,
        query: &Query,
        from: usize,
        size: usize,
        aggregations: &[(String, AggregationRequest)],
        ctx: &SearchContext,
    ) -> Result<SearchResponse> {
        let mappings_guard = self.mappings.read();
        let mappings = &*mappings_guard;
        let synonyms_guard = self.synonyms.read();
        let synonyms = &*synonyms_guard;

        let results: Vec<(usize, Result<ShardOutcome>)> = self
            .shards
            .par_iter()
            .map(|shard| {
                (
                    shard.id,
                    shard.execute(
                        query,
                        ctx,
                        aggregations,
                        mappings,
                        &self.analyzers,
                        synonyms,
                        self.config.default_operator,
                    ),
                )
            })
            .collect();

        let mut outcomes = Vec::with_capacity(results.len());
        let mut degraded = Vec::new();
        for (shard_id, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(index = %self.name, shard = shard_id, error = %e, "shard query degraded");
                    degraded.push(shard_id);
                }
            }
        }

        let replication = self.replication();
        let response = self.merge(outcomes, from, size, aggregations, replication);
        debug!(
            index = %self.name,
            total = response.total,
            degraded = degraded.len(),
            "query merged"
        );
        Ok(SearchResponse {
            partial: !degraded.is_empty(),
            degraded_shards: degraded,
            ..response
        })
    }

    /// Merge shard outcomes: global-stat rescoring, dedup, rank, paginate,
    /// aggregation merge.
    fn merge(
        &self,
        outcomes: Vec<ShardOutcome>,
        from: usize,
        size: usize,
        aggregations: &[(String, AggregationRequest)],
        replication: u64,
    ) -> SearchResponse {
        // Global collection statistics; every document appears exactly
        // `replication` times across shards.
        let total_docs: u64 = outcomes.iter().map(|o| o.doc_count).sum::<u64>() / replication;
        let sum_lengths: u64 = outcomes.iter().map(|o| o.sum_lengths).sum::<u64>() / replication;
        let avg_doc_length = if total_docs > 0 {
            sum_lengths as f32 / total_docs as f32
        } else {
            0.0
        };

        // Global document frequencies: shards hold accurate local n(t).
        let mut doc_freqs: HashMap<(String, String), u64> = HashMap::new();
        for outcome in &outcomes {
            for c in &outcome.contributions {
                *doc_freqs
                    .entry((c.field.clone(), c.term.clone()))
                    .or_insert(0) += c.doc_freq;
            }
        }
        for df in doc_freqs.values_mut() {
            *df /= replication;
        }

        let scorer = Bm25Scorer::default();
        let mut best: HashMap<DocumentId, RankedDoc> = HashMap::new();
        for outcome in &outcomes {
            for hit in &outcome.hits {
                let mut score = outcome.match_all_boost.unwrap_or(0.0);
                let doc_stats = DocStats {
                    doc_length: hit.length,
                    avg_doc_length,
                    total_docs,
                };
                for c in &outcome.contributions {
                    if let Some(&tf) = c.term_freqs.get(&hit.internal) {
                        let doc_freq = doc_freqs[&(c.field.clone(), c.term.clone())];
                        score += scorer.score(tf, &TermStats { doc_freq }, &doc_stats) * c.boost;
                    }
                }
                let candidate = RankedDoc {
                    shard_id: outcome.shard_id,
                    internal: hit.internal,
                    id: hit.id.clone(),
                    score,
                    seq: hit.seq,
                    version: hit.version,
                };
                match best.entry(candidate.id.clone()) {
                    // Replicas score identically; keep the highest.
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        if candidate.score > entry.get().score {
                            entry.insert(candidate);
                        }
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(candidate);
                    }
                }
            }
        }

        let pipeline = RankingPipeline::new(from, size);
        let (total, page) = pipeline.rank(best.into_values().collect());

        let hits = page
            .into_iter()
            .filter_map(|ranked| {
                let core = self.shards[ranked.shard_id].core();
                core.store.get_internal(ranked.internal).map(|stored| Hit {
                    id: ranked.id,
                    index: self.name.clone(),
                    score: ranked.score.max(0.0),
                    version: ranked.version,
                    source: stored.doc.to_json(),
                })
            })
            .collect();

        // Merge aggregation partials by summing per-key counts.
        let mut merged: HashMap<String, AggregationPartial> = HashMap::new();
        for outcome in outcomes {
            for (name, partial) in outcome.aggregations {
                match merged.entry(name) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        merge_partials(entry.get_mut(), partial)
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(partial);
                    }
                }
            }
        }
        let mut agg_results: HashMap<String, AggregationResult> = HashMap::new();
        let mut facets: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for (name, request) in aggregations {
            let Some(partial) = merged.remove(name) else {
                continue;
            };
            let result = finalize(request, partial, replication);
            if let AggregationRequest::Terms { field, .. } = request {
                let counts = result
                    .buckets
                    .iter()
                    .filter_map(|b| {
                        b.key
                            .as_str()
                            .map(|k| (k.to_string(), b.doc_count))
                    })
                    .collect();
                facets.insert(field.clone(), counts);
            }
            agg_results.insert(name.clone(), result);
        }

        SearchResponse {
            hits,
            total,
            from,
            size: pipeline.size(),
            aggregations: agg_results,
            facets,
            took_ms: 0,
            partial: false,
            degraded_shards: Vec::new(),
        }
    }

    /// Full value → count view of the configured facet fields.
    pub fn facet_counts(&self) -> HashMap<String, HashMap<String, u64>> {
        let replication = self.replication();
        let mut facets: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for field in &self.options.facet_fields {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for shard in &self.shards {
                for (value, count) in shard.core().facets.field_counts(field) {
                    *counts.entry(value).or_insert(0) += count;
                }
            }
            for count in counts.values_mut() {
                *count /= replication;
            }
            facets.insert(field.clone(), counts);
        }
        facets
    }

    pub fn stats(&self) -> IndexStats {
        let replication = self.replication();
        let mut shard_stats = Vec::with_capacity(self.shards.len());
        let mut tokens = 0u64;
        let mut memory = 0u64;
        for shard in &self.shards {
            let core = shard.core();
            let shard_tokens = core.inverted.total_tokens();
            tokens += shard_tokens;
            memory += core.store.sum_lengths() * 8 + core.inverted.term_count() as u64 * 48;
            shard_stats.push(ShardStats {
                id: shard.id,
                documents: core.store.count(),
                terms: core.inverted.term_count() as u64,
                tokens: shard_tokens,
            });
        }
        IndexStats {
            name: self.name.clone(),
            documents: self.doc_count(),
            tokens: tokens / replication,
            memory_bytes: memory,
            shards: shard_stats,
        }
    }

    /// Relative deviation of the fullest/emptiest shard from the mean.
    fn imbalance(&self) -> f64 {
        let counts: Vec<u64> = self.shards.iter().map(|s| s.doc_count()).collect();
        let total: u64 = counts.iter().sum();
        if total == 0 || counts.len() < 2 {
            return 0.0;
        }
        let mean = total as f64 / counts.len() as f64;
        counts
            .iter()
            .map(|&c| (c as f64 - mean).abs() / mean)
            .fold(0.0, f64::max)
    }

    /// Rebalance after batch ingest when enabled and worthwhile.
    pub fn maybe_rebalance(&self) {
        if !self.config.auto_rebalance || self.replication() > 1 {
            return;
        }
        let total: u64 = self.shards.iter().map(|s| s.doc_count()).sum();
        if total < self.config.rebalance_min_docs {
            return;
        }
        if self.imbalance() > self.config.rebalance_threshold {
            if let Err(e) = self.rebalance() {
                warn!(index = %self.name, error = %e, "rebalance failed");
            }
        }
    }

    /// Move documents from the fullest to the emptiest shard until the
    /// imbalance drops under the threshold. Online: each document is
    /// re-indexed into its new shard before leaving the source.
    pub fn rebalance(&self) -> Result<u64> {
        if self.replication() > 1 || self.shards.len() < 2 {
            return Ok(0);
        }
        let mut moved = 0u64;
        let safety: u64 = self.shards.iter().map(|s| s.doc_count()).sum();
        while moved <= safety {
            let counts: Vec<u64> = self.shards.iter().map(|s| s.doc_count()).collect();
            let total: u64 = counts.iter().sum();
            if total == 0 {
                break;
            }
            let mean = total as f64 / counts.len() as f64;
            let (source, &max_count) = counts
                .iter()
                .enumerate()
                .max_by_key(|&(_, &c)| c)
                .expect("non-empty");
            let (target, _) = counts
                .iter()
                .enumerate()
                .min_by_key(|&(_, &c)| c)
                .expect("non-empty");
            let deviation = counts
                .iter()
                .map(|&c| (c as f64 - mean).abs() / mean)
                .fold(0.0, f64::max);
            if deviation <= self.config.rebalance_threshold || source == target || max_count == 0 {
                break;
            }

            let Some((doc, seq)) = self.shards[source].oldest_document() else {
                break;
            };
            self.workers[target].put(doc.clone(), seq)?;
            self.workers[source].delete(doc.id.clone())?;
            moved += 1;
        }
        if moved > 0 {
            info!(index = %self.name, moved, "rebalance moved documents");
        }
        Ok(moved)
    }

    /// Per-shard-consistent snapshot of the whole index.
    pub fn snapshot_state(&self) -> IndexSnapshotState {
        IndexSnapshotState {
            mappings: self.mappings.read().clone(),
            layout: ShardLayoutMeta {
                num_shards: self.shards.len(),
                replication_factor: self.router.replication(),
                strategy: self.options.shard_strategy.name().to_string(),
            },
            shards: self.shards.iter().map(|s| s.snapshot_state()).collect(),
            next_seq: self.next_seq.load(Ordering::SeqCst),
        }
    }
}
