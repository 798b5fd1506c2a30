use lru::LruCache;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::analysis::analyzer::{AnalyzerRegistry, analyzer_name};
use crate::analysis::token::Token;
use crate::core::error::{Error, Result};
use crate::core::types::{Document, DocumentId, FieldValue, flatten_fields, format_number};
use crate::facet::engine::{AggregationPartial, AggregationRequest, compute_partial};
use crate::facet::index::AggregationIndex;
use crate::index::inverted::InvertedIndex;
use crate::query::ast::Query;
use crate::query::parser::BoolOperator;
use crate::schema::field_type::FieldType;
use crate::schema::mappings::Mappings;
use crate::search::context::SearchContext;
use crate::search::executor::{QueryExecutor, TermContribution, canonical_date};
use crate::search::synonyms::SynonymEngine;
use crate::store::documents::DocumentStore;
use crate::storage::snapshot::{SnapshotDoc, SnapshotShardState};

/// Per-shard ingest caps.
#[derive(Debug, Clone, Copy)]
pub struct ShardCaps {
    pub max_docs: usize,
    pub max_terms: usize,
}

/// Bounded per-worker cache of analyzed text values.
pub struct TokenCache {
    cache: LruCache<(String, String), Vec<Token>>,
}

impl TokenCache {
    pub fn new(entries: usize) -> Self {
        TokenCache {
            cache: LruCache::new(NonZeroUsize::new(entries.max(1)).expect("non-zero")),
        }
    }

    fn analyze(
        &mut self,
        analyzers: &AnalyzerRegistry,
        field_type: FieldType,
        text: &str,
    ) -> Vec<Token> {
        let key = (analyzer_name(field_type).to_string(), text.to_string());
        if let Some(tokens) = self.cache.get(&key) {
            return tokens.clone();
        }
        let tokens = analyzers.for_field_type(field_type).analyze(text);
        self.cache.put(key, tokens.clone());
        tokens
    }
}

/// Index-time token stream for one field value.
pub fn value_tokens(
    field_type: FieldType,
    value: &FieldValue,
    analyzers: &AnalyzerRegistry,
    cache: &mut TokenCache,
) -> Vec<Token> {
    match value {
        FieldValue::Text(s) => match field_type {
            FieldType::Date => vec![Token::new(canonical_date(s), 0)],
            FieldType::Number(_) => s
                .parse::<f64>()
                .map(|n| vec![Token::new(format_number(n), 0)])
                .unwrap_or_default(),
            FieldType::Boolean => vec![Token::new(s.to_lowercase(), 0)],
            _ => cache.analyze(analyzers, field_type, s),
        },
        FieldValue::Number(n) => vec![Token::new(format_number(*n), 0)],
        FieldValue::Boolean(b) => vec![Token::new(b.to_string(), 0)],
        FieldValue::Array(items) => {
            let mut tokens = Vec::new();
            let mut offset = 0u32;
            for item in items {
                let element = value_tokens(field_type, item, analyzers, cache);
                let max_position = element.iter().map(|t| t.position).max();
                for mut token in element {
                    token.position += offset;
                    tokens.push(token);
                }
                if let Some(max) = max_position {
                    offset += max + 1;
                }
            }
            tokens
        }
        _ => Vec::new(),
    }
}

/// Canonical facet value strings for one (facetable) field value.
pub fn facet_values(value: &FieldValue) -> Vec<String> {
    match value {
        FieldValue::Text(s) => vec![s.clone()],
        FieldValue::Number(n) => vec![format_number(*n)],
        FieldValue::Boolean(b) => vec![b.to_string()],
        FieldValue::Array(items) => items.iter().flat_map(facet_values).collect(),
        _ => Vec::new(),
    }
}

/// The structures one shard owns exclusively.
pub struct ShardCore {
    pub inverted: InvertedIndex,
    pub store: DocumentStore,
    pub facets: AggregationIndex,
    next_internal: u32,
}

impl ShardCore {
    fn new() -> Self {
        ShardCore {
            inverted: InvertedIndex::new(),
            store: DocumentStore::new(),
            facets: AggregationIndex::new(),
            next_internal: 0,
        }
    }

    fn remove(&mut self, id: &DocumentId) -> bool {
        match self.store.delete(id) {
            Some(internal) => {
                self.inverted.remove_document(internal);
                self.facets.remove_document(internal);
                true
            }
            None => false,
        }
    }
}

/// One matched document leaving a shard, score inputs attached.
#[derive(Debug, Clone)]
pub struct ShardHit {
    pub internal: u32,
    pub id: DocumentId,
    pub seq: u64,
    pub length: u32,
    pub version: u64,
}

/// Everything one shard returns for one query.
pub struct ShardOutcome {
    pub shard_id: usize,
    pub hits: Vec<ShardHit>,
    pub contributions: Vec<TermContribution>,
    pub match_all_boost: Option<f32>,
    pub aggregations: HashMap<String, AggregationPartial>,
    pub doc_count: u64,
    pub sum_lengths: u64,
}

/// One partition of an index: inverted index, document store and facet
/// index behind a single lock. Writes come only from the shard's worker;
/// queries read a consistent view for their duration.
pub struct Shard {
    pub id: usize,
    core: RwLock<ShardCore>,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Shard {
            id,
            core: RwLock::new(ShardCore::new()),
        }
    }

    pub fn core(&self) -> RwLockReadGuard<'_, ShardCore> {
        self.core.read()
    }

    /// Index one document; an existing document with the same id is
    /// replaced atomically under the shard's write lock.
    pub fn apply_put(
        &self,
        doc: Document,
        seq: u64,
        mappings: &Mappings,
        analyzers: &AnalyzerRegistry,
        caps: ShardCaps,
        cache: &mut TokenCache,
    ) -> Result<()> {
        let mut core = self.core.write();
        let replacing = core.store.contains(&doc.id);
        if !replacing {
            if core.store.count() as usize >= caps.max_docs {
                return Err(Error::ResourceExhausted(format!(
                    "shard {} document cap ({}) reached",
                    self.id, caps.max_docs
                )));
            }
            if core.inverted.term_count() >= caps.max_terms {
                return Err(Error::ResourceExhausted(format!(
                    "shard {} term cap ({}) reached",
                    self.id, caps.max_terms
                )));
            }
        }
        if replacing {
            core.remove(&doc.id);
        }

        let internal = core.next_internal;
        core.next_internal += 1;

        let mut length = 0u32;
        for (path, value) in flatten_fields(&doc.fields) {
            let Some(field_type) = mappings.type_of(&path) else {
                continue;
            };
            core.facets.mark_path(&path, internal);
            if field_type.is_facetable() {
                for facet_value in facet_values(value) {
                    core.facets.add_value(&path, &facet_value, internal);
                }
            }
            if !field_type.is_indexed() {
                continue;
            }
            let tokens = value_tokens(field_type, value, analyzers, cache);
            for token in &tokens {
                core.inverted
                    .add_token(&path, &token.text, internal, token.position);
            }
            length += tokens.len() as u32;
        }
        core.store.put(internal, doc, length, seq);
        Ok(())
    }

    /// Remove a document; postings, facet entries and the stored document
    /// go together.
    pub fn apply_delete(&self, id: &DocumentId) -> bool {
        self.core.write().remove(id)
    }

    /// Evaluate a query against this shard's current state.
    pub fn execute(
        &self,
        query: &Query,
        ctx: &SearchContext,
        aggregations: &[(String, AggregationRequest)],
        mappings: &Mappings,
        analyzers: &AnalyzerRegistry,
        synonyms: &SynonymEngine,
        default_operator: BoolOperator,
    ) -> Result<ShardOutcome> {
        let core = self.core.read();
        let executor = QueryExecutor::new(
            &core.inverted,
            &core.store,
            mappings,
            analyzers,
            synonyms,
            default_operator,
        );
        let (docs, mut acc) = executor.execute(query, ctx)?;

        // Fixed contribution order keeps float summation deterministic
        // across expansion discovery orders.
        acc.contributions
            .sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.term.cmp(&b.term)));

        let hits: Vec<ShardHit> = docs
            .iter()
            .filter_map(|internal| {
                core.store.get_internal(internal).map(|stored| ShardHit {
                    internal,
                    id: stored.doc.id.clone(),
                    seq: stored.seq,
                    length: stored.length,
                    version: stored.doc.version,
                })
            })
            .collect();

        let mut partials = HashMap::new();
        for (name, request) in aggregations {
            ctx.checkpoint()?;
            partials.insert(name.clone(), compute_partial(&core.facets, &docs, request));
        }

        Ok(ShardOutcome {
            shard_id: self.id,
            hits,
            contributions: acc.contributions,
            match_all_boost: acc.match_all_boost,
            aggregations: partials,
            doc_count: core.store.count(),
            sum_lengths: core.store.sum_lengths(),
        })
    }

    pub fn doc_count(&self) -> u64 {
        self.core.read().store.count()
    }

    /// All documents with their ingest sequence, ascending by sequence.
    pub fn documents(&self) -> Vec<(Document, u64)> {
        let core = self.core.read();
        let mut docs: Vec<(Document, u64)> = core
            .store
            .iter()
            .map(|(_, stored)| (stored.doc.clone(), stored.seq))
            .collect();
        docs.sort_by_key(|(_, seq)| *seq);
        docs
    }

    /// The earliest-ingested document, the deterministic rebalance pick.
    pub fn oldest_document(&self) -> Option<(Document, u64)> {
        let core = self.core.read();
        core.store
            .iter()
            .min_by_key(|(_, stored)| stored.seq)
            .map(|(_, stored)| (stored.doc.clone(), stored.seq))
    }

    /// Serialise the shard's full state for a snapshot. The view is
    /// per-shard consistent: exactly the writes completed before this call.
    pub fn snapshot_state(&self) -> SnapshotShardState {
        let core = self.core.read();
        let documents = core
            .store
            .iter()
            .map(|(internal, stored)| SnapshotDoc {
                internal,
                doc: stored.doc.clone(),
                length: stored.length,
                seq: stored.seq,
            })
            .collect();
        let (facet_values, facet_paths) = core.facets.export();
        SnapshotShardState {
            documents,
            postings: core.inverted.export_postings(),
            facet_values,
            facet_paths,
            next_internal: core.next_internal,
        }
    }

    /// Rebuild a shard directly from snapshot state, no re-analysis.
    pub fn from_snapshot_state(id: usize, state: SnapshotShardState) -> Self {
        let mut core = ShardCore::new();
        core.inverted = InvertedIndex::from_postings(state.postings);
        core.facets = AggregationIndex::from_export(state.facet_values, state.facet_paths);
        core.next_internal = state.next_internal;
        for entry in state.documents {
            core.store
                .put(entry.internal, entry.doc, entry.length, entry.seq);
        }
        Shard {
            id,
            core: RwLock::new(core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::AnalysisOptions;
    use serde_json::json;

    fn caps() -> ShardCaps {
        ShardCaps {
            max_docs: 1000,
            max_terms: 100_000,
        }
    }

    fn setup() -> (Shard, Mappings, AnalyzerRegistry, TokenCache) {
        (
            Shard::new(0),
            Mappings::new(),
            AnalyzerRegistry::new(&AnalysisOptions::default()),
            TokenCache::new(64),
        )
    }

    fn put(
        shard: &Shard,
        mappings: &mut Mappings,
        analyzers: &AnalyzerRegistry,
        cache: &mut TokenCache,
        seq: u64,
        source: serde_json::Value,
    ) {
        let doc = Document::from_json(&source).unwrap();
        mappings.auto_map(&doc.fields).unwrap();
        shard
            .apply_put(doc, seq, mappings, analyzers, caps(), cache)
            .unwrap();
    }

    #[test]
    fn test_put_indexes_and_counts_length() {
        let (shard, mut mappings, analyzers, mut cache) = setup();
        put(
            &shard,
            &mut mappings,
            &analyzers,
            &mut cache,
            1,
            json!({"id": "a", "title": "hello brave world", "status": "Alive"}),
        );
        let core = shard.core();
        assert_eq!(core.store.count(), 1);
        // 3 title tokens + 1 keyword token
        assert_eq!(core.store.get(&DocumentId::from("a")).unwrap().length, 4);
        assert!(core.inverted.postings("title", "hello").is_some());
        assert!(core.inverted.postings("status", "Alive").is_some());
        assert_eq!(core.facets.field_counts("status")["Alive"], 1);
    }

    #[test]
    fn test_update_replaces_postings_atomically() {
        let (shard, mut mappings, analyzers, mut cache) = setup();
        put(&shard, &mut mappings, &analyzers, &mut cache, 1, json!({"id": "a", "title": "old words"}));
        put(&shard, &mut mappings, &analyzers, &mut cache, 2, json!({"id": "a", "title": "new words"}));
        let core = shard.core();
        assert_eq!(core.store.count(), 1);
        assert!(core.inverted.postings("title", "old").is_none());
        assert!(core.inverted.postings("title", "new").is_some());
    }

    #[test]
    fn test_delete_removes_everything() {
        let (shard, mut mappings, analyzers, mut cache) = setup();
        put(&shard, &mut mappings, &analyzers, &mut cache, 1, json!({"id": "a", "title": "hello", "genres": ["Action"]}));
        assert!(shard.apply_delete(&DocumentId::from("a")));
        assert!(!shard.apply_delete(&DocumentId::from("a")));
        let core = shard.core();
        assert_eq!(core.store.count(), 0);
        assert!(core.inverted.postings("title", "hello").is_none());
        assert!(core.facets.values("genres").is_none());
    }

    #[test]
    fn test_document_cap_is_enforced() {
        let (shard, mut mappings, analyzers, mut cache) = setup();
        let tight = ShardCaps {
            max_docs: 1,
            max_terms: 100,
        };
        let doc_a = Document::from_json(&json!({"id": "a", "title": "one"})).unwrap();
        mappings.auto_map(&doc_a.fields).unwrap();
        shard
            .apply_put(doc_a, 1, &mappings, &analyzers, tight, &mut cache)
            .unwrap();
        let doc_b = Document::from_json(&json!({"id": "b", "title": "two"})).unwrap();
        let err = shard
            .apply_put(doc_b, 2, &mappings, &analyzers, tight, &mut cache)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        // Updates to the existing document still go through.
        let doc_a2 = Document::from_json(&json!({"id": "a", "title": "three"})).unwrap();
        assert!(shard
            .apply_put(doc_a2, 3, &mappings, &analyzers, tight, &mut cache)
            .is_ok());
    }

    #[test]
    fn test_snapshot_state_round_trip() {
        let (shard, mut mappings, analyzers, mut cache) = setup();
        put(&shard, &mut mappings, &analyzers, &mut cache, 1, json!({"id": "a", "title": "hello world", "genres": ["Action"]}));
        put(&shard, &mut mappings, &analyzers, &mut cache, 2, json!({"id": "b", "title": "other doc"}));

        let restored = Shard::from_snapshot_state(0, shard.snapshot_state());
        let core = restored.core();
        assert_eq!(core.store.count(), 2);
        assert_eq!(core.inverted.postings("title", "hello").unwrap().doc_freq(), 1);
        assert_eq!(core.facets.field_counts("genres")["Action"], 1);
        assert_eq!(core.store.get(&DocumentId::from("a")).unwrap().seq, 1);
    }
}
