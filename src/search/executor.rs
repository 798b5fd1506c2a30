use regex::Regex;
use roaring::RoaringBitmap;
use std::collections::{HashMap, HashSet};

use crate::analysis::analyzer::AnalyzerRegistry;
use crate::analysis::token::Token;
use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, format_number};
use crate::index::inverted::InvertedIndex;
use crate::index::posting::PostingList;
use crate::query::ast::{
    BoolQuery, GeoDistanceQuery, MatchOperator, MatchQuery, PhraseQuery, Query, RangeQuery,
    TermQuery, WildcardQuery,
};
use crate::query::parser::BoolOperator;
use crate::schema::field_type::FieldType;
use crate::schema::mappings::Mappings;
use crate::search::context::SearchContext;
use crate::search::fuzzy::FuzzyAutomaton;
use crate::search::geo::haversine_meters;
use crate::search::synonyms::SynonymEngine;
use crate::store::documents::DocumentStore;

/// Docs scanned between cancellation checkpoints on store scans.
const SCAN_CHECKPOINT: usize = 1024;

/// One term's match data, accumulated during execution for the scorer.
#[derive(Debug, Clone)]
pub struct TermContribution {
    pub field: String,
    pub term: String,
    pub boost: f32,
    /// Shard-local document frequency.
    pub doc_freq: u64,
    /// Shard-internal doc id → term frequency.
    pub term_freqs: HashMap<u32, u32>,
}

/// Scoring inputs gathered while evaluating one query on one shard.
#[derive(Debug, Default)]
pub struct ScoreAccumulator {
    pub contributions: Vec<TermContribution>,
    seen: HashSet<(String, String)>,
    pub match_all_boost: Option<f32>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        ScoreAccumulator::default()
    }

    fn add(&mut self, field: &str, term: &str, boost: f32, postings: &PostingList) {
        let key = (field.to_string(), term.to_string());
        if !self.seen.insert(key) {
            return;
        }
        self.contributions.push(TermContribution {
            field: field.to_string(),
            term: term.to_string(),
            boost,
            doc_freq: postings.doc_freq(),
            term_freqs: postings.iter().map(|(doc, p)| (doc, p.term_freq)).collect(),
        });
    }

    fn add_match_all(&mut self, boost: f32) {
        self.match_all_boost = Some(self.match_all_boost.map_or(boost, |b| b.max(boost)));
    }
}

/// Evaluates a query tree into a candidate set on one shard.
///
/// Borrows the shard's structures for the duration of one query; owns no
/// state of its own.
pub struct QueryExecutor<'a> {
    index: &'a InvertedIndex,
    store: &'a DocumentStore,
    mappings: &'a Mappings,
    analyzers: &'a AnalyzerRegistry,
    synonyms: &'a SynonymEngine,
    default_operator: BoolOperator,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(
        index: &'a InvertedIndex,
        store: &'a DocumentStore,
        mappings: &'a Mappings,
        analyzers: &'a AnalyzerRegistry,
        synonyms: &'a SynonymEngine,
        default_operator: BoolOperator,
    ) -> Self {
        QueryExecutor {
            index,
            store,
            mappings,
            analyzers,
            synonyms,
            default_operator,
        }
    }

    pub fn execute(
        &self,
        query: &Query,
        ctx: &SearchContext,
    ) -> Result<(RoaringBitmap, ScoreAccumulator)> {
        let mut acc = ScoreAccumulator::new();
        let docs = self.evaluate(query, ctx, &mut acc, true, 1.0)?;
        Ok((docs, acc))
    }

    fn evaluate(
        &self,
        query: &Query,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        ctx.checkpoint()?;
        match query {
            Query::MatchAll { boost: b } => {
                if scoring {
                    acc.add_match_all(b * boost);
                }
                Ok(self.store.all_docs())
            }
            Query::Term(q) => self.eval_term(q, ctx, acc, scoring, boost),
            Query::Match(q) => self.eval_match(q, ctx, acc, scoring, boost),
            Query::Prefix(q) => {
                self.eval_prefix(&q.field, &q.value, q.boost.unwrap_or(1.0) * boost, ctx, acc, scoring)
            }
            Query::Wildcard(q) => self.eval_wildcard(q, ctx, acc, scoring, boost),
            Query::Fuzzy(q) => {
                let term_query = TermQuery {
                    field: q.field.clone(),
                    value: q.value.clone(),
                    fuzziness: q.fuzziness.max(1),
                    boost: q.boost,
                };
                self.eval_term(&term_query, ctx, acc, scoring, boost)
            }
            Query::Range(q) => self.eval_range(q, ctx),
            Query::Phrase(q) => self.eval_phrase(q, ctx, acc, scoring, boost),
            Query::GeoDistance(q) => self.eval_geo(q, ctx),
            Query::Bool(q) => self.eval_bool(q, ctx, acc, scoring, boost),
        }
    }

    /// Fields a leaf targets; `*` fans out across text-like fields.
    fn resolve_fields(&self, field: &str) -> Vec<String> {
        if field == "*" {
            self.mappings.text_like_fields()
        } else {
            vec![field.to_string()]
        }
    }

    fn eval_term(
        &self,
        q: &TermQuery,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        let boost = q.boost.unwrap_or(1.0) * boost;
        let mut result = RoaringBitmap::new();
        for field in self.resolve_fields(&q.field) {
            let Some(term) = self.canonical_term(&field, &q.value) else {
                continue;
            };
            result |=
                self.single_term_docs(&field, &term, q.fuzziness, boost, ctx, acc, scoring)?;
        }
        Ok(result)
    }

    /// Expand one canonical term (synonyms, then edit distance) and union
    /// the matching posting lists.
    fn single_term_docs(
        &self,
        field: &str,
        term: &str,
        fuzziness: u8,
        boost: f32,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
    ) -> Result<RoaringBitmap> {
        let mut terms: Vec<String> = vec![term.to_string()];
        if !self.synonyms.is_empty() {
            for synonym in self.synonyms.expand(term) {
                if let Some(canonical) = self.canonical_term(field, &synonym) {
                    if !terms.contains(&canonical) {
                        terms.push(canonical);
                    }
                }
            }
        }

        let mut result = RoaringBitmap::new();
        for t in &terms {
            if fuzziness == 0 {
                if let Some(postings) = self.index.postings(field, t) {
                    result |= postings.doc_ids().collect::<RoaringBitmap>();
                    if scoring {
                        acc.add(field, t, boost, postings);
                    }
                }
            } else {
                let automaton = FuzzyAutomaton::new(t, fuzziness);
                for (candidate, postings) in self.index.field_terms(field) {
                    if automaton.matches(candidate.as_str()) {
                        result |= postings.doc_ids().collect::<RoaringBitmap>();
                        if scoring {
                            acc.add(field, candidate.as_str(), boost, postings);
                        }
                    }
                }
                // Term expansion is a cancellation boundary.
                ctx.checkpoint()?;
            }
        }
        Ok(result)
    }

    fn eval_match(
        &self,
        q: &MatchQuery,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        let boost = q.boost.unwrap_or(1.0) * boost;
        let operator = match q.operator {
            Some(MatchOperator::And) => BoolOperator::And,
            Some(MatchOperator::Or) => BoolOperator::Or,
            None => self.default_operator,
        };

        let mut result = RoaringBitmap::new();
        for field in self.resolve_fields(&q.field) {
            let tokens = self.query_tokens(&field, &q.value);
            if tokens.is_empty() {
                continue;
            }
            let mut field_result: Option<RoaringBitmap> = None;
            for token in &tokens {
                let docs = self.single_term_docs(
                    &field,
                    &token.text,
                    q.fuzziness,
                    boost,
                    ctx,
                    acc,
                    scoring,
                )?;
                field_result = Some(match (field_result, operator) {
                    (None, _) => docs,
                    (Some(prev), BoolOperator::And) => prev & docs,
                    (Some(prev), BoolOperator::Or) => prev | docs,
                });
            }
            if let Some(field_result) = field_result {
                result |= field_result;
            }
        }
        Ok(result)
    }

    fn eval_prefix(
        &self,
        field: &str,
        value: &str,
        boost: f32,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
    ) -> Result<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        for f in self.resolve_fields(field) {
            let Some(prefix) = self.canonical_term(&f, value) else {
                continue;
            };
            for term in self.index.prefix_terms(&f, &prefix)? {
                if let Some(postings) = self.index.postings(&f, &term) {
                    result |= postings.doc_ids().collect::<RoaringBitmap>();
                    if scoring {
                        acc.add(&f, &term, boost, postings);
                    }
                }
            }
            ctx.checkpoint()?;
        }
        Ok(result)
    }

    fn eval_wildcard(
        &self,
        q: &WildcardQuery,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        let boost = q.boost.unwrap_or(1.0) * boost;
        let mut result = RoaringBitmap::new();
        for field in self.resolve_fields(&q.field) {
            let pattern = if self.analyzer_lowercases(&field) {
                q.pattern.to_lowercase()
            } else {
                q.pattern.clone()
            };
            let regex = compile_wildcard(&pattern)?;
            for (term, postings) in self.index.field_terms(&field) {
                if regex.is_match(term.as_str()) {
                    result |= postings.doc_ids().collect::<RoaringBitmap>();
                    if scoring {
                        acc.add(&field, term.as_str(), boost, postings);
                    }
                }
            }
            ctx.checkpoint()?;
        }
        Ok(result)
    }

    fn eval_range(&self, q: &RangeQuery, ctx: &SearchContext) -> Result<RoaringBitmap> {
        let as_date = self.mappings.type_of(&q.field) == Some(FieldType::Date);
        let mut result = RoaringBitmap::new();
        for (scanned, (internal, stored)) in self.store.iter().enumerate() {
            if scanned % SCAN_CHECKPOINT == 0 {
                ctx.checkpoint()?;
            }
            let Some(value) = stored.doc.field(&q.field) else {
                continue;
            };
            if range_matches(value, q, as_date) {
                result.insert(internal);
            }
        }
        Ok(result)
    }

    fn eval_geo(&self, q: &GeoDistanceQuery, ctx: &SearchContext) -> Result<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        for (scanned, (internal, stored)) in self.store.iter().enumerate() {
            if scanned % SCAN_CHECKPOINT == 0 {
                ctx.checkpoint()?;
            }
            let Some((lat, lon)) = stored
                .doc
                .field(&q.field)
                .and_then(FieldValue::as_geo_point)
            else {
                continue;
            };
            if haversine_meters(q.lat, q.lon, lat, lon) <= q.distance_meters {
                result.insert(internal);
            }
        }
        Ok(result)
    }

    fn eval_phrase(
        &self,
        q: &PhraseQuery,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        let boost = q.boost.unwrap_or(1.0) * boost;
        let mut result = RoaringBitmap::new();
        for field in self.resolve_fields(&q.field) {
            let tokens = self.query_tokens(&field, &q.phrase);
            if tokens.is_empty() {
                continue;
            }

            // Per query token: doc → sorted positions, fuzzily expanded when
            // requested.
            let mut per_token: Vec<HashMap<u32, Vec<u32>>> = Vec::with_capacity(tokens.len());
            let mut missing = false;
            for token in &tokens {
                let mut positions: HashMap<u32, Vec<u32>> = HashMap::new();
                if q.fuzziness == 0 {
                    if let Some(postings) = self.index.postings(&field, &token.text) {
                        for (doc, posting) in postings.iter() {
                            positions.insert(doc, posting.positions.clone());
                        }
                        if scoring {
                            acc.add(&field, &token.text, boost, postings);
                        }
                    }
                } else {
                    let automaton = FuzzyAutomaton::new(&token.text, q.fuzziness);
                    for (candidate, postings) in self.index.field_terms(&field) {
                        if !automaton.matches(candidate.as_str()) {
                            continue;
                        }
                        for (doc, posting) in postings.iter() {
                            positions
                                .entry(doc)
                                .or_default()
                                .extend_from_slice(&posting.positions);
                        }
                        if scoring {
                            acc.add(&field, candidate.as_str(), boost, postings);
                        }
                    }
                    for list in positions.values_mut() {
                        list.sort_unstable();
                    }
                }
                ctx.checkpoint()?;
                if positions.is_empty() {
                    missing = true;
                    break;
                }
                per_token.push(positions);
            }
            if missing {
                continue;
            }

            // Candidates contain every token.
            let mut candidates: RoaringBitmap =
                per_token[0].keys().copied().collect();
            for positions in &per_token[1..] {
                candidates &= positions.keys().copied().collect::<RoaringBitmap>();
            }

            for doc in candidates {
                if phrase_matches(&per_token, &tokens, doc, q.slop, q.fuzziness) {
                    result.insert(doc);
                }
            }
        }
        Ok(result)
    }

    fn eval_bool(
        &self,
        q: &BoolQuery,
        ctx: &SearchContext,
        acc: &mut ScoreAccumulator,
        scoring: bool,
        boost: f32,
    ) -> Result<RoaringBitmap> {
        let boost = q.boost.unwrap_or(1.0) * boost;

        let mut result: Option<RoaringBitmap> = None;
        // Filter clauses constrain without scoring.
        for clause in &q.filter {
            let docs = self.evaluate(clause, ctx, acc, false, boost)?;
            result = Some(match result {
                Some(prev) => prev & docs,
                None => docs,
            });
        }
        for clause in &q.must {
            let docs = self.evaluate(clause, ctx, acc, scoring, boost)?;
            result = Some(match result {
                Some(prev) => prev & docs,
                None => docs,
            });
        }
        let has_must_or_filter = !q.must.is_empty() || !q.filter.is_empty();
        let mut result = result.unwrap_or_else(|| self.store.all_docs());

        if let Some(clauses) = &q.should {
            let mut should_set = RoaringBitmap::new();
            for clause in clauses {
                should_set |= self.evaluate(clause, ctx, acc, scoring, boost)?;
            }
            if has_must_or_filter {
                // With must/filter present, should gates the result only when
                // at least one match is required; otherwise it scores only.
                if q.minimum_should_match >= 1 {
                    result &= should_set;
                }
            } else {
                // An explicitly present empty should array matches nothing.
                result = should_set;
            }
        }

        for clause in &q.must_not {
            let excluded = self.evaluate(clause, ctx, acc, false, boost)?;
            result -= excluded;
        }
        Ok(result)
    }

    /// Canonical single term for a (field, raw value) pair, via the field's
    /// analyzer.
    fn canonical_term(&self, field: &str, raw: &str) -> Option<String> {
        match self.mappings.type_of(field) {
            Some(FieldType::Number(_)) => Some(
                raw.parse::<f64>()
                    .map(format_number)
                    .unwrap_or_else(|_| raw.to_string()),
            ),
            Some(FieldType::Boolean) => Some(raw.to_lowercase()),
            Some(FieldType::Date) => Some(canonical_date(raw)),
            Some(ft) => {
                let analyzer = self.analyzers.for_field_type(ft);
                analyzer.analyze(raw).into_iter().next().map(|t| t.text)
            }
            // Unmapped fields hold no postings; the keyword form keeps the
            // lookup harmless.
            None => Some(raw.to_string()),
        }
    }

    /// Analyzed tokens of a query value, for match and phrase leaves.
    fn query_tokens(&self, field: &str, raw: &str) -> Vec<Token> {
        match self.mappings.type_of(field) {
            Some(FieldType::Number(_)) | Some(FieldType::Boolean) | Some(FieldType::Date) => self
                .canonical_term(field, raw)
                .map(|t| vec![Token::new(t, 0)])
                .unwrap_or_default(),
            Some(ft) => self.analyzers.for_field_type(ft).analyze(raw),
            None => vec![Token::new(raw, 0)],
        }
    }

    fn analyzer_lowercases(&self, field: &str) -> bool {
        self.canonical_term(field, "A") == Some("a".to_string())
    }
}

/// Canonical index/query form of a date value.
pub fn canonical_date(raw: &str) -> String {
    crate::core::types::parse_date(raw)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| raw.to_string())
}

/// Compile a `*`/`?` pattern into an anchored regex.
fn compile_wildcard(pattern: &str) -> Result<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| Error::MalformedQuery(format!("invalid wildcard: {}", e)))
}

/// Positional walk: every token in order, each inter-token gap within
/// `slop` (widened by `fuzziness`).
fn phrase_matches(
    per_token: &[HashMap<u32, Vec<u32>>],
    tokens: &[Token],
    doc: u32,
    slop: u32,
    fuzziness: u8,
) -> bool {
    let first = match per_token[0].get(&doc) {
        Some(positions) => positions,
        None => return false,
    };
    'starts: for &start in first {
        let mut current = start;
        for (i, positions) in per_token.iter().enumerate().skip(1) {
            let Some(list) = positions.get(&doc) else {
                continue 'starts;
            };
            // Gap expected from the query's own token positions; stopword
            // removal can leave holes larger than one.
            let delta = tokens[i]
                .position
                .saturating_sub(tokens[i - 1].position)
                .max(1);
            let low = current + 1;
            let high = current + delta + slop + fuzziness as u32;
            match list.iter().find(|&&p| p >= low && p <= high) {
                Some(&next) => current = next,
                None => continue 'starts,
            }
        }
        return true;
    }
    false
}

/// Range predicate; cross-type comparisons fail silently.
fn range_matches(value: &FieldValue, q: &RangeQuery, as_date: bool) -> bool {
    if let FieldValue::Array(items) = value {
        return items.iter().any(|item| range_matches(item, q, as_date));
    }
    let cmp = |bound: &FieldValue| compare_values(value, bound, as_date);
    if let Some(b) = &q.gte {
        match cmp(b) {
            Some(ord) if ord != std::cmp::Ordering::Less => {}
            _ => return false,
        }
    }
    if let Some(b) = &q.gt {
        match cmp(b) {
            Some(std::cmp::Ordering::Greater) => {}
            _ => return false,
        }
    }
    if let Some(b) = &q.lte {
        match cmp(b) {
            Some(ord) if ord != std::cmp::Ordering::Greater => {}
            _ => return false,
        }
    }
    if let Some(b) = &q.lt {
        match cmp(b) {
            Some(std::cmp::Ordering::Less) => {}
            _ => return false,
        }
    }
    true
}

fn compare_values(
    value: &FieldValue,
    bound: &FieldValue,
    as_date: bool,
) -> Option<std::cmp::Ordering> {
    if as_date {
        let v = value.as_date()?;
        let b = bound.as_date()?;
        return Some(v.cmp(&b));
    }
    match (value, bound) {
        (FieldValue::Number(v), FieldValue::Number(b)) => v.partial_cmp(b),
        (FieldValue::Text(v), FieldValue::Text(b)) => Some(v.as_str().cmp(b.as_str())),
        (FieldValue::Boolean(v), FieldValue::Boolean(b)) => Some(v.cmp(b)),
        _ => None,
    }
}
