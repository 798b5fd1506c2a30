use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::Result;
use crate::index::posting::PostingList;
use crate::index::prefix::PrefixIndex;

/// Term representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term(String);

impl Term {
    pub fn new(text: impl Into<String>) -> Self {
        Term(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-field term map with a lazily rebuilt prefix FST.
struct FieldIndex {
    postings: HashMap<Term, PostingList>,
    prefix: Mutex<Option<Arc<PrefixIndex>>>,
}

impl FieldIndex {
    fn new() -> Self {
        FieldIndex {
            postings: HashMap::new(),
            prefix: Mutex::new(None),
        }
    }

    fn invalidate_prefix(&self) {
        *self.prefix.lock() = None;
    }

    fn prefix_index(&self) -> Result<Arc<PrefixIndex>> {
        let mut guard = self.prefix.lock();
        if let Some(index) = guard.as_ref() {
            return Ok(index.clone());
        }
        let built = Arc::new(PrefixIndex::build(
            self.postings
                .iter()
                .map(|(term, list)| (term.as_str().to_string(), list.doc_freq())),
        )?);
        *guard = Some(built.clone());
        Ok(built)
    }
}

/// Per-shard inverted index: (field, term) → posting list.
///
/// Exclusive to its shard worker for writes; queries read it under the
/// shard's read lock for the duration of one query.
pub struct InvertedIndex {
    fields: HashMap<String, FieldIndex>,
    /// Reverse registry used to remove a document's postings atomically.
    doc_terms: HashMap<u32, Vec<(String, Term)>>,
    total_tokens: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex {
            fields: HashMap::new(),
            doc_terms: HashMap::new(),
            total_tokens: 0,
        }
    }

    pub fn add_token(&mut self, field: &str, term: &str, doc: u32, position: u32) {
        let field_index = self
            .fields
            .entry(field.to_string())
            .or_insert_with(FieldIndex::new);
        let term = Term::new(term);
        let newly = field_index
            .postings
            .entry(term.clone())
            .or_default()
            .add(doc, position);
        field_index.invalidate_prefix();
        if newly {
            self.doc_terms
                .entry(doc)
                .or_default()
                .push((field.to_string(), term));
        }
        self.total_tokens += 1;
    }

    /// Remove every posting referencing `doc`. Total: after this returns no
    /// (field, term) pair references the document.
    pub fn remove_document(&mut self, doc: u32) {
        let Some(refs) = self.doc_terms.remove(&doc) else {
            return;
        };
        for (field, term) in refs {
            let Some(field_index) = self.fields.get_mut(&field) else {
                continue;
            };
            if let Some(list) = field_index.postings.get_mut(&term) {
                if let Some(posting) = list.remove(doc) {
                    self.total_tokens = self.total_tokens.saturating_sub(posting.term_freq as u64);
                }
                if list.is_empty() {
                    field_index.postings.remove(&term);
                }
            }
            field_index.invalidate_prefix();
            if field_index.postings.is_empty() {
                self.fields.remove(&field);
            }
        }
    }

    /// Posting list for a (field, term); unmapped fields yield nothing.
    pub fn postings(&self, field: &str, term: &str) -> Option<&PostingList> {
        self.fields
            .get(field)?
            .postings
            .get(&Term::new(term))
    }

    /// Iterate a field's terms; unordered.
    pub fn field_terms(&self, field: &str) -> impl Iterator<Item = (&Term, &PostingList)> {
        self.fields
            .get(field)
            .into_iter()
            .flat_map(|fi| fi.postings.iter())
    }

    /// Terms of `field` starting with `prefix`, via the field's FST.
    pub fn prefix_terms(&self, field: &str, prefix: &str) -> Result<Vec<String>> {
        match self.fields.get(field) {
            Some(field_index) => Ok(field_index.prefix_index()?.search_prefix(prefix)),
            None => Ok(Vec::new()),
        }
    }

    pub fn term_count(&self) -> usize {
        self.fields.values().map(|fi| fi.postings.len()).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn clear(&mut self, field: Option<&str>) {
        match field {
            Some(name) => {
                if let Some(field_index) = self.fields.remove(name) {
                    for list in field_index.postings.values() {
                        self.total_tokens = self.total_tokens.saturating_sub(list.total_freq());
                    }
                }
                for refs in self.doc_terms.values_mut() {
                    refs.retain(|(f, _)| f != name);
                }
            }
            None => {
                self.fields.clear();
                self.doc_terms.clear();
                self.total_tokens = 0;
            }
        }
    }

    /// Export every posting list, for snapshots.
    pub fn export_postings(&self) -> HashMap<String, HashMap<String, PostingList>> {
        self.fields
            .iter()
            .map(|(field, fi)| {
                let terms = fi
                    .postings
                    .iter()
                    .map(|(term, list)| (term.as_str().to_string(), list.clone()))
                    .collect();
                (field.clone(), terms)
            })
            .collect()
    }

    /// Rebuild from exported postings; the reverse registry and token totals
    /// are derived.
    pub fn from_postings(exported: HashMap<String, HashMap<String, PostingList>>) -> Self {
        let mut index = InvertedIndex::new();
        for (field, terms) in exported {
            let field_index = index
                .fields
                .entry(field.clone())
                .or_insert_with(FieldIndex::new);
            for (term_text, list) in terms {
                let term = Term::new(term_text);
                index.total_tokens += list.total_freq();
                for doc in list.doc_ids() {
                    index
                        .doc_terms
                        .entry(doc)
                        .or_default()
                        .push((field.clone(), term.clone()));
                }
                field_index.postings.insert(term, list);
            }
        }
        index
    }
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InvertedIndex {
        let mut index = InvertedIndex::new();
        index.add_token("title", "hello", 1, 0);
        index.add_token("title", "world", 1, 1);
        index.add_token("title", "hello", 2, 0);
        index.add_token("body", "hello", 1, 0);
        index
    }

    #[test]
    fn test_postings_lookup() {
        let index = sample();
        let list = index.postings("title", "hello").unwrap();
        assert_eq!(list.doc_freq(), 2);
        assert!(index.postings("title", "missing").is_none());
        // Unmapped field is not an error, just empty.
        assert!(index.postings("nope", "hello").is_none());
    }

    #[test]
    fn test_removal_is_total() {
        let mut index = sample();
        index.remove_document(1);
        assert_eq!(index.postings("title", "hello").unwrap().doc_freq(), 1);
        assert!(index.postings("title", "world").is_none());
        assert!(index.postings("body", "hello").is_none());
        assert_eq!(index.total_tokens(), 1);
    }

    #[test]
    fn test_prefix_terms_rebuild_after_write() {
        let mut index = sample();
        assert_eq!(index.prefix_terms("title", "hel").unwrap(), vec!["hello"]);
        index.add_token("title", "help", 3, 0);
        let mut terms = index.prefix_terms("title", "hel").unwrap();
        terms.sort();
        assert_eq!(terms, vec!["hello", "help"]);
    }

    #[test]
    fn test_export_round_trip() {
        let index = sample();
        let rebuilt = InvertedIndex::from_postings(index.export_postings());
        assert_eq!(rebuilt.total_tokens(), index.total_tokens());
        assert_eq!(
            rebuilt.postings("title", "hello").unwrap().doc_freq(),
            index.postings("title", "hello").unwrap().doc_freq()
        );
    }
}
