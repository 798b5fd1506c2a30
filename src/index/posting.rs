use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-document record of one term's occurrences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub term_freq: u32,
    /// Token positions, strictly ascending.
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn add_position(&mut self, position: u32) {
        // Positions arrive in stream order; keep the invariant if they don't.
        match self.positions.last() {
            Some(&last) if position <= last => {
                if let Err(idx) = self.positions.binary_search(&position) {
                    self.positions.insert(idx, position);
                    self.term_freq += 1;
                }
            }
            _ => {
                self.positions.push(position);
                self.term_freq += 1;
            }
        }
    }
}

/// Posting list for one (field, term), keyed by shard-internal doc id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingList {
    postings: BTreeMap<u32, Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList::default()
    }

    /// Returns true when this is the document's first posting for the term.
    pub fn add(&mut self, doc: u32, position: u32) -> bool {
        let newly = !self.postings.contains_key(&doc);
        self.postings.entry(doc).or_default().add_position(position);
        newly
    }

    pub fn remove(&mut self, doc: u32) -> Option<Posting> {
        self.postings.remove(&doc)
    }

    pub fn get(&self, doc: u32) -> Option<&Posting> {
        self.postings.get(&doc)
    }

    pub fn contains(&self, doc: u32) -> bool {
        self.postings.contains_key(&doc)
    }

    /// Number of documents containing this term.
    pub fn doc_freq(&self) -> u64 {
        self.postings.len() as u64
    }

    /// Total occurrences across all documents.
    pub fn total_freq(&self) -> u64 {
        self.postings.values().map(|p| p.term_freq as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.postings.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Posting)> {
        self.postings.iter().map(|(doc, posting)| (*doc, posting))
    }
}
