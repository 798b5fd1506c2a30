use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::types::{Document, DocumentId};

/// A stored document plus the indexing metadata that rides with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc: Document,
    /// Total token count across analyzed fields, for BM25 length
    /// normalisation.
    pub length: u32,
    /// Global ingest sequence; the ranking tie-break (ascending).
    pub seq: u64,
}

/// Per-shard document store: id maps plus the running aggregates BM25 needs.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<u32, StoredDocument>,
    id_map: HashMap<DocumentId, u32>,
    sum_lengths: u64,
}

impl DocumentStore {
    pub fn new() -> Self {
        DocumentStore::default()
    }

    pub fn put(&mut self, internal: u32, doc: Document, length: u32, seq: u64) {
        if let Some(previous) = self.docs.insert(
            internal,
            StoredDocument {
                doc,
                length,
                seq,
            },
        ) {
            self.sum_lengths = self.sum_lengths.saturating_sub(previous.length as u64);
            self.id_map.remove(&previous.doc.id);
        }
        let stored = &self.docs[&internal];
        self.id_map.insert(stored.doc.id.clone(), internal);
        self.sum_lengths += length as u64;
    }

    pub fn get(&self, id: &DocumentId) -> Option<&StoredDocument> {
        let internal = self.id_map.get(id)?;
        self.docs.get(internal)
    }

    pub fn get_internal(&self, internal: u32) -> Option<&StoredDocument> {
        self.docs.get(&internal)
    }

    pub fn internal_id(&self, id: &DocumentId) -> Option<u32> {
        self.id_map.get(id).copied()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.id_map.contains_key(id)
    }

    /// Remove a document; returns its internal id when present.
    pub fn delete(&mut self, id: &DocumentId) -> Option<u32> {
        let internal = self.id_map.remove(id)?;
        if let Some(stored) = self.docs.remove(&internal) {
            self.sum_lengths = self.sum_lengths.saturating_sub(stored.length as u64);
        }
        Some(internal)
    }

    pub fn length(&self, internal: u32) -> u32 {
        self.docs.get(&internal).map(|d| d.length).unwrap_or(0)
    }

    pub fn count(&self) -> u64 {
        self.docs.len() as u64
    }

    pub fn sum_lengths(&self) -> u64 {
        self.sum_lengths
    }

    pub fn avg_length(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.sum_lengths as f32 / self.docs.len() as f32
        }
    }

    /// Bitmap of all live internal ids; the query universe for this shard.
    pub fn all_docs(&self) -> RoaringBitmap {
        self.docs.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &StoredDocument)> {
        self.docs.iter().map(|(internal, stored)| (*internal, stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldValue;

    fn doc(id: &str) -> Document {
        let mut d = Document::new(DocumentId::from(id));
        d.add_field("title", FieldValue::Text("x".to_string()));
        d
    }

    #[test]
    fn test_put_get_delete() {
        let mut store = DocumentStore::new();
        store.put(0, doc("a"), 3, 1);
        store.put(1, doc("b"), 5, 2);
        assert_eq!(store.count(), 2);
        assert_eq!(store.sum_lengths(), 8);
        assert_eq!(store.avg_length(), 4.0);
        assert_eq!(store.get(&DocumentId::from("a")).unwrap().seq, 1);

        assert_eq!(store.delete(&DocumentId::from("a")), Some(0));
        assert_eq!(store.delete(&DocumentId::from("a")), None);
        assert_eq!(store.count(), 1);
        assert_eq!(store.sum_lengths(), 5);
    }

    #[test]
    fn test_reput_replaces_previous_entry() {
        let mut store = DocumentStore::new();
        store.put(0, doc("a"), 3, 1);
        store.put(0, doc("a"), 7, 4);
        assert_eq!(store.count(), 1);
        assert_eq!(store.sum_lengths(), 7);
        assert_eq!(store.get(&DocumentId::from("a")).unwrap().seq, 4);
    }

    #[test]
    fn test_all_docs_bitmap() {
        let mut store = DocumentStore::new();
        store.put(3, doc("a"), 1, 1);
        store.put(9, doc("b"), 1, 2);
        let bitmap = store.all_docs();
        assert!(bitmap.contains(3) && bitmap.contains(9));
        assert_eq!(bitmap.len(), 2);
    }
}
