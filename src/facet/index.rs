use roaring::RoaringBitmap;
use std::collections::HashMap;

/// Per-shard facet index: field → value → document set.
///
/// The reverse maps keep removal O(values-of-doc). Invariant: this index
/// agrees with the document store after every ingest and delete.
#[derive(Debug, Default)]
pub struct AggregationIndex {
    values: HashMap<String, HashMap<String, RoaringBitmap>>,
    doc_values: HashMap<u32, Vec<(String, String)>>,
    /// Dotted-path presence, for nested aggregations.
    paths: HashMap<String, RoaringBitmap>,
    doc_paths: HashMap<u32, Vec<String>>,
}

impl AggregationIndex {
    pub fn new() -> Self {
        AggregationIndex::default()
    }

    pub fn add_value(&mut self, field: &str, value: &str, doc: u32) {
        let bitmap = self
            .values
            .entry(field.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default();
        if !bitmap.contains(doc) {
            bitmap.insert(doc);
            self.doc_values
                .entry(doc)
                .or_default()
                .push((field.to_string(), value.to_string()));
        }
    }

    /// Record that `doc` has `path` present (including object prefixes).
    pub fn mark_path(&mut self, path: &str, doc: u32) {
        let mut prefix = String::new();
        for part in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            let bitmap = self.paths.entry(prefix.clone()).or_default();
            if !bitmap.contains(doc) {
                bitmap.insert(doc);
                self.doc_paths.entry(doc).or_default().push(prefix.clone());
            }
        }
    }

    pub fn remove_document(&mut self, doc: u32) {
        if let Some(entries) = self.doc_values.remove(&doc) {
            for (field, value) in entries {
                if let Some(field_values) = self.values.get_mut(&field) {
                    if let Some(bitmap) = field_values.get_mut(&value) {
                        bitmap.remove(doc);
                        if bitmap.is_empty() {
                            field_values.remove(&value);
                        }
                    }
                    if field_values.is_empty() {
                        self.values.remove(&field);
                    }
                }
            }
        }
        if let Some(paths) = self.doc_paths.remove(&doc) {
            for path in paths {
                if let Some(bitmap) = self.paths.get_mut(&path) {
                    bitmap.remove(doc);
                    if bitmap.is_empty() {
                        self.paths.remove(&path);
                    }
                }
            }
        }
    }

    pub fn values(&self, field: &str) -> Option<&HashMap<String, RoaringBitmap>> {
        self.values.get(field)
    }

    pub fn path_docs(&self, path: &str) -> Option<&RoaringBitmap> {
        self.paths.get(path)
    }

    /// Full value → document-count view of one field.
    pub fn field_counts(&self, field: &str) -> HashMap<String, u64> {
        self.values
            .get(field)
            .map(|values| {
                values
                    .iter()
                    .map(|(value, bitmap)| (value.clone(), bitmap.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Export bitmaps as plain id lists, for snapshots.
    pub fn export(&self) -> (HashMap<String, HashMap<String, Vec<u32>>>, HashMap<String, Vec<u32>>) {
        let values = self
            .values
            .iter()
            .map(|(field, by_value)| {
                let by_value = by_value
                    .iter()
                    .map(|(value, bitmap)| (value.clone(), bitmap.iter().collect()))
                    .collect();
                (field.clone(), by_value)
            })
            .collect();
        let paths = self
            .paths
            .iter()
            .map(|(path, bitmap)| (path.clone(), bitmap.iter().collect()))
            .collect();
        (values, paths)
    }

    pub fn from_export(
        values: HashMap<String, HashMap<String, Vec<u32>>>,
        paths: HashMap<String, Vec<u32>>,
    ) -> Self {
        let mut index = AggregationIndex::new();
        for (field, by_value) in values {
            for (value, docs) in by_value {
                for doc in docs {
                    index.add_value(&field, &value, doc);
                }
            }
        }
        for (path, docs) in paths {
            for doc in docs {
                index.mark_path(&path, doc);
            }
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_count() {
        let mut index = AggregationIndex::new();
        index.add_value("genres", "Action", 1);
        index.add_value("genres", "Action", 2);
        index.add_value("genres", "Drama", 2);
        let counts = index.field_counts("genres");
        assert_eq!(counts["Action"], 2);
        assert_eq!(counts["Drama"], 1);
    }

    #[test]
    fn test_duplicate_values_counted_once() {
        let mut index = AggregationIndex::new();
        index.add_value("tags", "x", 1);
        index.add_value("tags", "x", 1);
        assert_eq!(index.field_counts("tags")["x"], 1);
    }

    #[test]
    fn test_remove_document_is_consistent() {
        let mut index = AggregationIndex::new();
        index.add_value("genres", "Action", 1);
        index.add_value("genres", "Drama", 1);
        index.mark_path("user.name", 1);
        index.remove_document(1);
        assert!(index.values("genres").is_none());
        assert!(index.path_docs("user").is_none());
    }

    #[test]
    fn test_path_prefixes_marked() {
        let mut index = AggregationIndex::new();
        index.mark_path("user.address.city", 3);
        assert!(index.path_docs("user").unwrap().contains(3));
        assert!(index.path_docs("user.address").unwrap().contains(3));
        assert!(index.path_docs("user.address.city").unwrap().contains(3));
    }

    #[test]
    fn test_export_round_trip() {
        let mut index = AggregationIndex::new();
        index.add_value("genres", "Action", 1);
        index.mark_path("genres", 1);
        let (values, paths) = index.export();
        let rebuilt = AggregationIndex::from_export(values, paths);
        assert_eq!(rebuilt.field_counts("genres")["Action"], 1);
        assert!(rebuilt.path_docs("genres").unwrap().contains(1));
    }
}
