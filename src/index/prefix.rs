use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use crate::core::error::Result;

/// FST over a field's term set, used for prefix expansion.
///
/// Rebuilt lazily after writes invalidate it; the doc frequency rides along
/// as the FST value so callers can rank expansions without a postings probe.
pub struct PrefixIndex {
    fst: Map<Vec<u8>>,
}

impl PrefixIndex {
    pub fn build<I>(terms: I) -> Result<Self>
    where
        I: Iterator<Item = (String, u64)>,
    {
        let mut sorted: Vec<(String, u64)> = terms.collect();
        // FST construction requires sorted input.
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut builder = MapBuilder::memory();
        for (term, doc_freq) in sorted {
            builder.insert(term.as_bytes(), doc_freq)?;
        }
        Ok(PrefixIndex {
            fst: builder.into_map(),
        })
    }

    /// All terms starting with `prefix`, in lexicographic order.
    pub fn search_prefix(&self, prefix: &str) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let prefix_bytes = prefix.as_bytes();
        let mut results = Vec::new();
        let mut stream = self.fst.range().ge(prefix_bytes).into_stream();
        while let Some((term_bytes, _doc_freq)) = stream.next() {
            if !term_bytes.starts_with(prefix_bytes) {
                break;
            }
            if let Ok(term) = String::from_utf8(term_bytes.to_vec()) {
                results.push(term);
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_expansion() {
        let terms = ["program", "progress", "project", "quest"]
            .into_iter()
            .map(|t| (t.to_string(), 1u64));
        let index = PrefixIndex::build(terms).unwrap();
        assert_eq!(index.search_prefix("prog"), vec!["program", "progress"]);
        assert_eq!(index.search_prefix("pro").len(), 3);
        assert!(index.search_prefix("z").is_empty());
        assert!(index.search_prefix("").is_empty());
    }
}
