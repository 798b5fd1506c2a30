/// Collection-level statistics needed to score one document.
#[derive(Debug, Clone)]
pub struct DocStats {
    /// Token count of the document being scored.
    pub doc_length: u32,
    /// Average document length across the collection.
    pub avg_doc_length: f32,
    /// Total documents in the collection.
    pub total_docs: u64,
}

/// Per-term statistics.
#[derive(Debug, Clone)]
pub struct TermStats {
    /// Number of documents containing the term.
    pub doc_freq: u64,
}

/// Scorer trait; scoring happens after shard results merge so the
/// statistics are collection-global.
pub trait Scorer: Send + Sync {
    fn score(&self, term_freq: u32, term: &TermStats, doc: &DocStats) -> f32;

    fn name(&self) -> &str;
}

/// Okapi BM25.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    /// Term frequency saturation.
    pub k1: f32,
    /// Length normalisation strength.
    pub b: f32,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Scorer {
    /// idf(t) = ln(1 + (N − n(t) + 0.5) / (n(t) + 0.5))
    pub fn idf(&self, term: &TermStats, total_docs: u64) -> f32 {
        let n = total_docs as f32;
        let df = term.doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

impl Scorer for Bm25Scorer {
    fn score(&self, term_freq: u32, term: &TermStats, doc: &DocStats) -> f32 {
        if term_freq == 0 || doc.total_docs == 0 {
            return 0.0;
        }
        let tf = term_freq as f32;
        let doc_len = doc.doc_length as f32;
        let avg_len = if doc.avg_doc_length > 0.0 {
            doc.avg_doc_length
        } else {
            1.0
        };

        let idf = self.idf(term, doc.total_docs);
        let numerator = tf * (self.k1 + 1.0);
        let denominator = tf + self.k1 * (1.0 - self.b + self.b * (doc_len / avg_len));
        idf * numerator / denominator
    }

    fn name(&self) -> &str {
        "bm25"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(doc_length: u32) -> DocStats {
        DocStats {
            doc_length,
            avg_doc_length: 10.0,
            total_docs: 100,
        }
    }

    #[test]
    fn test_rarer_terms_score_higher() {
        let scorer = Bm25Scorer::default();
        let rare = scorer.score(1, &TermStats { doc_freq: 1 }, &stats(10));
        let common = scorer.score(1, &TermStats { doc_freq: 90 }, &stats(10));
        assert!(rare > common);
        assert!(common > 0.0);
    }

    #[test]
    fn test_term_frequency_saturates() {
        let scorer = Bm25Scorer::default();
        let term = TermStats { doc_freq: 5 };
        let once = scorer.score(1, &term, &stats(10));
        let five = scorer.score(5, &term, &stats(10));
        let fifty = scorer.score(50, &term, &stats(10));
        assert!(five > once);
        // Gains flatten as tf grows.
        assert!(fifty - five < five - once);
    }

    #[test]
    fn test_longer_docs_are_penalised() {
        let scorer = Bm25Scorer::default();
        let term = TermStats { doc_freq: 5 };
        let short = scorer.score(2, &term, &stats(5));
        let long = scorer.score(2, &term, &stats(50));
        assert!(short > long);
    }

    #[test]
    fn test_empty_collection_scores_zero() {
        let scorer = Bm25Scorer::default();
        let score = scorer.score(
            1,
            &TermStats { doc_freq: 0 },
            &DocStats {
                doc_length: 0,
                avg_doc_length: 0.0,
                total_docs: 0,
            },
        );
        assert_eq!(score, 0.0);
    }
}
