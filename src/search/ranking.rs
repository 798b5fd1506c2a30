use crate::core::types::DocumentId;

/// Hard cap on page size.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// A scored document heading into the ranking pipeline.
#[derive(Debug, Clone)]
pub struct RankedDoc {
    pub shard_id: usize,
    pub internal: u32,
    pub id: DocumentId,
    pub score: f32,
    /// Global ingest sequence; the tie-break.
    pub seq: u64,
    pub version: u64,
}

/// Orders hits deterministically and applies pagination.
///
/// Higher score first; equal scores break by ingest order ascending, which
/// is shard-count invariant because the sequence is assigned globally.
pub struct RankingPipeline {
    from: usize,
    size: usize,
}

impl RankingPipeline {
    pub fn new(from: usize, size: usize) -> Self {
        RankingPipeline {
            from,
            size: size.min(MAX_PAGE_SIZE),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn rank(&self, mut docs: Vec<RankedDoc>) -> (u64, Vec<RankedDoc>) {
        docs.sort_unstable_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        let total = docs.len() as u64;
        let page = docs
            .into_iter()
            .skip(self.from)
            .take(self.size)
            .collect();
        (total, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, score: f32, seq: u64) -> RankedDoc {
        RankedDoc {
            shard_id: 0,
            internal: 0,
            id: DocumentId::from(id),
            score,
            seq,
            version: 1,
        }
    }

    #[test]
    fn test_orders_by_score_then_ingest_order() {
        let (total, page) = RankingPipeline::new(0, 10).rank(vec![
            doc("late", 2.0, 9),
            doc("top", 5.0, 3),
            doc("early", 2.0, 1),
        ]);
        assert_eq!(total, 3);
        let ids: Vec<&str> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "early", "late"]);
    }

    #[test]
    fn test_pagination_window() {
        let docs: Vec<RankedDoc> = (0..10)
            .map(|i| doc(&format!("d{}", i), 10.0 - i as f32, i as u64))
            .collect();
        let (total, page) = RankingPipeline::new(4, 3).rank(docs);
        assert_eq!(total, 10);
        let ids: Vec<&str> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d4", "d5", "d6"]);
    }

    #[test]
    fn test_size_is_capped() {
        assert_eq!(RankingPipeline::new(0, usize::MAX).size(), MAX_PAGE_SIZE);
    }
}
