use serde::{Deserialize, Serialize};

use crate::core::types::FieldValue;

/// Query tree: one variant per leaf kind plus boolean composition.
///
/// The parser normalises both `{field, value}` and `{<field>: value}` surface
/// forms into these shapes; the executor pattern-matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    MatchAll { boost: f32 },
    Term(TermQuery),
    Match(MatchQuery),
    Prefix(PrefixQuery),
    Wildcard(WildcardQuery),
    Fuzzy(FuzzyQuery),
    Range(RangeQuery),
    Phrase(PhraseQuery),
    GeoDistance(GeoDistanceQuery),
    Bool(BoolQuery),
}

/// Exact term against one field (`*` fans out over text-like fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    pub field: String,
    pub value: String,
    pub fuzziness: u8,
    pub boost: Option<f32>,
}

/// Analyzed multi-token match; tokens combine with the index's default
/// operator unless one is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchQuery {
    pub field: String,
    pub value: String,
    pub fuzziness: u8,
    pub operator: Option<MatchOperator>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixQuery {
    pub field: String,
    pub value: String,
    pub boost: Option<f32>,
}

/// Pattern with `*` and `?`, anchored at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildcardQuery {
    pub field: String,
    pub pattern: String,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyQuery {
    pub field: String,
    pub value: String,
    /// Max edit distance, 1 or 2.
    pub fuzziness: u8,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub field: String,
    pub gt: Option<FieldValue>,
    pub gte: Option<FieldValue>,
    pub lt: Option<FieldValue>,
    pub lte: Option<FieldValue>,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseQuery {
    pub field: String,
    /// Raw phrase; analyzed with the field's analyzer at execution time.
    pub phrase: String,
    /// Max extra gap allowed between consecutive tokens.
    pub slop: u32,
    pub fuzziness: u8,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoDistanceQuery {
    pub field: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_meters: f64,
}

/// Boolean composition with Elasticsearch-style clause semantics.
///
/// `should` is an `Option` because an explicitly present empty array matches
/// nothing, while an absent clause simply contributes nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Option<Vec<Query>>,
    pub must_not: Vec<Query>,
    pub filter: Vec<Query>,
    pub minimum_should_match: u32,
    pub boost: Option<f32>,
}

impl BoolQuery {
    pub fn new() -> Self {
        BoolQuery::default()
    }

    pub fn with_must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn with_should(mut self, query: Query) -> Self {
        self.should.get_or_insert_with(Vec::new).push(query);
        self
    }

    pub fn with_must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn with_filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }
}
