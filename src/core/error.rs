use crate::core::types::{DocumentId, IndexName};

/// Engine-wide error taxonomy.
///
/// Shard-local failures are carried as structured entries in batch reports
/// and degraded responses; only the conditions below cross the shard
/// boundary as errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("unknown index `{0}`")]
    UnknownIndex(IndexName),

    #[error("index `{0}` already exists")]
    IndexExists(IndexName),

    #[error("field `{field}` is mapped as {existing}, cannot remap as {requested}")]
    FieldConflict {
        field: String,
        existing: String,
        requested: String,
    },

    #[error("type mismatch on field `{field}`: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("field `{0}` is not facetable (text fields cannot be aggregated)")]
    InvalidAggregationField(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("document `{0}` not found")]
    DocumentNotFound(DocumentId),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("snapshot integrity check failed: {0}")]
    SnapshotIntegrity(String),

    #[error("unknown snapshot `{0}`")]
    UnknownSnapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for CLI hosts. `0` is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MalformedQuery(_) => 2,
            Error::UnknownIndex(_) => 3,
            Error::SnapshotIntegrity(_) | Error::UnknownSnapshot(_) => 4,
            Error::ResourceExhausted(_) => 5,
            _ => 1,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<fst::Error> for Error {
    fn from(err: fst::Error) -> Self {
        Error::Internal(format!("FST error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
