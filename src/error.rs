use thiserror::Error;

/// Result type alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Unrecovered failures of the merge engine.
///
/// Any of these aborts a whole `build_graph` call; a partially merged graph is
/// never returned.
#[derive(Error, Debug)]
pub enum MergeError {
    /// A record reached the matcher without its embedding vectors.
    #[error("Malformed input: {kind} '{name}' has no embeddings")]
    MissingEmbedding { kind: &'static str, name: String },

    /// Two embeddings of different length were compared.
    #[error("Malformed input: embedding dimensions differ ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },

    /// A relationship endpoint names no entity of the graph.
    #[error("Dangling reference: relationship {relationship} points at missing entity '{entity}'")]
    DanglingReference { relationship: String, entity: String },

    /// The external extractor failed on a batch.
    #[error("Extraction failed for batch {batch}: {source}")]
    Extraction {
        batch: usize,
        #[source]
        source: ExtractionError,
    },
}

/// Failures reported by an [`Extractor`](crate::builder::Extractor).
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// A relationship endpoint matches none of the batch's entities.
    #[error("relationship '{relationship}' refers to unknown entity '{endpoint}'")]
    UnknownEndpoint {
        relationship: String,
        endpoint: String,
    },

    /// The extractor gave up after exhausting its retries.
    #[error("{message} (gave up after {attempts} attempts)")]
    Failed { message: String, attempts: usize },
}
