use thiserror::Error;

/// Errors returned by gallery operations.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("gallery: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("gallery: invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("gallery: identity {0} has no reference embeddings")]
    EmptyReferences(String),

    #[error("gallery: identity not found: {0}")]
    NotFound(String),

    #[error("gallery: {0}")]
    Io(#[from] std::io::Error),

    #[error("gallery: invalid snapshot format: {0}")]
    Format(String),
}

impl GalleryError {
    /// Reports whether the error is an embedding validation failure
    /// (dimension or normalization).
    pub fn is_invalid_embedding(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidEmbedding(_) | Self::EmptyReferences(_)
        )
    }
}
