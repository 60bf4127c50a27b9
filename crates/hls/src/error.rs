use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("failed to parse playlist: {reason}")]
    Parse { reason: String },

    #[error("master playlist has no usable variant")]
    NoVariant,

    #[error("split index {index} out of bounds for playlist of {len} segments")]
    SplitOutOfBounds { index: usize, len: usize },
}
