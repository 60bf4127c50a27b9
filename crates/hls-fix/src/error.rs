use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge cancelled")]
    Cancelled,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("playlist error: {source}")]
    Playlist {
        #[from]
        source: hls::PlaylistError,
    },

    #[error("local playlist contains no segments")]
    EmptyPlaylist,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("muxer failed ({status}): {detail}")]
    MuxerFailed { status: String, detail: String },

    #[error("concatenation failed ({status}): {detail}")]
    ConcatFailed { status: String, detail: String },

    #[error("muxer reported segment `{name}` which is not in partition {partition}")]
    UnknownSegment { name: String, partition: usize },

    #[error("partition {partition} still reported a discontinuity with diagnostics suppressed")]
    UnexpectedDiscontinuity { partition: usize },
}

impl MergeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
