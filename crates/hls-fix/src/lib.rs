//! HLS to MP4 remuxing that survives timestamp discontinuities
//!
//! This crate drives an external muxer over a local HLS playlist. When the
//! muxer reports a timestamp discontinuity, the playlist is split at the
//! offending segment, each partition is muxed on its own, and the partial
//! artifacts are concatenated into the final file.
//!
//! ## Component Overview
//!
//! - `muxer`: the [`Muxer`] capability used by the merge loop
//! - `ffmpeg`: [`FfmpegMuxer`], the production muxer
//! - `diagnostics`: classification of muxer diagnostic lines
//! - `merger`: [`IncrementalMerger`], the split-and-retry state machine

pub mod concat;
pub mod diagnostics;
pub mod error;
pub mod ffmpeg;
pub mod merger;
pub mod muxer;

pub use concat::{ConcatMethod, UnknownConcatMethod};
pub use diagnostics::DiagnosticLine;
pub use error::MergeError;
pub use ffmpeg::FfmpegMuxer;
pub use merger::{IncrementalMerger, MergeReport};
pub use muxer::{MuxOutcome, Muxer};
