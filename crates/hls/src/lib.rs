// HLS (HTTP Live Streaming) playlist handling
pub mod error;
pub mod playlist;
pub mod variant;

// Export common types for ease of use
pub use error::PlaylistError;
pub use playlist::{ParsedPlaylist, Playlist, Segment};
pub use variant::{VariantScore, select_variant};
