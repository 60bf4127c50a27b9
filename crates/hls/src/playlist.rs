use std::fmt::Write as _;

use m3u8_rs::{MasterPlaylist, MediaPlaylist};
use tracing::debug;

use crate::error::PlaylistError;

/// One media segment: where to fetch it and how long it plays.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f32,
}

impl Segment {
    pub fn new(uri: impl Into<String>, duration: f32) -> Self {
        Self {
            uri: uri.into(),
            duration,
        }
    }
}

/// Ordered segment list plus the target-duration hint.
///
/// Only the minimal subset of the playlist format is modelled. Tags other
/// than the target duration and per-segment `#EXTINF` are dropped on parse
/// and never written back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playlist {
    pub target_duration: u64,
    pub segments: Vec<Segment>,
}

/// Result of parsing playlist text of unknown kind.
#[derive(Debug)]
pub enum ParsedPlaylist {
    Media(Playlist),
    Master(MasterPlaylist),
}

impl Playlist {
    pub fn new(target_duration: u64, segments: Vec<Segment>) -> Self {
        Self {
            target_duration,
            segments,
        }
    }

    /// Parse playlist text, which may be either a master or a media playlist.
    pub fn parse(input: &[u8]) -> Result<ParsedPlaylist, PlaylistError> {
        match m3u8_rs::parse_playlist_res(input) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => Ok(ParsedPlaylist::Media(media.into())),
            Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                debug!(variants = master.variants.len(), "Parsed master playlist");
                Ok(ParsedPlaylist::Master(master))
            }
            Err(e) => Err(PlaylistError::Parse {
                reason: e.to_string(),
            }),
        }
    }

    /// Parse text that must be a media playlist.
    pub fn parse_media(input: &[u8]) -> Result<Self, PlaylistError> {
        match Self::parse(input)? {
            ParsedPlaylist::Media(playlist) => Ok(playlist),
            ParsedPlaylist::Master(_) => Err(PlaylistError::Parse {
                reason: "expected a media playlist, found a master playlist".to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| f64::from(s.duration)).sum()
    }

    /// Index of the first segment whose URI equals `uri`.
    pub fn position_of(&self, uri: &str) -> Option<usize> {
        self.segments.iter().position(|s| s.uri == uri)
    }

    /// Split into `[0, index)` and `[index, len)`. Both halves keep the
    /// target duration of the original.
    pub fn split_at(&self, index: usize) -> Result<(Playlist, Playlist), PlaylistError> {
        if index > self.segments.len() {
            return Err(PlaylistError::SplitOutOfBounds {
                index,
                len: self.segments.len(),
            });
        }
        let (head, tail) = self.segments.split_at(index);
        Ok((
            Playlist::new(self.target_duration, head.to_vec()),
            Playlist::new(self.target_duration, tail.to_vec()),
        ))
    }

    /// Serialize to the minimal on-disk format.
    pub fn to_m3u8(&self) -> String {
        let mut out = String::with_capacity(64 + self.segments.len() * 32);
        out.push_str("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{},", segment.duration);
            out.push_str(&segment.uri);
            out.push('\n');
        }
        out.push_str("#EXT-X-ENDLIST\n");
        out
    }
}

impl From<MediaPlaylist> for Playlist {
    fn from(media: MediaPlaylist) -> Self {
        Self {
            target_duration: media.target_duration,
            segments: media
                .segments
                .into_iter()
                .map(|s| Segment::new(s.uri, s.duration))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample(n: usize) -> Playlist {
        Playlist::new(
            10,
            (0..n).map(|i| Segment::new(format!("{i}.ts"), 9.5)).collect(),
        )
    }

    #[test]
    fn test_parse_media_playlist() {
        let text = b"#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:5.005,\nseg-a.ts\n#EXTINF:4.5,\nhttps://cdn.example.com/seg-b.ts\n#EXT-X-ENDLIST\n";
        let playlist = Playlist::parse_media(text).unwrap();
        assert_eq!(playlist.target_duration, 6);
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.segments[0].uri, "seg-a.ts");
        assert_eq!(playlist.segments[1].uri, "https://cdn.example.com/seg-b.ts");
        assert!((playlist.segments[0].duration - 5.005).abs() < 1e-4);
    }

    #[test]
    fn test_parse_master_playlist() {
        let text = b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720\nmid.m3u8\n";
        match Playlist::parse(text).unwrap() {
            ParsedPlaylist::Master(master) => assert_eq!(master.variants.len(), 1),
            ParsedPlaylist::Media(_) => panic!("expected master playlist"),
        }
        assert!(Playlist::parse_media(text).is_err());
    }

    #[test]
    fn test_to_m3u8_layout() {
        let playlist = Playlist::new(
            10,
            vec![Segment::new("0.ts", 9.5), Segment::new("1.ts", 4.0)],
        );
        assert_eq!(
            playlist.to_m3u8(),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXTINF:9.5,\n0.ts\n#EXTINF:4,\n1.ts\n#EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn test_written_playlist_parses_back() {
        let playlist = sample(4);
        let reparsed = Playlist::parse_media(playlist.to_m3u8().as_bytes()).unwrap();
        assert_eq!(reparsed, playlist);
    }

    #[rstest]
    #[case(0, 0, 5)]
    #[case(1, 1, 4)]
    #[case(2, 2, 3)]
    #[case(5, 5, 0)]
    fn test_split_at(#[case] index: usize, #[case] head: usize, #[case] tail: usize) {
        let playlist = sample(5);
        let (first, second) = playlist.split_at(index).unwrap();
        assert_eq!(first.len(), head);
        assert_eq!(second.len(), tail);
        assert_eq!(first.target_duration, 10);
        assert_eq!(second.target_duration, 10);
        if tail > 0 {
            assert_eq!(second.segments[0].uri, format!("{index}.ts"));
        }
    }

    #[test]
    fn test_split_preserves_order_and_duration() {
        let playlist = sample(7);
        let (first, second) = playlist.split_at(3).unwrap();
        let rejoined: Vec<_> = first
            .segments
            .iter()
            .chain(second.segments.iter())
            .cloned()
            .collect();
        assert_eq!(rejoined, playlist.segments);
        let total = first.total_duration() + second.total_duration();
        assert!((total - playlist.total_duration()).abs() < 1e-9);
    }

    #[test]
    fn test_split_out_of_bounds() {
        let playlist = sample(2);
        assert!(matches!(
            playlist.split_at(3),
            Err(PlaylistError::SplitOutOfBounds { index: 3, len: 2 })
        ));
    }

    #[test]
    fn test_position_of() {
        let playlist = sample(3);
        assert_eq!(playlist.position_of("2.ts"), Some(2));
        assert_eq!(playlist.position_of("9.ts"), None);
    }
}
