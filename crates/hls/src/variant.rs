use m3u8_rs::{MasterPlaylist, VariantStream};

/// Sort key for variants: larger is better.
pub type VariantScore = (u64, u64, u64, u64);

fn score(variant: &VariantStream) -> VariantScore {
    let (width, height) = variant
        .resolution
        .as_ref()
        .map(|r| (r.width, r.height))
        .unwrap_or((0, 0));
    (
        width,
        height,
        variant.average_bandwidth.unwrap_or(0),
        variant.bandwidth,
    )
}

/// Pick the variant with the highest `(width, height, average_bandwidth, bandwidth)`.
///
/// I-frame-only variants are never selected. Ties keep the earliest entry.
pub fn select_variant(master: &MasterPlaylist) -> Option<&VariantStream> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .fold(None, |best: Option<&VariantStream>, v| match best {
            Some(b) if score(b) >= score(v) => Some(b),
            _ => Some(v),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::{ParsedPlaylist, Playlist};

    fn master(text: &str) -> MasterPlaylist {
        match Playlist::parse(text.as_bytes()).unwrap() {
            ParsedPlaylist::Master(m) => m,
            ParsedPlaylist::Media(_) => panic!("expected master playlist"),
        }
    }

    #[test]
    fn test_prefers_highest_resolution() {
        let m = master(
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=640x360\nlow.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1920x1080\nhigh.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\nmid.m3u8\n",
        );
        assert_eq!(select_variant(&m).unwrap().uri, "high.m3u8");
    }

    #[test]
    fn test_bandwidth_breaks_ties() {
        let m = master(
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1000,AVERAGE-BANDWIDTH=900,RESOLUTION=1280x720\na.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1000,AVERAGE-BANDWIDTH=950,RESOLUTION=1280x720\nb.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2000,AVERAGE-BANDWIDTH=900,RESOLUTION=1280x720\nc.m3u8\n",
        );
        assert_eq!(select_variant(&m).unwrap().uri, "b.m3u8");
    }

    #[test]
    fn test_empty_master_has_no_variant() {
        let m = MasterPlaylist::default();
        assert!(select_variant(&m).is_none());
    }
}
