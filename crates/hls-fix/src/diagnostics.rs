//! Muxer diagnostic line classification.
//!
//! The muxer is run at `info` log level so that it reports each segment it
//! opens. Those lines, together with the timestamp errors below, are the only
//! signal used to locate a discontinuity.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static OPENING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Opening '(?P<path>.*?\.ts)' for reading").unwrap());

static DISCONTINUITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Non-monotonous DTS in output stream|out of range for mov/mp4 format").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLine<'a> {
    /// The muxer started reading a segment; carries the file name only.
    Opening(&'a str),
    /// Non-monotonic or out-of-range timestamp.
    Discontinuity,
    Other,
}

impl<'a> DiagnosticLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        if let Some(caps) = OPENING_REGEX.captures(line)
            && let Some(path) = caps.name("path")
        {
            let path = path.as_str();
            let name = Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path);
            return Self::Opening(name);
        }
        if DISCONTINUITY_REGEX.is_match(line) {
            return Self::Discontinuity;
        }
        Self::Other
    }
}
