use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How partition artifacts are joined into the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcatMethod {
    /// Write a `concat.txt` list and read it with the concat demuxer.
    #[default]
    DemuxerList,
    /// Pass `concat:a|b|c` as a single input.
    ProtocolConcat,
}

impl ConcatMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DemuxerList => "concat_demuxer",
            Self::ProtocolConcat => "concat_protocol",
        }
    }
}

impl fmt::Display for ConcatMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unrecognized concat method '{0}' (expected concat_demuxer, concat_protocol, 0 or 1)")]
pub struct UnknownConcatMethod(pub String);

impl FromStr for ConcatMethod {
    type Err = UnknownConcatMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "concat_demuxer" | "0" => Ok(Self::DemuxerList),
            "concat_protocol" | "1" => Ok(Self::ProtocolConcat),
            other => Err(UnknownConcatMethod(other.to_string())),
        }
    }
}
