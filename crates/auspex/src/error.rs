use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Corruption or unsupported content in the snapshot itself. Always fatal for the
/// current analysis.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid header: {0}")]
    Header(String),

    #[error("identifier size must be 1, 2, 4 or 8, found {0}")]
    IdentifierSize(u32),

    #[error("unknown record tag 0x{tag:02x} at {offset}")]
    UnknownTag { tag: u8, offset: u64 },

    #[error(
        "unknown heap dump tag 0x{tag:02x} at {offset} \
         after 0x{previous_tag:02x} at {previous_offset}"
    )]
    UnknownSubTag { tag: u8, offset: u64, previous_tag: u8, previous_offset: u64 },

    #[error("{0} cannot be parsed")]
    UnsupportedSubRecord(&'static str),

    #[error("snapshot truncated at {offset}, wanted {wanted} more bytes")]
    Truncated { offset: u64, wanted: u64 },

    #[error("unknown field type {0}")]
    UnknownFieldType(u8),

    #[error("object 0x{0:x} is not in the index")]
    NotFound(u64),

    #[error("expected {expected} at {offset}")]
    Unexpected { offset: u64, expected: &'static str },
}

#[derive(Debug, Error)]
pub enum AuspexError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("cannot access `{}`: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuspexError {
    /// `true` for errors caused by the snapshot content rather than its access.
    pub fn is_format(&self) -> bool {
        matches!(self, AuspexError::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, AuspexError>;
