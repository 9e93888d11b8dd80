//! Replay error reporting.
//!
//! Only malformed input is an error: an unknown event tag or a known tag
//! whose payload cannot be decoded kills the replay. The recoverable
//! conditions of the trace format (objects referenced before registration,
//! inconsistent old shapes, unknown call contexts) are absorbed by the core
//! and never surface here.

use crate::events::EventTag;
use std::fmt;
use std::io;

/// Fatal replay failure.
#[derive(Debug)]
pub enum ReplayError {
    /// Could not read the log file.
    Io(io::Error),
    /// A record began with a tag outside the closed event set.
    UnknownTag {
        /// The offending tag value.
        tag: u64,
        /// Byte offset of the record in the log.
        offset: usize,
    },
    /// A known record's payload did not decode.
    Record {
        /// Tag whose payload failed.
        tag: EventTag,
        /// Which field was malformed or missing.
        what: &'static str,
        /// Byte offset of the failure.
        offset: usize,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Io(err) => write!(f, "cannot read log: {}", err),
            ReplayError::UnknownTag { tag, offset } => {
                write!(f, "unknown event tag {} at byte {}", tag, offset)
            }
            ReplayError::Record { tag, what, offset } => {
                write!(
                    f,
                    "malformed {:?} record at byte {}: bad {}",
                    tag, offset, what
                )
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ReplayError {
    fn from(err: io::Error) -> Self {
        ReplayError::Io(err)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_tag() {
        let e = ReplayError::UnknownTag { tag: 99, offset: 4 };
        assert_eq!(e.to_string(), "unknown event tag 99 at byte 4");
    }

    #[test]
    fn test_display_record() {
        let e = ReplayError::Record {
            tag: EventTag::NewField,
            what: "new_map",
            offset: 12,
        };
        let s = e.to_string();
        assert!(s.contains("NewField"));
        assert!(s.contains("new_map"));
    }
}
