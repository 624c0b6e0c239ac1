//! Protocol data types shared between the bridge and its frontends.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identity of a session: the stdin write-end descriptor value.
pub type SessionKey = i32;

/// Which child output stream a chunk came from.
///
/// Serializes as the platform's standard stream number (stdout = 1,
/// stderr = 2) so the frontend can use the conventional numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl StreamTag {
    /// The conventional file number for this stream.
    pub fn fileno(self) -> i32 {
        match self {
            StreamTag::Stdout => 1,
            StreamTag::Stderr => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamTag::Stdout => "stdout",
            StreamTag::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for StreamTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.fileno())
    }
}

impl<'de> Deserialize<'de> for StreamTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            1 => Ok(StreamTag::Stdout),
            2 => Ok(StreamTag::Stderr),
            other => Err(de::Error::custom(format!("unknown stream tag: {other}"))),
        }
    }
}

/// One unit of output pushed from a stream reader to the frontend.
///
/// Data chunks carry `{"value": ["text", tag], "done": false}`; the final
/// close record is `{"done": true}` with no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<(String, StreamTag)>,
    pub done: bool,
}

impl ChunkNotification {
    /// A data chunk read from one of the child's output streams.
    pub fn chunk(text: impl Into<String>, tag: StreamTag) -> Self {
        Self {
            value: Some((text.into(), tag)),
            done: false,
        }
    }

    /// The terminal close record, emitted once per session.
    pub fn done() -> Self {
        Self {
            value: None,
            done: true,
        }
    }
}
