//! Cursor options
//!
//! Three cursors exist and they are never interchangeable:
//! - [`ConsumerCursor`]: where the firehose subscription resumes
//! - [`GeneratorCursor`]: where the classification scan resumes
//! - [`ReadCursor`]: a skip offset handed out by the feed reader

use std::fmt;

use clap::ValueEnum;

use super::FeedgenError;

/// Starting point for firehose consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConsumerCursor {
    /// Resume from the highest sequence already stored
    #[default]
    LastConsumed,
    /// Replay the firehose from sequence 0
    FirstStream,
    /// Live tail only, no resume value is sent
    CurrentStream,
}

impl ConsumerCursor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastConsumed => "last-consumed",
            Self::FirstStream => "first-stream",
            Self::CurrentStream => "current-stream",
        }
    }
}

impl std::str::FromStr for ConsumerCursor {
    type Err = FeedgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "last-consumed" => Ok(Self::LastConsumed),
            "first-stream" => Ok(Self::FirstStream),
            "current-stream" => Ok(Self::CurrentStream),
            other => Err(FeedgenError::Config(format!("invalid cursor value: {other}"))),
        }
    }
}

impl fmt::Display for ConsumerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starting point for feed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GeneratorCursor {
    /// Continue after the highest sequence already in the derived feed
    #[default]
    LastGenerated,
    /// Rescan every stored post
    FirstPost,
}

impl GeneratorCursor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastGenerated => "last-generated",
            Self::FirstPost => "first-post",
        }
    }
}

impl std::str::FromStr for GeneratorCursor {
    type Err = FeedgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "last-generated" => Ok(Self::LastGenerated),
            "first-post" => Ok(Self::FirstPost),
            other => Err(FeedgenError::Config(format!("invalid cursor value: {other}"))),
        }
    }
}

impl fmt::Display for GeneratorCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skip offset into a feed, encoded as a decimal string on the wire.
///
/// This is a count of entries already returned, not a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadCursor(pub u64);

impl ReadCursor {
    /// Largest offset the store accepts as a skip value
    pub const MAX_OFFSET: u64 = i64::MAX as u64;

    /// Parse the optional `cursor` query value. Absent or empty means offset 0.
    pub fn parse(raw: Option<&str>) -> Result<Self, FeedgenError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self(0)),
            Some(value) => {
                let offset = value.parse::<u64>().map_err(|e| {
                    FeedgenError::BadRequest(format!("cursor is not an integer: {e}"))
                })?;
                if offset > Self::MAX_OFFSET {
                    return Err(FeedgenError::BadRequest(format!(
                        "cursor is out of range: {offset}"
                    )));
                }
                Ok(Self(offset))
            }
        }
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Cursor pointing `count` entries further into the feed
    pub fn advance(&self, count: u64) -> Self {
        Self(self.0.saturating_add(count).min(Self::MAX_OFFSET))
    }
}

impl fmt::Display for ReadCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
