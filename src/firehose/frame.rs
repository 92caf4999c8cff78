//! Event stream frame decoding
//!
//! Each binary websocket message carries two concatenated CBOR values: a
//! header `{op, t}` and a body whose shape depends on `t`. `op == -1` marks
//! an error frame.

use std::io::Cursor;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::types::{FeedgenError, Result};

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Header {
    pub op: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// `#commit` message body
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommitEvent {
    pub seq: i64,

    /// DID of the repository owner
    pub repo: String,

    #[serde(default)]
    pub rev: String,

    /// Set when the commit was too large to ship its blocks
    #[serde(rename = "tooBig", default)]
    pub too_big: bool,

    /// CAR slice with the changed blocks
    #[serde(default)]
    pub blocks: ByteBuf,

    #[serde(default)]
    pub ops: Vec<RepoOp>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepoOp {
    /// `create`, `update` or `delete`
    pub action: String,

    /// `<collection>/<recordKey>`
    pub path: String,

    #[serde(default)]
    pub cid: Option<Cid>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// A decoded stream message
#[derive(Debug)]
pub enum Frame {
    Commit(CommitEvent),
    Error {
        error: String,
        message: Option<String>,
    },
    /// Any other message type (`#identity`, `#account`, `#info`, ...)
    Other(String),
}

/// Decode one binary message
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    let mut reader = Cursor::new(bytes);
    let header: Header = ciborium::de::from_reader(&mut reader)
        .map_err(|e| FeedgenError::Decode(format!("frame header: {}", e)))?;
    let body = &bytes[reader.position() as usize..];

    if header.op == -1 {
        let ErrorBody { error, message } = serde_ipld_dagcbor::from_slice(body)
            .map_err(|e| FeedgenError::Decode(format!("error frame body: {}", e)))?;
        return Ok(Frame::Error { error, message });
    }
    if header.op != 1 {
        return Err(FeedgenError::Decode(format!("unknown frame op {}", header.op)));
    }

    match header.t.as_deref() {
        Some("#commit") => {
            let commit = serde_ipld_dagcbor::from_slice(body)
                .map_err(|e| FeedgenError::Decode(format!("commit body: {}", e)))?;
            Ok(Frame::Commit(commit))
        }
        other => Ok(Frame::Other(other.unwrap_or_default().to_string())),
    }
}
