//! Minimal CAR v1 block reader
//!
//! A commit's `blocks` field is a CAR file: a varint-prefixed DAG-CBOR header
//! followed by varint-prefixed sections of `CID || block bytes`. Only the
//! block map is needed here; the header roots and the MST are not walked.

use std::collections::HashMap;
use std::io::Cursor;

use cid::Cid;

use crate::types::{FeedgenError, Result};

/// Read an unsigned LEB128 varint, advancing `pos`
fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| FeedgenError::Decode("truncated varint in CAR".into()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FeedgenError::Decode("varint overflow in CAR".into()))
}

/// Advance past `len` bytes, returning them
fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: u64) -> Result<&'a [u8]> {
    let len = usize::try_from(len)
        .map_err(|_| FeedgenError::Decode("CAR section too large".into()))?;
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| FeedgenError::Decode("truncated CAR section".into()))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Parse every block of a CAR v1 file into a CID → bytes map
pub fn read_blocks(bytes: &[u8]) -> Result<HashMap<Cid, Vec<u8>>> {
    let mut pos = 0;

    let header_len = read_varint(bytes, &mut pos)?;
    if header_len == 0 {
        return Err(FeedgenError::Decode("empty CAR header".into()));
    }
    take(bytes, &mut pos, header_len)?;

    let mut blocks = HashMap::new();
    while pos < bytes.len() {
        let section_len = read_varint(bytes, &mut pos)?;
        let section = take(bytes, &mut pos, section_len)?;

        let mut reader = Cursor::new(section);
        let cid = Cid::read_bytes(&mut reader)
            .map_err(|e| FeedgenError::Decode(format!("bad CID in CAR: {}", e)))?;
        let data_start = reader.position() as usize;
        blocks.insert(cid, section[data_start..].to_vec());
    }

    Ok(blocks)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest};
    use serde::Serialize;

    fn write_varint(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    #[derive(Serialize)]
    struct Header {
        roots: Vec<Cid>,
        version: u64,
    }

    /// DAG-CBOR CID for a block
    pub(crate) fn cid_for(data: &[u8]) -> Cid {
        Cid::new_v1(0x71, Code::Sha2_256.digest(data))
    }

    /// Build a CAR file holding `blocks` as-is
    pub(crate) fn build_car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let header = serde_ipld_dagcbor::to_vec(&Header {
            roots: blocks.iter().take(1).map(|(cid, _)| *cid).collect(),
            version: 1,
        })
        .unwrap();

        let mut out = Vec::new();
        write_varint(header.len() as u64, &mut out);
        out.extend_from_slice(&header);
        for (cid, data) in blocks {
            let cid_bytes = cid.to_bytes();
            write_varint((cid_bytes.len() + data.len()) as u64, &mut out);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_read_blocks() {
        let first = b"first block".to_vec();
        let second = vec![0u8; 300];
        let car = build_car(&[(cid_for(&first), first.clone()), (cid_for(&second), second.clone())]);

        let blocks = read_blocks(&car).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[&cid_for(&first)], first);
        assert_eq!(blocks[&cid_for(&second)], second);
    }

    #[test]
    fn test_truncated_car_is_an_error() {
        let data = b"payload".to_vec();
        let car = build_car(&[(cid_for(&data), data)]);
        assert!(read_blocks(&car[..car.len() - 3]).is_err());
        assert!(read_blocks(&[]).is_err());
    }

    #[test]
    fn test_varint_multi_byte() {
        let mut buf = Vec::new();
        write_varint(300, &mut buf);
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
    }
}
