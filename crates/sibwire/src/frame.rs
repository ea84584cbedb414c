//! # Frames
//!
//! The tag bytes that open request streams and responses.
//!
//! ## Request stream
//! ```text
//! [TAG_FLAT][body ...]      flat bytes follow the tag
//! [TAG_STRUCTURED]          the value was staged out of band at aux index 0
//! ```
//!
//! ## Response
//! ```text
//! [TAG_COMPLETE][body ...]                     the whole body fits one block
//! [TAG_INCOMPLETE][len: u32 BE][first block]   fetch blocks 1.. for the rest
//! [TAG_STRUCTURED]                             fetch the value at aux index 0
//! ```
//!
//! ## Invariants
//! - Decoding never panics on arbitrary input; unknown tags are errors.
//! - The length prefix counts body bytes only, never the header.

use crate::error::Error;
use crate::error::Result;

pub const TAG_FLAT: u8 = 0;
pub const TAG_COMPLETE: u8 = 0;
pub const TAG_INCOMPLETE: u8 = 1;
pub const TAG_STRUCTURED: u8 = 2;

/// Bytes preceding the body of a flat request stream.
pub const REQUEST_HEADER_LEN: usize = 1;
/// Bytes preceding the first block of an incomplete response.
pub const INCOMPLETE_HEADER_LEN: usize = 5;

/// The whole request stream of a structured call.
pub const STRUCTURED_REQUEST: [u8; 1] = [TAG_STRUCTURED];

/// What a request stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Body starts at [`REQUEST_HEADER_LEN`].
    Flat,
    Structured,
}

/// Prefixes a flat body with its tag.
pub fn encode_flat_request(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + REQUEST_HEADER_LEN);
    out.push(TAG_FLAT);
    out.extend_from_slice(body);
    out
}

pub fn decode_request(stream: &[u8]) -> Result<RequestKind> {
    match stream {
        [] => Err(Error::EmptyFrame),
        [TAG_FLAT, ..] => Ok(RequestKind::Flat),
        [TAG_STRUCTURED] => Ok(RequestKind::Structured),
        [tag, ..] => Err(Error::UnknownTag(*tag)),
    }
}

/// The decoded opening of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader<'a> {
    Complete(&'a [u8]),
    Incomplete { total_len: usize, first_block: &'a [u8] },
    Structured,
}

impl<'a> ResponseHeader<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let Some((&tag, rest)) = bytes.split_first() else {
            return Err(Error::EmptyFrame);
        };
        match tag {
            TAG_COMPLETE => Ok(Self::Complete(rest)),
            TAG_INCOMPLETE => {
                let Some((len, first_block)) = rest.split_first_chunk::<4>() else {
                    return Err(Error::Truncated { needed: INCOMPLETE_HEADER_LEN, actual: bytes.len() });
                };
                let total_len = u32::from_be_bytes(*len) as usize;
                if first_block.len() > total_len {
                    return Err(Error::Truncated { needed: first_block.len(), actual: total_len });
                }
                Ok(Self::Incomplete { total_len, first_block })
            }
            TAG_STRUCTURED if rest.is_empty() => Ok(Self::Structured),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

pub fn encode_complete(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(TAG_COMPLETE);
    out.extend_from_slice(body);
    out
}

/// Opens a response whose body of `total_len` bytes needs further fetches.
pub fn encode_incomplete(total_len: usize, first_block: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(total_len).map_err(|_| Error::TooLong(total_len))?;
    let mut out = Vec::with_capacity(first_block.len() + INCOMPLETE_HEADER_LEN);
    out.push(TAG_INCOMPLETE);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(first_block);
    Ok(out)
}

pub fn encode_structured() -> Vec<u8> {
    vec![TAG_STRUCTURED]
}
