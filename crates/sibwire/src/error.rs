//! # Wire Errors
//!
//! Everything that can go wrong while framing or unframing bytes.

/// A malformed or inconsistent frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A frame arrived with no bytes at all.
    #[error("empty frame")]
    EmptyFrame,
    /// The leading tag byte is not one this side understands.
    #[error("unknown tag byte {0:#04x}")]
    UnknownTag(u8),
    /// A header promised more bytes than the frame holds.
    #[error("truncated header: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    /// The stream does not fit the four-byte length prefix.
    #[error("stream of {0} bytes exceeds the length prefix")]
    TooLong(usize),
    #[error("block {index} out of range for a stream of {blocks} blocks")]
    BlockOutOfRange { index: usize, blocks: usize },
    #[error("block {index} carries {actual} bytes, expected {expected}")]
    BlockLength { index: usize, expected: usize, actual: usize },
    /// Assembly was finished while blocks were still outstanding.
    #[error("stream incomplete: {missing} of {blocks} blocks missing")]
    Incomplete { missing: usize, blocks: usize },
    /// The outcome envelope could not be encoded or decoded.
    #[error("outcome envelope: {0}")]
    Envelope(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Self::Envelope(e.to_string())
    }
}
