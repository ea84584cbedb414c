//! # Sibwire
//!
//! The byte-level framing used when a call crosses into a sibling context.
//!
//! ## Architecture
//!
//! The channel between two contexts refuses any single transaction larger than a
//! fixed budget, so everything that travels over it is cut into blocks of at most
//! [`BLOCK_SIZE`] bytes. This crate owns three things:
//!
//! - [`chunk`]: cutting a byte stream into blocks and putting it back together.
//! - [`frame`]: the one-byte tags that open every request stream and response.
//! - [`outcome`]: the envelope a response body carries, either a value or a
//!   failure description that survives the trip back.
//!
//! Nothing here performs I/O. The transport lives in `sibrpc`.

pub mod chunk;
pub mod error;
pub mod frame;
pub mod outcome;

pub use chunk::BLOCK_SIZE;
pub use chunk::BlockAssembler;
pub use error::Error;
pub use error::Result;
pub use outcome::FailureKind;
pub use outcome::Outcome;
pub use outcome::RemoteFailure;
