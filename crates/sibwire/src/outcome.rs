//! # Outcome Envelope
//!
//! A flat response body is always an [`Outcome`]: the handler's bytes, or a
//! description of how it failed. Failures keep their whole cause chain so the
//! caller sees one error that spans both contexts.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Value(Vec<u8>),
    Failure(RemoteFailure),
}

impl Outcome {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Broad class of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The handler ran and returned an error.
    Handler,
    /// No handler exists for the requested method.
    UnknownMethod,
    /// The request could not be reassembled or decoded.
    MalformedRequest,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler => f.write_str("handler failed"),
            Self::UnknownMethod => f.write_str("unknown method"),
            Self::MalformedRequest => f.write_str("malformed request"),
        }
    }
}

/// A failure raised in the sibling context, carried back by value.
///
/// The `cause` links form the same chain the remote error had, and are exposed
/// through [`std::error::Error::source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
    pub trace: Option<String>,
    pub cause: Option<Box<RemoteFailure>>,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), trace: None, cause: None }
    }

    /// Builds a failure from an outermost-first list of messages.
    pub fn from_chain<I>(kind: FailureKind, messages: I, trace: Option<String>) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut cause: Option<Box<RemoteFailure>> = None;
        let mut messages = messages.into_iter().rev().peekable();
        let mut outermost = String::new();
        while let Some(message) = messages.next() {
            if messages.peek().is_none() {
                outermost = message;
                break;
            }
            cause = Some(Box::new(Self { kind, message, trace: None, cause }));
        }
        Self { kind, message: outermost, trace, cause }
    }

    /// Messages from the outermost failure to the root cause.
    pub fn chain(&self) -> impl Iterator<Item = &str> {
        std::iter::successors(Some(self), |f| f.cause.as_deref()).map(|f| f.message.as_str())
    }

    pub fn root_cause(&self) -> &RemoteFailure {
        let mut current = self;
        while let Some(next) = current.cause.as_deref() {
            current = next;
        }
        current
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
