//! # Sibrpc
//!
//! Call sessions over a size-limited channel to a sibling context.
//!
//! ## Philosophy
//!
//! A [`Channel`] is the bare pipe: five primitives, each one transaction, each
//! one refusable with [`ChannelError::TooLarge`] when the pipe is saturated.
//! The [`CallSender`] turns a method call into a sequence of those primitives
//! and the [`CallReceiver`] on the other side turns them back into a request.
//! Neither side knows about binding, queueing or reconnects; that is `sibrun`'s job.
//!
//! ## Invariants
//! - A call carries one random [`CallId`] across every primitive it issues.
//! - Saturation is retried a bounded number of times, never forever.
//! - A lost channel always surfaces as [`Unreachable::ChannelLost`], so callers
//!   can tell it apart from a remote failure.

pub mod channel;
pub mod config;
pub mod error;
pub mod loopback;
pub mod receiver;
pub mod sender;
pub mod service;
pub mod types;

pub use channel::Channel;
pub use channel::ChannelError;
pub use config::TransportConfig;
pub use error::CallError;
pub use error::Misuse;
pub use error::Unreachable;
pub use loopback::LoopbackChannel;
pub use receiver::CallReceiver;
pub use sender::CallSender;
pub use sender::CallSink;
pub use service::Handler;
pub use service::ServiceEndpoint;
pub use service::UnknownMethod;
pub use types::CallId;
pub use types::InterfaceId;
pub use types::MethodId;
pub use types::MethodRef;
pub use types::Payload;
pub use types::StructuredValue;

#[cfg(test)]
mod tests;
