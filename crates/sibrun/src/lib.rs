//! # Sibrun
//!
//! Keeps connections to sibling contexts alive exactly as long as someone needs
//! them, and routes calls through them.
//!
//! ## Architecture
//!
//! - **Holders**: a connection stays bound while at least one [`Holder`] is
//!   registered for its target, and for an idle grace period after the last
//!   one leaves. [`HolderGuard`] releases its holder on drop.
//! - **Actor**: each target gets a single task that owns its bind state, its
//!   queue of parked calls and its backoff.
//! - **Platform**: the host decides reachability, authorization and how a
//!   channel is opened, via the [`Platform`] trait.
//! - **Transport**: once bound, calls run as `sibrpc` sessions.
//!
//! ## Invariants
//! - A queued call's sink fires exactly once.
//! - Binds back off from 500ms, doubling, and stop when a bind is refused
//!   outright or the target becomes unavailable.
//! - Blocking entry points refuse to run on a runtime thread.

pub mod config;
mod connection;
pub mod connector;
pub mod error;
mod holders;
pub mod ids;
pub mod merger;
pub mod platform;
mod queue;
pub mod telemetry;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use connector::ConnectorBuilder;
pub use connector::HolderGuard;
pub use error::BindError;
pub use error::BuildError;
pub use error::ConfigError;
pub use ids::Holder;
pub use ids::Target;
pub use merger::ResultMerger;
pub use platform::Platform;

pub use sibrpc::CallError;
pub use sibrpc::CallSink;
pub use sibrpc::Channel;
pub use sibrpc::MethodRef;
pub use sibrpc::Misuse;
pub use sibrpc::Payload;
pub use sibrpc::TransportConfig;
pub use sibrpc::Unreachable;
