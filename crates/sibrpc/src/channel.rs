//! # Channel
//!
//! The raw pipe to a sibling context. Implementations carry bytes and
//! structured values; they never interpret them.

use crate::types::CallId;
use crate::types::MethodRef;
use crate::types::StructuredValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The pipe is momentarily saturated. Retrying later may succeed.
    #[error("transaction too large for the channel")]
    TooLarge,
    #[error("channel disconnected")]
    Disconnected,
    /// The remote side holds no session for this call.
    #[error("no session for {0}")]
    UnknownCall(CallId),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// One bound connection to a sibling context.
///
/// Every method is a single transaction and must be retryable: a prepare that
/// is repeated after `TooLarge` overwrites rather than duplicates.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Stages block `block_index` of a request stream totalling `total_bytes`.
    async fn prepare_block(&self, call: CallId, block_index: u32, total_bytes: u32, block: &[u8]) -> Result<()>;

    /// Stages a structured argument under `aux_index`.
    async fn prepare_structured(&self, call: CallId, aux_index: u32, value: StructuredValue) -> Result<()>;

    /// Sends the last request block and runs the call. Returns the response header.
    async fn execute(&self, call: CallId, block_index: u32, method: MethodRef, final_block: &[u8]) -> Result<Vec<u8>>;

    async fn fetch_block(&self, call: CallId, block_index: u32) -> Result<Vec<u8>>;

    async fn fetch_structured(&self, call: CallId, aux_index: u32) -> Result<StructuredValue>;

    /// Drops whatever the remote side still holds for `call`. Sent when a
    /// session is abandoned halfway; channels without remote state ignore it.
    async fn discard(&self, _call: CallId) {}

    /// Resolves once the channel is gone for good.
    async fn closed(&self);
}
