//! # Call Errors
//!
//! What a caller can get back instead of a result.

use crate::channel::ChannelError;
use crate::types::MethodRef;
use sibwire::RemoteFailure;

/// Why a target could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unreachable {
    #[error("channel to the target was lost")]
    ChannelLost,
    #[error("channel refused {operation} as too large after {attempts} attempts")]
    Saturated { operation: &'static str, attempts: u32 },
    #[error("target is not available")]
    NotAvailable,
    #[error("bind failed: {0}")]
    BindFailed(String),
    #[error("target is not connected")]
    NotConnected,
    #[error("connector shut down")]
    Shutdown,
}

/// The API was used in a way that can never succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    #[error("blocking call made from a thread inside the async runtime")]
    BlockingInRuntime,
    #[error("synchronous call made without a connection holder")]
    NoConnectionHolder,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("target unreachable: {0}")]
    TargetUnreachable(#[from] Unreachable),
    /// The remote side ran the call and it failed. The source chain continues
    /// into the remote error's own causes.
    #[error("remote call {method} failed")]
    Remote {
        method: MethodRef,
        #[source]
        source: RemoteFailure,
    },
    #[error(transparent)]
    Misuse(#[from] Misuse),
    #[error("channel error: {0}")]
    Channel(ChannelError),
    #[error("wire error: {0}")]
    Wire(#[from] sibwire::Error),
}

impl CallError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::TargetUnreachable(_))
    }

    pub fn is_channel_lost(&self) -> bool {
        matches!(self, Self::TargetUnreachable(Unreachable::ChannelLost))
    }
}

impl From<ChannelError> for CallError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Disconnected => Self::TargetUnreachable(Unreachable::ChannelLost),
            other => Self::Channel(other),
        }
    }
}
