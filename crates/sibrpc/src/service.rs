//! # Service Endpoint
//!
//! The remote half of a channel: a [`CallReceiver`] for session state and a
//! [`Handler`] that does the actual work.

use std::backtrace::BacktraceStatus;
use std::sync::Arc;

use sibwire::FailureKind;
use sibwire::RemoteFailure;

use crate::channel::ChannelError;
use crate::channel::Result;
use crate::config::TransportConfig;
use crate::receiver::CallReceiver;
use crate::types::CallId;
use crate::types::MethodRef;
use crate::types::Payload;
use crate::types::StructuredValue;

/// Serves calls arriving from a sibling context.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, method: MethodRef, payload: Payload) -> anyhow::Result<Payload>;
}

/// Returned by a [`Handler`] that does not serve the requested method.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("no handler for method {0}")]
pub struct UnknownMethod(pub MethodRef);

pub struct ServiceEndpoint {
    receiver: CallReceiver,
    handler: Arc<dyn Handler>,
}

impl ServiceEndpoint {
    pub fn new(handler: Arc<dyn Handler>, config: &TransportConfig) -> Self {
        Self { receiver: CallReceiver::new(config.block_size), handler }
    }

    pub fn receiver(&self) -> &CallReceiver {
        &self.receiver
    }

    pub fn prepare_block(&self, call: CallId, block_index: u32, total_bytes: u32, block: &[u8]) -> Result<()> {
        self.receiver.prepare_block(call, block_index, total_bytes, block)
    }

    pub fn prepare_structured(&self, call: CallId, aux_index: u32, value: StructuredValue) -> Result<()> {
        self.receiver.prepare_structured(call, aux_index, value);
        Ok(())
    }

    /// Reassembles the request, runs the handler and stages the response.
    pub async fn execute(&self, call: CallId, block_index: u32, method: MethodRef, final_block: &[u8]) -> Result<Vec<u8>> {
        let result = match self.receiver.take_request(call, block_index, final_block) {
            Ok(payload) => self.handler.handle(method, payload).await.map_err(|e| failure_from(method, e)),
            Err(ChannelError::Protocol(reason)) => Err(RemoteFailure::new(FailureKind::MalformedRequest, reason)),
            Err(e) => return Err(e),
        };
        if let Err(failure) = &result {
            tracing::debug!(%call, %method, %failure, "call failed on the remote side");
        }
        self.receiver.stage_response(call, result)
    }

    pub fn fetch_block(&self, call: CallId, block_index: u32) -> Result<Vec<u8>> {
        self.receiver.fetch_block(call, block_index)
    }

    pub fn fetch_structured(&self, call: CallId, aux_index: u32) -> Result<StructuredValue> {
        self.receiver.fetch_structured(call, aux_index)
    }
}

fn failure_from(method: MethodRef, error: anyhow::Error) -> RemoteFailure {
    let kind = match error.downcast_ref::<UnknownMethod>() {
        Some(UnknownMethod(m)) if *m == method => FailureKind::UnknownMethod,
        _ => FailureKind::Handler,
    };
    let trace = match error.backtrace().status() {
        BacktraceStatus::Captured => Some(error.backtrace().to_string()),
        _ => None,
    };
    let messages: Vec<String> = error.chain().map(|cause| cause.to_string()).collect();
    RemoteFailure::from_chain(kind, messages, trace)
}
