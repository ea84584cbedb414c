//! # Loopback Channel
//!
//! An in-process [`Channel`] wired straight into a [`ServiceEndpoint`]. Used
//! when both contexts share an address space, and by tests.

use std::sync::Arc;

use tokio::sync::watch;

use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::channel::Result;
use crate::service::ServiceEndpoint;
use crate::types::CallId;
use crate::types::MethodRef;
use crate::types::StructuredValue;

pub struct LoopbackChannel {
    endpoint: Arc<ServiceEndpoint>,
    closed: watch::Sender<bool>,
}

impl LoopbackChannel {
    pub fn new(endpoint: Arc<ServiceEndpoint>) -> Self {
        Self { endpoint, closed: watch::Sender::new(false) }
    }

    /// Severs the channel. Every later primitive fails with `Disconnected`.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn endpoint(&self) -> &Arc<ServiceEndpoint> {
        &self.endpoint
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() { Err(ChannelError::Disconnected) } else { Ok(()) }
    }
}

#[async_trait::async_trait]
impl Channel for LoopbackChannel {
    async fn prepare_block(&self, call: CallId, block_index: u32, total_bytes: u32, block: &[u8]) -> Result<()> {
        self.check_open()?;
        self.endpoint.prepare_block(call, block_index, total_bytes, block)
    }

    async fn prepare_structured(&self, call: CallId, aux_index: u32, value: StructuredValue) -> Result<()> {
        self.check_open()?;
        self.endpoint.prepare_structured(call, aux_index, value)
    }

    async fn execute(&self, call: CallId, block_index: u32, method: MethodRef, final_block: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;
        let header = self.endpoint.execute(call, block_index, method, final_block).await?;
        // The handler may have outlived the channel.
        self.check_open()?;
        Ok(header)
    }

    async fn fetch_block(&self, call: CallId, block_index: u32) -> Result<Vec<u8>> {
        self.check_open()?;
        self.endpoint.fetch_block(call, block_index)
    }

    async fn fetch_structured(&self, call: CallId, aux_index: u32) -> Result<StructuredValue> {
        self.check_open()?;
        self.endpoint.fetch_structured(call, aux_index)
    }

    async fn discard(&self, call: CallId) {
        if !self.is_closed() {
            self.endpoint.receiver().discard(call);
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
