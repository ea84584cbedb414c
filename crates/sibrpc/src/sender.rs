//! # Call Sender
//!
//! Drives one call session from the calling side.
//!
//! ## Session
//! 1. Flat payloads are tagged and cut into blocks. Every block but the last
//!    goes out with `prepare_block`; the last rides on `execute`.
//!    Structured payloads are staged with `prepare_structured` and `execute`
//!    carries only the structured tag.
//! 2. The response header says whether the body is complete, needs more
//!    blocks fetched, or is a structured value to fetch.
//! 3. A flat body is an outcome envelope: a value, or a remote failure that
//!    becomes [`CallError::Remote`].

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use sibwire::BlockAssembler;
use sibwire::Outcome;
use sibwire::chunk;
use sibwire::frame;
use sibwire::frame::ResponseHeader;

use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::config::TransportConfig;
use crate::error::CallError;
use crate::error::Unreachable;
use crate::types::CallId;
use crate::types::MethodRef;
use crate::types::Payload;

/// Receives the result of a call that completes later.
pub trait CallSink: Send + 'static {
    fn complete(self: Box<Self>, result: Result<Payload, CallError>);
}

impl<F> CallSink for F
where
    F: FnOnce(Result<Payload, CallError>) + Send + 'static,
{
    fn complete(self: Box<Self>, result: Result<Payload, CallError>) {
        (*self)(result)
    }
}

/// Issues calls over one bound channel.
#[derive(Clone)]
pub struct CallSender {
    channel: Arc<dyn Channel>,
    config: TransportConfig,
}

impl CallSender {
    pub fn new(channel: Arc<dyn Channel>, config: TransportConfig) -> Self {
        Self { channel, config }
    }

    /// Runs one call to completion.
    #[tracing::instrument(level = "debug", skip_all, fields(%method))]
    pub async fn call(&self, method: MethodRef, payload: Payload) -> Result<Payload, CallError> {
        let call = CallId::random();
        let result = self.session(call, method, payload).await;
        if let Err(e) = &result {
            if leaves_remote_state(e) {
                tracing::debug!(%call, error = %e, "abandoning session");
                self.channel.discard(call).await;
            }
        }
        result
    }

    /// Runs one call and hands the result to `sink`.
    pub async fn call_into(&self, method: MethodRef, payload: Payload, sink: Box<dyn CallSink>) {
        let result = self.call(method, payload).await;
        sink.complete(result);
    }

    async fn session(&self, call: CallId, method: MethodRef, payload: Payload) -> Result<Payload, CallError> {
        let header = self.send_request(call, method, payload).await?;
        self.read_response(call, method, &header).await
    }

    async fn send_request(&self, call: CallId, method: MethodRef, payload: Payload) -> Result<Vec<u8>, CallError> {
        match payload {
            Payload::Structured(value) => {
                self.retry("prepare_structured", call, || {
                    self.channel.prepare_structured(call, 0, value.clone())
                })
                .await?;
                self.retry("execute", call, || {
                    self.channel.execute(call, 0, method, &frame::STRUCTURED_REQUEST)
                })
                .await
            }
            Payload::Flat(body) => {
                let stream = frame::encode_flat_request(&body);
                let total = u32::try_from(stream.len()).map_err(|_| sibwire::Error::TooLong(stream.len()))?;
                let blocks = chunk::split(&stream, self.config.block_size);
                let Some((last, leading)) = blocks.split_last() else {
                    return Err(sibwire::Error::EmptyFrame.into());
                };
                tracing::trace!(%call, blocks = blocks.len(), total, "sending request");
                for (index, block) in leading.iter().enumerate() {
                    let index = index as u32;
                    self.retry("prepare_block", call, || {
                        self.channel.prepare_block(call, index, total, block)
                    })
                    .await?;
                }
                let last_index = leading.len() as u32;
                self.retry("execute", call, || self.channel.execute(call, last_index, method, last))
                    .await
            }
        }
    }

    async fn read_response(&self, call: CallId, method: MethodRef, header: &[u8]) -> Result<Payload, CallError> {
        match ResponseHeader::decode(header)? {
            ResponseHeader::Structured => {
                let value = self.retry("fetch_structured", call, || self.channel.fetch_structured(call, 0)).await?;
                Ok(Payload::Structured(value))
            }
            ResponseHeader::Complete(body) => open_outcome(method, body),
            ResponseHeader::Incomplete { total_len, first_block } => {
                let mut assembler = BlockAssembler::new(total_len, self.config.block_size);
                assembler.insert(0, first_block)?;
                for index in 1..assembler.block_count() {
                    let index = index as u32;
                    let block = self.retry("fetch_block", call, || self.channel.fetch_block(call, index)).await?;
                    assembler.insert(index as usize, &block)?;
                }
                tracing::trace!(%call, blocks = assembler.block_count(), total_len, "response reassembled");
                open_outcome(method, &assembler.finish()?)
            }
        }
    }

    /// Repeats `attempt` while the channel reports saturation.
    async fn retry<T, F, Fut>(&self, operation: &'static str, call: CallId, mut attempt: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(ChannelError::TooLarge) if attempts < self.config.max_attempts => {
                    tracing::debug!(%call, operation, attempts, "channel saturated, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(ChannelError::TooLarge) => {
                    tracing::warn!(%call, operation, attempts, "channel saturated, giving up");
                    return Err(Unreachable::Saturated { operation, attempts }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// A remote failure arrives fully read and a lost channel has nothing left to
/// clean. Anything else may strand staged blocks on the remote side.
fn leaves_remote_state(error: &CallError) -> bool {
    !matches!(error, CallError::Remote { .. }) && !error.is_channel_lost()
}

fn open_outcome(method: MethodRef, body: &[u8]) -> Result<Payload, CallError> {
    match Outcome::from_bytes(body)? {
        Outcome::Value(bytes) => Ok(Payload::Flat(Bytes::from(bytes))),
        Outcome::Failure(source) => Err(CallError::Remote { method, source }),
    }
}
