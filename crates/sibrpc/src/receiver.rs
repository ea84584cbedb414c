//! # Call Receiver
//!
//! Session bookkeeping on the remote side: staged request blocks waiting for
//! `execute`, and staged response blocks waiting to be fetched.
//!
//! ## Invariants
//! - A request session is consumed by `take_request` and never seen again.
//! - A flat response session is dropped once its last block has been fetched.
//! - A structured response is dropped once fetched.
//! - `discard` drops every trace of a call, whatever stage it reached.

use bytes::Bytes;
use dashmap::DashMap;
use sibwire::BlockAssembler;
use sibwire::Outcome;
use sibwire::RemoteFailure;
use sibwire::chunk;
use sibwire::frame;
use sibwire::frame::RequestKind;

use crate::channel::ChannelError;
use crate::channel::Result;
use crate::types::CallId;
use crate::types::Payload;
use crate::types::StructuredValue;

struct StagedResponse {
    body: Vec<u8>,
    blocks: usize,
}

pub struct CallReceiver {
    block_size: usize,
    requests: DashMap<CallId, BlockAssembler>,
    request_values: DashMap<(CallId, u32), StructuredValue>,
    responses: DashMap<CallId, StagedResponse>,
    response_values: DashMap<(CallId, u32), StructuredValue>,
}

impl CallReceiver {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            requests: DashMap::new(),
            request_values: DashMap::new(),
            responses: DashMap::new(),
            response_values: DashMap::new(),
        }
    }

    pub fn prepare_block(&self, call: CallId, block_index: u32, total_bytes: u32, block: &[u8]) -> Result<()> {
        let mut session = self
            .requests
            .entry(call)
            .or_insert_with(|| BlockAssembler::new(total_bytes as usize, self.block_size));
        if session.total_len() != total_bytes as usize {
            return Err(ChannelError::Protocol(format!(
                "{call} announced {total_bytes} bytes, session holds {}",
                session.total_len()
            )));
        }
        session.insert(block_index as usize, block).map_err(protocol)
    }

    pub fn prepare_structured(&self, call: CallId, aux_index: u32, value: StructuredValue) {
        self.request_values.insert((call, aux_index), value);
    }

    /// Completes and consumes the request of `call`.
    pub fn take_request(&self, call: CallId, block_index: u32, final_block: &[u8]) -> Result<Payload> {
        let stream = if block_index == 0 {
            self.requests.remove(&call);
            final_block.to_vec()
        } else {
            let (_, mut session) = self.requests.remove(&call).ok_or(ChannelError::UnknownCall(call))?;
            session.insert(block_index as usize, final_block).map_err(protocol)?;
            session.finish().map_err(protocol)?
        };
        let kind = frame::decode_request(&stream).map_err(protocol)?;
        match kind {
            RequestKind::Flat => Ok(Payload::Flat(Bytes::from(stream).slice(frame::REQUEST_HEADER_LEN..))),
            RequestKind::Structured => {
                let (_, value) = self.request_values.remove(&(call, 0)).ok_or(ChannelError::UnknownCall(call))?;
                Ok(Payload::Structured(value))
            }
        }
    }

    /// Stages the result of `call` and returns the response header.
    pub fn stage_response(&self, call: CallId, result: std::result::Result<Payload, RemoteFailure>) -> Result<Vec<u8>> {
        let outcome = match result {
            Ok(Payload::Structured(value)) => {
                self.response_values.insert((call, 0), value);
                return Ok(frame::encode_structured());
            }
            Ok(Payload::Flat(bytes)) => Outcome::Value(bytes.to_vec()),
            Err(failure) => Outcome::Failure(failure),
        };
        let body = outcome.to_bytes().map_err(protocol)?;
        if body.len() <= self.block_size {
            return Ok(frame::encode_complete(&body));
        }
        let header = frame::encode_incomplete(body.len(), &body[..self.block_size]).map_err(protocol)?;
        let blocks = chunk::block_count(body.len(), self.block_size);
        tracing::trace!(%call, blocks, "staged multi-block response");
        self.responses.insert(call, StagedResponse { body, blocks });
        Ok(header)
    }

    pub fn fetch_block(&self, call: CallId, block_index: u32) -> Result<Vec<u8>> {
        let index = block_index as usize;
        let (block, last) = {
            let staged = self.responses.get(&call).ok_or(ChannelError::UnknownCall(call))?;
            let block = chunk::block(&staged.body, index, self.block_size)
                .ok_or_else(|| ChannelError::Protocol(format!("{call} has no block {index}")))?
                .to_vec();
            (block, index + 1 == staged.blocks)
        };
        if last {
            self.responses.remove(&call);
        }
        Ok(block)
    }

    pub fn fetch_structured(&self, call: CallId, aux_index: u32) -> Result<StructuredValue> {
        self.response_values
            .remove(&(call, aux_index))
            .map(|(_, value)| value)
            .ok_or(ChannelError::UnknownCall(call))
    }

    pub fn discard(&self, call: CallId) {
        self.requests.remove(&call);
        self.responses.remove(&call);
        self.request_values.retain(|(id, _), _| *id != call);
        self.response_values.retain(|(id, _), _| *id != call);
    }

    /// Sessions still held, requests and responses together.
    pub fn open_sessions(&self) -> usize {
        self.requests.len() + self.request_values.len() + self.responses.len() + self.response_values.len()
    }
}

fn protocol(e: sibwire::Error) -> ChannelError {
    ChannelError::Protocol(e.to_string())
}
