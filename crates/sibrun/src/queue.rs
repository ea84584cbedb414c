//! Calls waiting for a bound channel, in arrival order.

use std::collections::VecDeque;
use std::fmt;

use sibrpc::CallError;
use sibrpc::CallSink;
use sibrpc::MethodRef;
use sibrpc::Payload;

use crate::ids::Holder;

/// A call parked until the connection is bound.
///
/// The `holder` keeps the connection alive from enqueue until the sink fires.
pub(crate) struct PendingCall {
    pub method: MethodRef,
    pub payload: Payload,
    pub holder: Holder,
    sink: Box<dyn CallSink>,
}

impl PendingCall {
    pub fn new(method: MethodRef, payload: Payload, sink: Box<dyn CallSink>) -> Self {
        Self { method, payload, holder: Holder::new(), sink }
    }

    /// Delivers the result and hands back the holder to release.
    pub fn complete(self, result: Result<Payload, CallError>) -> Holder {
        self.sink.complete(result);
        self.holder
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("method", &self.method)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CallQueue {
    calls: VecDeque<PendingCall>,
}

impl CallQueue {
    pub fn push_back(&mut self, call: PendingCall) {
        self.calls.push_back(call);
    }

    /// Puts an interrupted call back at the head of the line.
    pub fn push_front(&mut self, call: PendingCall) {
        self.calls.push_front(call);
    }

    pub fn pop_front(&mut self) -> Option<PendingCall> {
        self.calls.pop_front()
    }

    pub fn take_all(&mut self) -> Vec<PendingCall> {
        self.calls.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
