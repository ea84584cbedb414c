use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use anyhow::Context;
use parking_lot::Mutex;
use sibwire::FailureKind;
use sibwire::RemoteFailure;

use crate::*;

// ============================================================================
//  FIXTURES
// ============================================================================

const ECHO: MethodRef = MethodRef::new(0xe0, 1);
const REPEAT: MethodRef = MethodRef::new(0xe0, 2);
const COUNT: MethodRef = MethodRef::new(0xe0, 3);
const FAIL: MethodRef = MethodRef::new(0xe0, 4);

struct TestHandler;

#[async_trait::async_trait]
impl Handler for TestHandler {
    async fn handle(&self, method: MethodRef, payload: Payload) -> anyhow::Result<Payload> {
        match method {
            ECHO => Ok(payload),
            REPEAT => {
                let bytes = payload.as_flat().context("expected flat bytes")?;
                let len = u32::from_be_bytes(bytes[..4].try_into()?) as usize;
                Ok(Payload::from(vec![7u8; len]))
            }
            COUNT => {
                let words = payload.downcast_ref::<Vec<String>>().context("expected a word list")?;
                Ok(Payload::structured(words.len()))
            }
            FAIL => Err::<Payload, _>(anyhow::anyhow!("disk on fire"))
                .context("reading row 7")
                .context("loading profile"),
            other => Err(UnknownMethod(other).into()),
        }
    }
}

/// Wraps a loopback channel, counting primitives and injecting saturation.
struct CountingChannel {
    inner: LoopbackChannel,
    calls: Mutex<HashMap<&'static str, usize>>,
    saturate_op: &'static str,
    saturate_remaining: AtomicU32,
}

impl CountingChannel {
    fn new(config: &TransportConfig) -> Arc<Self> {
        Self::saturating(config, "", 0)
    }

    fn saturating(config: &TransportConfig, op: &'static str, times: u32) -> Arc<Self> {
        let endpoint = Arc::new(ServiceEndpoint::new(Arc::new(TestHandler), config));
        Arc::new(Self {
            inner: LoopbackChannel::new(endpoint),
            calls: Mutex::new(HashMap::new()),
            saturate_op: op,
            saturate_remaining: AtomicU32::new(times),
        })
    }

    fn count(&self, op: &'static str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> channel::Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        if op == self.saturate_op {
            let left = self.saturate_remaining.load(Ordering::SeqCst);
            if left > 0 {
                self.saturate_remaining.store(left - 1, Ordering::SeqCst);
                return Err(ChannelError::TooLarge);
            }
        }
        Ok(())
    }

    fn open_sessions(&self) -> usize {
        self.inner.endpoint().receiver().open_sessions()
    }
}

#[async_trait::async_trait]
impl Channel for CountingChannel {
    async fn prepare_block(&self, call: CallId, block_index: u32, total_bytes: u32, block: &[u8]) -> channel::Result<()> {
        self.enter("prepare_block")?;
        self.inner.prepare_block(call, block_index, total_bytes, block).await
    }

    async fn prepare_structured(&self, call: CallId, aux_index: u32, value: StructuredValue) -> channel::Result<()> {
        self.enter("prepare_structured")?;
        self.inner.prepare_structured(call, aux_index, value).await
    }

    async fn execute(&self, call: CallId, block_index: u32, method: MethodRef, final_block: &[u8]) -> channel::Result<Vec<u8>> {
        self.enter("execute")?;
        self.inner.execute(call, block_index, method, final_block).await
    }

    async fn fetch_block(&self, call: CallId, block_index: u32) -> channel::Result<Vec<u8>> {
        self.enter("fetch_block")?;
        self.inner.fetch_block(call, block_index).await
    }

    async fn fetch_structured(&self, call: CallId, aux_index: u32) -> channel::Result<StructuredValue> {
        self.enter("fetch_structured")?;
        self.inner.fetch_structured(call, aux_index).await
    }

    async fn discard(&self, call: CallId) {
        *self.calls.lock().entry("discard").or_default() += 1;
        self.inner.discard(call).await
    }

    async fn closed(&self) {
        self.inner.closed().await
    }
}

fn sender(channel: &Arc<CountingChannel>, config: &TransportConfig) -> CallSender {
    CallSender::new(channel.clone(), config.clone())
}

// ============================================================================
//  SESSIONS
// ============================================================================

#[tokio::test]
async fn small_call_is_a_single_execute() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);

    let reply = sender(&channel, &config).call(ECHO, Payload::flat("hello")).await.unwrap();

    assert_eq!(reply.as_flat().unwrap().as_ref(), b"hello");
    assert_eq!(channel.count("prepare_block"), 0);
    assert_eq!(channel.count("execute"), 1);
    assert_eq!(channel.count("fetch_block"), 0);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test]
async fn large_request_is_prepared_in_blocks() {
    let config = TransportConfig::default().with_block_size(64);
    let channel = CountingChannel::new(&config);
    let body: Vec<u8> = (0..200u32).map(|i| i as u8).collect();

    let reply = sender(&channel, &config).call(ECHO, Payload::from(body.clone())).await.unwrap();

    // Tag byte plus 200 bytes is 201 bytes, four blocks of 64.
    assert_eq!(channel.count("prepare_block"), 3);
    assert_eq!(channel.count("execute"), 1);
    assert_eq!(reply.as_flat().unwrap().as_ref(), body.as_slice());
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test]
async fn response_of_two_and_a_half_blocks_needs_two_fetches() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);
    let len = sibwire::BLOCK_SIZE * 5 / 2;

    let reply = sender(&channel, &config)
        .call(REPEAT, Payload::from((len as u32).to_be_bytes().to_vec()))
        .await
        .unwrap();

    let bytes = reply.as_flat().unwrap();
    assert_eq!(bytes.len(), len);
    assert!(bytes.iter().all(|b| *b == 7));
    assert_eq!(channel.count("fetch_block"), 2);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test]
async fn structured_values_travel_out_of_band() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);
    let words = vec!["a".to_string(), "b".to_string(), "c".to_string()];

    let reply = sender(&channel, &config).call(COUNT, Payload::structured(words)).await.unwrap();

    assert_eq!(reply.downcast_ref::<usize>(), Some(&3));
    assert_eq!(channel.count("prepare_structured"), 1);
    assert_eq!(channel.count("fetch_structured"), 1);
    assert_eq!(channel.count("prepare_block"), 0);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test]
async fn call_into_completes_the_sink() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);
    let (tx, rx) = tokio::sync::oneshot::channel();

    sender(&channel, &config)
        .call_into(ECHO, Payload::flat("ping"), Box::new(move |result: Result<Payload, CallError>| {
            let _ = tx.send(result);
        }))
        .await;

    let reply = rx.await.unwrap().unwrap();
    assert_eq!(reply.as_flat().unwrap().as_ref(), b"ping");
}

#[test]
fn call_ids_are_non_negative() {
    for _ in 0..1_000 {
        assert!(CallId::random().0 <= i64::MAX as u64);
    }
}

// ============================================================================
//  SATURATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn saturation_is_retried_until_the_tenth_attempt() {
    let config = TransportConfig::default();
    let channel = CountingChannel::saturating(&config, "execute", 9);

    let reply = sender(&channel, &config).call(ECHO, Payload::flat("patience")).await.unwrap();

    assert_eq!(reply.as_flat().unwrap().as_ref(), b"patience");
    assert_eq!(channel.count("execute"), 10);
}

#[tokio::test(start_paused = true)]
async fn saturated_prepare_succeeds_on_the_tenth_attempt() {
    let config = TransportConfig::default().with_block_size(64);
    let channel = CountingChannel::saturating(&config, "prepare_block", 9);
    let body = vec![3u8; 500];

    let reply = sender(&channel, &config).call(ECHO, Payload::from(body.clone())).await.unwrap();

    // 501 bytes make eight blocks: seven prepares, the first of them tried ten times.
    assert_eq!(reply.as_flat().unwrap().as_ref(), body.as_slice());
    assert_eq!(channel.count("prepare_block"), 9 + 7);
    assert_eq!(channel.count("execute"), 1);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn saturated_fetch_block_is_retried() {
    let config = TransportConfig::default().with_block_size(64);
    let request = Payload::from(200u32.to_be_bytes().to_vec());

    let calm = CountingChannel::new(&config);
    sender(&calm, &config).call(REPEAT, request.clone()).await.unwrap();
    let fetches = calm.count("fetch_block");
    assert!(fetches > 0);

    let channel = CountingChannel::saturating(&config, "fetch_block", 9);
    let reply = sender(&channel, &config).call(REPEAT, request).await.unwrap();

    assert_eq!(reply.as_flat().unwrap().as_ref(), vec![7u8; 200].as_slice());
    assert_eq!(channel.count("fetch_block"), fetches + 9);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn saturated_fetch_structured_is_retried() {
    let config = TransportConfig::default();
    let channel = CountingChannel::saturating(&config, "fetch_structured", 9);

    let reply = sender(&channel, &config).call(COUNT, Payload::structured(vec!["x".to_string()])).await.unwrap();

    assert_eq!(reply.downcast_ref::<usize>(), Some(&1));
    assert_eq!(channel.count("fetch_structured"), 10);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_response_is_discarded() {
    let config = TransportConfig::default().with_block_size(64);
    let channel = CountingChannel::saturating(&config, "fetch_block", u32::MAX);

    let err = sender(&channel, &config)
        .call(REPEAT, Payload::from(200u32.to_be_bytes().to_vec()))
        .await
        .unwrap_err();

    match err {
        CallError::TargetUnreachable(Unreachable::Saturated { operation: "fetch_block", attempts: 10 }) => {}
        _ => panic!("Expected Saturated, got {:?}", err),
    }
    assert_eq!(channel.count("discard"), 1);
    assert_eq!(channel.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn persistent_saturation_reports_unreachable() {
    let config = TransportConfig::default();
    let channel = CountingChannel::saturating(&config, "prepare_block", u32::MAX);
    let config = config.with_block_size(64);

    let err = sender(&channel, &config).call(ECHO, Payload::from(vec![1u8; 500])).await.unwrap_err();

    match err {
        CallError::TargetUnreachable(Unreachable::Saturated { operation: "prepare_block", attempts: 10 }) => {}
        _ => panic!("Expected Saturated, got {:?}", err),
    }
    assert_eq!(channel.count("prepare_block"), 10);
    assert_eq!(channel.count("execute"), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_follows_config() {
    let config = TransportConfig::default().with_max_attempts(3);
    let channel = CountingChannel::saturating(&config, "execute", 3);

    let err = sender(&channel, &config).call(ECHO, Payload::flat("x")).await.unwrap_err();

    assert!(err.is_unreachable());
    assert_eq!(channel.count("execute"), 3);
}

// ============================================================================
//  FAILURES
// ============================================================================

#[tokio::test]
async fn remote_failure_keeps_its_cause_chain() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);

    let err = sender(&channel, &config).call(FAIL, Payload::flat("")).await.unwrap_err();

    let failure: &RemoteFailure = match &err {
        CallError::Remote { method, source } if *method == FAIL => source,
        _ => panic!("Expected Remote, got {:?}", err),
    };
    assert_eq!(failure.kind, FailureKind::Handler);
    assert_eq!(failure.chain().collect::<Vec<_>>(), vec!["loading profile", "reading row 7", "disk on fire"]);

    // The local error's source chain runs straight into the remote causes.
    let mut messages = Vec::new();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    assert_eq!(messages.len(), 3);
    assert!(messages[2].contains("disk on fire"));
}

#[tokio::test]
async fn unknown_method_is_classified() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);

    let err = sender(&channel, &config).call(MethodRef::new(0xe0, 99), Payload::flat("")).await.unwrap_err();

    match err {
        CallError::Remote { source: RemoteFailure { kind: FailureKind::UnknownMethod, .. }, .. } => {}
        _ => panic!("Expected UnknownMethod, got {:?}", err),
    }
}

#[tokio::test]
async fn handler_errors_on_wrong_payload_shape() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);

    let err = sender(&channel, &config).call(COUNT, Payload::flat("not a list")).await.unwrap_err();

    match err {
        CallError::Remote { ref source, .. } if source.message == "expected a word list" => {}
        _ => panic!("Expected Remote, got {:?}", err),
    }
}

#[tokio::test]
async fn closed_channel_is_a_lost_channel() {
    let config = TransportConfig::default();
    let channel = CountingChannel::new(&config);
    channel.inner.close();

    let err = sender(&channel, &config).call(ECHO, Payload::flat("anyone?")).await.unwrap_err();

    assert!(err.is_channel_lost(), "Expected ChannelLost, got {:?}", err);
    // closed() resolves once the channel is severed.
    tokio::time::timeout(std::time::Duration::from_secs(1), channel.closed()).await.unwrap();
}

// ============================================================================
//  RECEIVER
// ============================================================================

#[test]
fn receiver_rejects_blocks_for_a_different_total() {
    let receiver = CallReceiver::new(16);
    let call = CallId(7);
    receiver.prepare_block(call, 0, 40, &[0; 16]).unwrap();

    match receiver.prepare_block(call, 1, 50, &[0; 16]) {
        Err(ChannelError::Protocol(_)) => {}
        other => panic!("Expected Protocol, got {:?}", other),
    }
}

#[test]
fn receiver_unknown_sessions() {
    let receiver = CallReceiver::new(16);

    match receiver.take_request(CallId(1), 3, &[0; 4]) {
        Err(ChannelError::UnknownCall(CallId(1))) => {}
        other => panic!("Expected UnknownCall, got {:?}", other),
    }
    match receiver.fetch_block(CallId(2), 1) {
        Err(ChannelError::UnknownCall(CallId(2))) => {}
        other => panic!("Expected UnknownCall, got {:?}", other),
    }
    assert!(receiver.fetch_structured(CallId(3), 0).is_err());
}

#[test]
fn staged_response_is_dropped_after_last_fetch() {
    let receiver = CallReceiver::new(16);
    let call = CallId(11);

    let header = receiver.stage_response(call, Ok(Payload::from(vec![1u8; 40]))).unwrap();
    assert_eq!(header[0], sibwire::frame::TAG_INCOMPLETE);
    assert_eq!(receiver.open_sessions(), 1);

    // Body is 42 bytes with the envelope: blocks 1 and 2 remain.
    receiver.fetch_block(call, 1).unwrap();
    assert_eq!(receiver.open_sessions(), 1);
    receiver.fetch_block(call, 2).unwrap();
    assert_eq!(receiver.open_sessions(), 0);
}

#[test]
fn discard_drops_every_stage_of_a_call() {
    let receiver = CallReceiver::new(16);
    let (pending, answered) = (CallId(21), CallId(22));

    receiver.prepare_block(pending, 0, 40, &[0; 16]).unwrap();
    receiver.prepare_structured(pending, 0, StructuredValue::new(5u8));
    receiver.stage_response(answered, Ok(Payload::from(vec![1u8; 40]))).unwrap();
    receiver.stage_response(answered, Ok(Payload::structured(6u8))).unwrap();
    assert_eq!(receiver.open_sessions(), 4);

    receiver.discard(pending);
    assert_eq!(receiver.open_sessions(), 2);
    receiver.discard(answered);
    assert_eq!(receiver.open_sessions(), 0);
    receiver.discard(answered);
}
