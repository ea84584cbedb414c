use std::sync::Arc;

use sibrpc::CallSender;
use sibrpc::Handler;
use sibrpc::LoopbackChannel;
use sibrpc::MethodRef;
use sibrpc::Payload;
use sibrpc::ServiceEndpoint;
use sibrpc::TransportConfig;

const REVERSE: MethodRef = MethodRef::new(0x7e, 1);

struct Reverser;

#[async_trait::async_trait]
impl Handler for Reverser {
    async fn handle(&self, _method: MethodRef, payload: Payload) -> anyhow::Result<Payload> {
        tokio::task::yield_now().await;
        let mut bytes = payload.as_flat().map(|b| b.to_vec()).unwrap_or_default();
        bytes.reverse();
        Ok(Payload::from(bytes))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_multi_block_sessions_stay_separate() {
    let config = TransportConfig::default().with_block_size(32);
    let endpoint = Arc::new(ServiceEndpoint::new(Arc::new(Reverser), &config));
    let channel = Arc::new(LoopbackChannel::new(endpoint.clone()));
    let sender = CallSender::new(channel, config);

    let tasks: Vec<_> = (0..32u8)
        .map(|seed| {
            let sender = sender.clone();
            tokio::spawn(async move {
                let body: Vec<u8> = (0..(100 + seed as usize * 7)).map(|i| seed.wrapping_add(i as u8)).collect();
                let reply = sender.call(REVERSE, Payload::from(body.clone())).await.unwrap();
                let mut expected = body;
                expected.reverse();
                assert_eq!(reply.as_flat().unwrap().as_ref(), expected.as_slice());
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(endpoint.receiver().open_sessions(), 0);
}

#[tokio::test]
async fn empty_payload_round_trips() {
    let config = TransportConfig::default();
    let endpoint = Arc::new(ServiceEndpoint::new(Arc::new(Reverser), &config));
    let sender = CallSender::new(Arc::new(LoopbackChannel::new(endpoint)), config);

    let reply = sender.call(REVERSE, Payload::flat("")).await.unwrap();

    assert!(reply.as_flat().unwrap().is_empty());
}
