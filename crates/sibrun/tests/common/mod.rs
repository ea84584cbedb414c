#![allow(dead_code)]

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use sibrpc::Handler;
use sibrpc::LoopbackChannel;
use sibrpc::ServiceEndpoint;
use sibrpc::UnknownMethod;
use sibrun::BindError;
use sibrun::Channel;
use sibrun::Connector;
use sibrun::ConnectorConfig;
use sibrun::MethodRef;
use sibrun::Payload;
use sibrun::Platform;
use sibrun::Target;
use tokio::time::Instant;

pub const ECHO: MethodRef = MethodRef::new(0x51b, 1);
/// Severs the channel the first time it runs, echoes afterwards.
pub const FLAKY: MethodRef = MethodRef::new(0x51b, 2);

pub enum BindStep {
    Fail,
    Refuse,
    Hang,
    Delay(Duration),
}

type Channels = Arc<Mutex<Vec<Arc<LoopbackChannel>>>>;

pub struct TestHandler {
    channels: Channels,
    flaky_armed: AtomicBool,
    pub invocations: AtomicUsize,
}

#[async_trait::async_trait]
impl Handler for TestHandler {
    async fn handle(&self, method: MethodRef, payload: Payload) -> anyhow::Result<Payload> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match method {
            ECHO => Ok(payload),
            FLAKY => {
                if self.flaky_armed.swap(false, Ordering::SeqCst) {
                    if let Some(channel) = self.channels.lock().last() {
                        channel.close();
                    }
                }
                Ok(payload)
            }
            other => Err(UnknownMethod(other).into()),
        }
    }
}

pub struct TestPlatform {
    unavailable: Mutex<HashSet<Target>>,
    script: Mutex<VecDeque<BindStep>>,
    binds: Mutex<Vec<Instant>>,
    releases: AtomicUsize,
    channels: Channels,
    endpoint: Arc<ServiceEndpoint>,
    pub handler: Arc<TestHandler>,
}

impl TestPlatform {
    pub fn new(config: &ConnectorConfig) -> Arc<Self> {
        let channels: Channels = Default::default();
        let handler = Arc::new(TestHandler {
            channels: channels.clone(),
            flaky_armed: AtomicBool::new(true),
            invocations: AtomicUsize::new(0),
        });
        let endpoint = Arc::new(ServiceEndpoint::new(handler.clone(), &config.transport));
        Arc::new(Self {
            unavailable: Mutex::new(HashSet::new()),
            script: Mutex::new(VecDeque::new()),
            binds: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            channels,
            endpoint,
            handler,
        })
    }

    pub fn script(&self, steps: impl IntoIterator<Item = BindStep>) {
        self.script.lock().extend(steps);
    }

    pub fn set_available(&self, target: &Target, available: bool) {
        let mut unavailable = self.unavailable.lock();
        if available {
            unavailable.remove(target);
        } else {
            unavailable.insert(target.clone());
        }
    }

    pub fn bind_count(&self) -> usize {
        self.binds.lock().len()
    }

    pub fn bind_times(&self) -> Vec<Instant> {
        self.binds.lock().clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn latest_channel(&self) -> Option<Arc<LoopbackChannel>> {
        self.channels.lock().last().cloned()
    }

    fn open_channel(&self) -> Arc<dyn Channel> {
        let channel = Arc::new(LoopbackChannel::new(self.endpoint.clone()));
        self.channels.lock().push(channel.clone());
        channel
    }
}

#[async_trait::async_trait]
impl Platform for TestPlatform {
    fn is_reachable(&self, target: &Target) -> bool {
        !self.unavailable.lock().contains(target)
    }

    fn is_authorized(&self, _target: &Target) -> bool {
        true
    }

    async fn bind(&self, _target: &Target) -> Result<Arc<dyn Channel>, BindError> {
        self.binds.lock().push(Instant::now());
        let step = self.script.lock().pop_front();
        match step {
            Some(BindStep::Fail) => Err(BindError::Retryable("scripted failure".to_string())),
            Some(BindStep::Refuse) => Err(BindError::Terminal("scripted refusal".to_string())),
            Some(BindStep::Hang) => std::future::pending().await,
            Some(BindStep::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.open_channel())
            }
            None => Ok(self.open_channel()),
        }
    }

    fn release(&self, _target: &Target) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn setup(config: ConnectorConfig) -> (Arc<TestPlatform>, Connector) {
    sibrun::telemetry::init_for_tests();
    let platform = TestPlatform::new(&config);
    let connector = Connector::builder(platform.clone()).config(config).build().unwrap();
    (platform, connector)
}

pub fn millis_between(earlier: Instant, later: Instant) -> u128 {
    later.duration_since(earlier).as_millis()
}
