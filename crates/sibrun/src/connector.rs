//! # Connector
//!
//! The public face of the crate. A [`Connector`] keeps one connection actor per
//! target, spawned on first use, and offers every way of calling through it:
//!
//! - [`Connector::call`] on the caller's task, requiring a held connection.
//! - [`Connector::call_async`], which queues until bound and binds on demand.
//! - [`Connector::call_blocking`] and [`Connector::connect_blocking`] for
//!   threads outside the runtime.
//! - [`Connector::call_all`] to fan one call out and merge the results.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use sibrpc::CallError;
use sibrpc::CallSender;
use sibrpc::CallSink;
use sibrpc::MethodRef;
use sibrpc::Misuse;
use sibrpc::Payload;
use sibrpc::Unreachable;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::ConnectorConfig;
use crate::connection::Command;
use crate::connection::ConnectionHandle;
use crate::error::BuildError;
use crate::ids::Holder;
use crate::ids::Target;
use crate::merger::ResultMerger;
use crate::platform::Platform;
use crate::queue::PendingCall;

pub struct ConnectorBuilder {
    platform: Arc<dyn Platform>,
    config: ConnectorConfig,
    runtime: Option<Handle>,
}

impl ConnectorBuilder {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform, config: ConnectorConfig::default(), runtime: None }
    }

    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime the connection actors run on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Connector, BuildError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        Ok(Connector {
            inner: Arc::new(Inner {
                platform: self.platform,
                config: self.config,
                runtime,
                connections: DashMap::new(),
            }),
        })
    }
}

#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    platform: Arc<dyn Platform>,
    config: ConnectorConfig,
    runtime: Handle,
    connections: DashMap<Target, ConnectionHandle>,
}

/// Keeps a holder registered until dropped.
#[must_use = "the holder is released as soon as the guard is dropped"]
pub struct HolderGuard {
    holder: Holder,
    connection: Option<ConnectionHandle>,
}

impl HolderGuard {
    pub fn holder(&self) -> Holder {
        self.holder
    }
}

impl Drop for HolderGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.send(Command::RemoveHolder(self.holder));
        }
    }
}

impl Connector {
    pub fn builder(platform: Arc<dyn Platform>) -> ConnectorBuilder {
        ConnectorBuilder::new(platform)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    fn connection(&self, target: &Target) -> ConnectionHandle {
        if let Some(existing) = self.inner.connections.get(target) {
            return existing.value().clone();
        }
        self.inner
            .connections
            .entry(target.clone())
            .or_insert_with(|| {
                tracing::debug!(remote = %target, "spawning connection");
                ConnectionHandle::spawn(
                    target.clone(),
                    self.inner.platform.clone(),
                    self.inner.config.clone(),
                    &self.inner.runtime,
                )
            })
            .value()
            .clone()
    }

    fn existing(&self, target: &Target) -> Option<ConnectionHandle> {
        self.inner.connections.get(target).map(|c| c.value().clone())
    }

    // ------------------------------------------------------------------
    //  Holders
    // ------------------------------------------------------------------

    /// Registers `holder` for `target`, binding if this is the first one.
    pub fn add_connection_holder(&self, target: &Target, holder: Holder) -> HolderGuard {
        let connection = self.connection(target);
        let _ = connection.send(Command::AddHolder(holder));
        HolderGuard { holder, connection: Some(connection) }
    }

    pub fn remove_connection_holder(&self, target: &Target, holder: Holder) {
        if let Some(connection) = self.existing(target) {
            let _ = connection.send(Command::RemoveHolder(holder));
        }
    }

    /// Removing `key` later also removes `value`.
    pub fn add_connection_holder_alias(&self, target: &Target, key: Holder, value: Holder) {
        let _ = self.connection(target).send(Command::AddAlias { key, value });
    }

    /// Holds the connection and waits until it is bound, or until the bind
    /// attempt in progress gives up. The actor's bind timeout bounds the wait.
    #[tracing::instrument(level = "debug", skip_all, fields(remote = %target))]
    pub async fn connect(&self, target: &Target) -> Result<HolderGuard, CallError> {
        let guard = self.add_connection_holder(target, Holder::new());
        self.connection(target).request(Command::AwaitBound).await?;
        Ok(guard)
    }

    /// [`Connector::connect`] for threads outside the runtime.
    pub fn connect_blocking(&self, target: &Target) -> Result<HolderGuard, CallError> {
        ensure_blocking_allowed()?;
        self.inner.runtime.block_on(self.connect(target))
    }

    // ------------------------------------------------------------------
    //  State
    // ------------------------------------------------------------------

    pub fn is_available(&self, target: &Target) -> bool {
        self.inner.platform.is_available(target)
    }

    pub fn is_connected(&self, target: &Target) -> bool {
        self.existing(target).is_some_and(|c| c.is_connected())
    }

    pub fn watch_connection(&self, target: &Target) -> watch::Receiver<bool> {
        self.connection(target).watch_connected()
    }

    pub fn watch_availability(&self, target: &Target) -> watch::Receiver<bool> {
        self.connection(target).watch_available()
    }

    /// `listener` runs on every connected/disconnected edge.
    pub fn add_connection_listener(&self, target: &Target, listener: impl Fn(bool) + Send + Sync + 'static) {
        let _ = self.connection(target).send(Command::ListenConnection(Arc::new(listener)));
    }

    /// `listener` runs on every availability edge and when availability is
    /// re-announced after a lost connection.
    pub fn add_availability_listener(&self, target: &Target, listener: impl Fn(bool) + Send + Sync + 'static) {
        let _ = self.connection(target).send(Command::ListenAvailability(Arc::new(listener)));
    }

    /// Tells the connector the platform's view of `target` may have changed.
    pub fn notify_availability_changed(&self, target: &Target) {
        if let Some(connection) = self.existing(target) {
            let _ = connection.send(Command::AvailabilityChanged);
        }
    }

    // ------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------

    /// Calls on the current task. The target must already be held and bound.
    #[tracing::instrument(level = "debug", skip_all, fields(remote = %target, %method))]
    pub async fn call(&self, target: &Target, method: MethodRef, payload: Payload) -> Result<Payload, CallError> {
        let channel = self.connection(target).request(Command::Channel).await?;
        CallSender::new(channel, self.inner.config.transport.clone()).call(method, payload).await
    }

    pub fn call_blocking(&self, target: &Target, method: MethodRef, payload: Payload) -> Result<Payload, CallError> {
        ensure_blocking_allowed()?;
        self.inner.runtime.block_on(self.call(target, method, payload))
    }

    /// Queues a call, binding on demand. `sink` gets exactly one result.
    pub fn call_async(&self, target: &Target, method: MethodRef, payload: Payload, sink: impl CallSink) {
        let call = PendingCall::new(method, payload, Box::new(sink));
        if let Err(Command::Enqueue(call)) = self.connection(target).send(Command::Enqueue(call)) {
            call.complete(Err(Unreachable::Shutdown.into()));
        }
    }

    /// Sends the same call to every target and hands `listener` the values that
    /// came back. Targets that failed are left out of the map.
    pub fn call_all<F>(&self, targets: impl IntoIterator<Item = Target>, method: MethodRef, payload: Payload, listener: F)
    where
        F: FnOnce(HashMap<Target, Payload>) + Send + 'static,
    {
        let targets: HashSet<Target> = targets.into_iter().collect();
        let merger = Arc::new(ResultMerger::new(targets.len(), listener));
        for target in targets {
            let merger = merger.clone();
            let key = target.clone();
            self.call_async(&target, method, payload.clone(), move |result: Result<Payload, CallError>| match result {
                Ok(value) => merger.report(key, value),
                Err(error) => {
                    tracing::debug!(remote = %key, %error, "no result from target");
                    merger.report_missing(key);
                }
            });
        }
    }

    // ------------------------------------------------------------------
    //  Lifecycle
    // ------------------------------------------------------------------

    /// Stops the actor for `target`, failing everything it still holds.
    pub fn shutdown(&self, target: &Target) {
        if let Some((_, connection)) = self.inner.connections.remove(target) {
            let _ = connection.send(Command::Shutdown);
        }
    }

    pub fn shutdown_all(&self) {
        let targets: Vec<Target> = self.inner.connections.iter().map(|entry| entry.key().clone()).collect();
        for target in targets {
            self.shutdown(&target);
        }
    }
}

fn ensure_blocking_allowed() -> Result<(), CallError> {
    if Handle::try_current().is_ok() {
        tracing::error!("blocking connector call from a runtime thread");
        return Err(Misuse::BlockingInRuntime.into());
    }
    Ok(())
}
