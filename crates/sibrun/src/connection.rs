//! # Connection Actor
//!
//! One task per target owns every piece of mutable connection state: the holder
//! set, the bind state, the queue of parked calls and the backoff. Everything
//! else talks to it through [`Command`]s, including its own timers and the
//! tasks it spawns, so there is never a lock around connection state.
//!
//! ## States
//! ```text
//! Unbound --try_bind--> Binding --ok--> Bound
//!    ^                     |              |
//!    +----- failure -------+              |
//!    +------ idle timeout / lost ---------+
//! ```
//!
//! ## Invariants
//! - A bind is attempted only while reachable, authorized, holders are present
//!   and no other attempt or backoff is pending.
//! - Queued calls are dispatched one at a time and only while Bound.
//! - A bound channel with no holders lives for the idle timeout, never less.
//! - Timer and task messages carry the generation they were issued for; stale
//!   ones are ignored.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use sibrpc::CallError;
use sibrpc::CallSender;
use sibrpc::Channel;
use sibrpc::Misuse;
use sibrpc::Payload;
use sibrpc::Unreachable;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::config::ConnectorConfig;
use crate::error::BindError;
use crate::holders::HolderSet;
use crate::ids::Holder;
use crate::ids::Target;
use crate::platform::Platform;
use crate::queue::CallQueue;
use crate::queue::PendingCall;

pub(crate) type Listener = Arc<dyn Fn(bool) + Send + Sync>;

pub(crate) enum Command {
    AddHolder(Holder),
    RemoveHolder(Holder),
    AddAlias { key: Holder, value: Holder },
    Enqueue(PendingCall),
    /// Replies once Bound, or once the bind attempt gives up.
    AwaitBound(oneshot::Sender<Result<(), CallError>>),
    /// Replies with the bound channel for a call on the caller's task.
    Channel(oneshot::Sender<Result<Arc<dyn Channel>, CallError>>),
    AvailabilityChanged,
    ListenConnection(Listener),
    ListenAvailability(Listener),
    Shutdown,

    BindFinished { attempt: u64, result: Result<Arc<dyn Channel>, BindError> },
    RetryBind { generation: u64 },
    IdleExpired { generation: u64 },
    ChannelLost { generation: u64 },
    CallFinished { generation: u64, result: Result<Payload, CallError> },
}

/// Cheap handle to a running connection actor.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
    available: watch::Receiver<bool>,
}

impl ConnectionHandle {
    pub fn spawn(target: Target, platform: Arc<dyn Platform>, config: ConnectorConfig, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);
        let (available_tx, available) = watch::channel(platform.is_available(&target));
        let actor = ConnectionActor {
            retry_delay: config.initial_bind_retry_delay,
            target,
            platform,
            config,
            tx: tx.downgrade(),
            holders: HolderSet::default(),
            queue: CallQueue::default(),
            in_flight: None,
            gates: Vec::new(),
            state: BindState::Unbound,
            attempts: 0,
            generation: 0,
            retry_generation: 0,
            retry_pending: false,
            idle_generation: 0,
            connected: connected_tx,
            available: available_tx,
            connection_listeners: Vec::new(),
            availability_listeners: Vec::new(),
        };
        runtime.spawn(actor.run(rx));
        Self { tx, connected, available }
    }

    /// Hands the command back if the actor has stopped.
    pub fn send(&self, command: Command) -> Result<(), Command> {
        self.tx.send(command).map_err(|e| e.0)
    }

    pub async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).map_err(|_| Unreachable::Shutdown)?;
        rx.await.map_err(|_| Unreachable::Shutdown)?
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn watch_available(&self) -> watch::Receiver<bool> {
        self.available.clone()
    }
}

enum BindState {
    Unbound,
    Binding {
        attempt: u64,
    },
    Bound {
        channel: Arc<dyn Channel>,
        generation: u64,
        /// Dropping this stops the task watching for channel loss.
        _loss_watch: oneshot::Sender<()>,
    },
}

struct ConnectionActor {
    target: Target,
    platform: Arc<dyn Platform>,
    config: ConnectorConfig,
    tx: mpsc::WeakUnboundedSender<Command>,

    holders: HolderSet,
    queue: CallQueue,
    in_flight: Option<PendingCall>,
    gates: Vec<oneshot::Sender<Result<(), CallError>>>,

    state: BindState,
    attempts: u64,
    generation: u64,
    retry_generation: u64,
    retry_pending: bool,
    retry_delay: Duration,
    idle_generation: u64,

    connected: watch::Sender<bool>,
    available: watch::Sender<bool>,
    connection_listeners: Vec<Listener>,
    availability_listeners: Vec<Listener>,
}

impl ConnectionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(remote = %self.target, "connection actor started");
        while let Some(command) = rx.recv().await {
            if self.handle(command).is_break() {
                break;
            }
        }
        self.stop(&mut rx);
        tracing::debug!(remote = %self.target, "connection actor stopped");
    }

    fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::AddHolder(holder) => self.add_holder(holder),
            Command::RemoveHolder(holder) => self.remove_holder(holder),
            Command::AddAlias { key, value } => self.holders.add_alias(key, value),
            Command::Enqueue(call) => self.enqueue(call),
            Command::AwaitBound(gate) => self.await_bound(gate),
            Command::Channel(reply) => {
                let _ = reply.send(self.channel_for_call());
            }
            Command::AvailabilityChanged => self.on_availability_changed(),
            Command::ListenConnection(listener) => self.connection_listeners.push(listener),
            Command::ListenAvailability(listener) => self.availability_listeners.push(listener),
            Command::Shutdown => return ControlFlow::Break(()),
            Command::BindFinished { attempt, result } => self.on_bind_finished(attempt, result),
            Command::RetryBind { generation } => self.on_retry(generation),
            Command::IdleExpired { generation } => self.on_idle_expired(generation),
            Command::ChannelLost { generation } => self.on_channel_lost(generation),
            Command::CallFinished { generation, result } => self.on_call_finished(generation, result),
        }
        ControlFlow::Continue(())
    }

    // ------------------------------------------------------------------
    //  Holders
    // ------------------------------------------------------------------

    fn add_holder(&mut self, holder: Holder) {
        self.holders.insert(holder);
        self.idle_generation += 1;
        self.try_bind();
    }

    fn remove_holder(&mut self, holder: Holder) {
        let removed = self.holders.remove(holder);
        if removed.is_empty() {
            return;
        }
        tracing::trace!(remote = %self.target, removed = removed.len(), remaining = self.holders.len(), "holders released");
        if self.holders.is_empty() && self.bound_generation().is_some() {
            self.schedule_idle();
        }
    }

    fn schedule_idle(&mut self) {
        self.idle_generation += 1;
        tracing::debug!(remote = %self.target, timeout = ?self.config.idle_timeout, "no holders left, idling");
        self.schedule(self.config.idle_timeout, Command::IdleExpired { generation: self.idle_generation });
    }

    fn on_idle_expired(&mut self, generation: u64) {
        if generation != self.idle_generation || !self.holders.is_empty() {
            return;
        }
        tracing::info!(remote = %self.target, "idle timeout reached");
        self.unbind();
    }

    // ------------------------------------------------------------------
    //  Binding
    // ------------------------------------------------------------------

    fn try_bind(&mut self) {
        if !matches!(self.state, BindState::Unbound) || self.retry_pending || self.holders.is_empty() {
            return;
        }
        if !self.refresh_availability() {
            tracing::info!(remote = %self.target, "target not available, not binding");
            self.fail_waiting(Unreachable::NotAvailable);
            return;
        }

        self.attempts += 1;
        let attempt = self.attempts;
        self.state = BindState::Binding { attempt };
        tracing::info!(remote = %self.target, attempt, "binding");

        let platform = self.platform.clone();
        let target = self.target.clone();
        let timeout = self.config.bind_timeout;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, platform.bind(&target)).await {
                Ok(result) => result,
                Err(_) => Err(BindError::Retryable(format!("no channel within {timeout:?}"))),
            };
            notify(&tx, Command::BindFinished { attempt, result });
        });
    }

    fn on_bind_finished(&mut self, attempt: u64, result: Result<Arc<dyn Channel>, BindError>) {
        let current = matches!(self.state, BindState::Binding { attempt: a } if a == attempt);
        if !current {
            if result.is_ok() {
                tracing::debug!(remote = %self.target, attempt, "releasing channel from abandoned bind");
                self.platform.release(&self.target);
            }
            return;
        }
        self.state = BindState::Unbound;

        match result {
            Ok(channel) => self.on_connected(channel),
            Err(BindError::Terminal(reason)) => {
                tracing::warn!(remote = %self.target, attempt, %reason, "bind refused, not retrying");
                self.fail_waiting(Unreachable::BindFailed(reason));
            }
            Err(BindError::Retryable(reason)) => {
                tracing::warn!(remote = %self.target, attempt, %reason, "bind failed");
                self.release_gates(Err(Unreachable::BindFailed(reason)));
                if !self.holders.is_empty() {
                    self.schedule_retry();
                }
            }
        }
    }

    fn on_connected(&mut self, channel: Arc<dyn Channel>) {
        if self.holders.is_empty() {
            tracing::info!(remote = %self.target, "bound after every holder left, releasing");
            drop(channel);
            self.platform.release(&self.target);
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let (loss_watch, cancelled) = oneshot::channel::<()>();
        let watched = channel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watched.closed() => notify(&tx, Command::ChannelLost { generation }),
                _ = cancelled => {}
            }
        });

        self.state = BindState::Bound { channel, generation, _loss_watch: loss_watch };
        self.retry_delay = self.config.initial_bind_retry_delay;
        tracing::info!(remote = %self.target, generation, "bound");
        self.set_connected(true);
        self.release_gates(Ok(()));
        self.drain();
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry_delay;
        self.retry_delay = delay.saturating_mul(2).min(self.config.max_bind_retry_delay);
        self.retry_generation += 1;
        self.retry_pending = true;
        tracing::info!(remote = %self.target, delay_ms = delay.as_millis() as u64, "retrying bind after backoff");
        self.schedule(delay, Command::RetryBind { generation: self.retry_generation });
    }

    fn on_retry(&mut self, generation: u64) {
        if generation != self.retry_generation || !self.retry_pending {
            return;
        }
        self.retry_pending = false;
        self.try_bind();
    }

    fn cancel_retry(&mut self) {
        self.retry_generation += 1;
        self.retry_pending = false;
    }

    fn unbind(&mut self) {
        if let BindState::Bound { generation, .. } = std::mem::replace(&mut self.state, BindState::Unbound) {
            tracing::info!(remote = %self.target, generation, "unbinding");
            self.platform.release(&self.target);
        }
        self.set_connected(false);
    }

    fn on_channel_lost(&mut self, generation: u64) {
        if self.bound_generation() != Some(generation) {
            return;
        }
        self.drop_lost_channel();
        self.try_bind();
    }

    fn drop_lost_channel(&mut self) {
        tracing::warn!(remote = %self.target, "connection lost");
        self.unbind();
        self.fail_queue(Unreachable::ChannelLost);
        self.announce_availability();
    }

    fn on_availability_changed(&mut self) {
        let available = self.refresh_availability();
        tracing::debug!(remote = %self.target, available, "availability changed");
        if available {
            if self.retry_pending {
                self.cancel_retry();
                self.retry_delay = self.config.initial_bind_retry_delay;
            }
            self.try_bind();
        } else if matches!(self.state, BindState::Unbound) {
            self.cancel_retry();
            self.fail_waiting(Unreachable::NotAvailable);
        }
    }

    fn bound_generation(&self) -> Option<u64> {
        match &self.state {
            BindState::Bound { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------

    fn enqueue(&mut self, call: PendingCall) {
        let holder = call.holder;
        tracing::debug!(remote = %self.target, method = %call.method, queued = self.queue.len() + 1, "call queued");
        self.queue.push_back(call);
        self.add_holder(holder);
        self.drain();
    }

    fn await_bound(&mut self, gate: oneshot::Sender<Result<(), CallError>>) {
        if self.bound_generation().is_some() {
            let _ = gate.send(Ok(()));
            return;
        }
        self.gates.push(gate);
        self.try_bind();
    }

    fn channel_for_call(&self) -> Result<Arc<dyn Channel>, CallError> {
        if self.holders.is_empty() {
            return Err(Misuse::NoConnectionHolder.into());
        }
        match &self.state {
            BindState::Bound { channel, .. } => Ok(channel.clone()),
            _ => Err(Unreachable::NotConnected.into()),
        }
    }

    /// Dispatches the head of the queue if nothing is in flight.
    fn drain(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let BindState::Bound { channel, generation, .. } = &self.state else {
            return;
        };
        let Some(call) = self.queue.pop_front() else {
            return;
        };

        let sender = CallSender::new(channel.clone(), self.config.transport.clone());
        let generation = *generation;
        let method = call.method;
        let payload = call.payload.clone();
        tracing::debug!(remote = %self.target, %method, remaining = self.queue.len(), "dispatching queued call");
        self.in_flight = Some(call);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = sender.call(method, payload).await;
            notify(&tx, Command::CallFinished { generation, result });
        });
    }

    fn on_call_finished(&mut self, generation: u64, result: Result<Payload, CallError>) {
        let Some(call) = self.in_flight.take() else {
            return;
        };
        if result.as_ref().is_err_and(CallError::is_channel_lost) {
            tracing::info!(remote = %self.target, method = %call.method, "channel lost mid-call, requeueing");
            if self.bound_generation() == Some(generation) {
                self.drop_lost_channel();
            }
            self.queue.push_front(call);
            self.try_bind();
            self.drain();
            return;
        }
        let holder = call.complete(result);
        self.remove_holder(holder);
        self.drain();
    }

    fn fail_queue(&mut self, reason: Unreachable) {
        if self.queue.is_empty() {
            return;
        }
        tracing::warn!(remote = %self.target, count = self.queue.len(), %reason, "failing queued calls");
        for call in self.queue.take_all() {
            let holder = call.complete(Err(reason.clone().into()));
            self.remove_holder(holder);
        }
    }

    fn release_gates(&mut self, result: Result<(), Unreachable>) {
        for gate in self.gates.drain(..) {
            let _ = gate.send(result.clone().map_err(CallError::from));
        }
    }

    fn fail_waiting(&mut self, reason: Unreachable) {
        self.release_gates(Err(reason.clone()));
        self.fail_queue(reason);
    }

    // ------------------------------------------------------------------
    //  Announcements
    // ------------------------------------------------------------------

    fn refresh_availability(&mut self) -> bool {
        let available = self.platform.is_available(&self.target);
        let changed = self.available.send_if_modified(|current| {
            let changed = *current != available;
            *current = available;
            changed
        });
        if changed {
            for listener in &self.availability_listeners {
                listener(available);
            }
        }
        available
    }

    /// Publishes current availability even when it has not changed.
    fn announce_availability(&mut self) {
        let available = self.platform.is_available(&self.target);
        self.available.send_replace(available);
        for listener in &self.availability_listeners {
            listener(available);
        }
    }

    fn set_connected(&mut self, connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed {
            tracing::debug!(remote = %self.target, connected, "connection state changed");
            for listener in &self.connection_listeners {
                listener(connected);
            }
        }
    }

    // ------------------------------------------------------------------
    //  Plumbing
    // ------------------------------------------------------------------

    fn schedule(&self, delay: Duration, command: Command) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notify(&tx, command);
        });
    }

    fn stop(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) {
        rx.close();
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Enqueue(call) => {
                    call.complete(Err(Unreachable::Shutdown.into()));
                }
                Command::AwaitBound(gate) => {
                    let _ = gate.send(Err(Unreachable::Shutdown.into()));
                }
                Command::Channel(reply) => {
                    let _ = reply.send(Err(Unreachable::Shutdown.into()));
                }
                Command::CallFinished { result, .. } => {
                    if let Some(call) = self.in_flight.take() {
                        call.complete(result);
                    }
                }
                _ => {}
            }
        }
        if let Some(call) = self.in_flight.take() {
            call.complete(Err(Unreachable::Shutdown.into()));
        }
        self.cancel_retry();
        self.fail_waiting(Unreachable::Shutdown);
        self.unbind();
    }
}

fn notify(tx: &mpsc::WeakUnboundedSender<Command>, command: Command) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(command);
    }
}
