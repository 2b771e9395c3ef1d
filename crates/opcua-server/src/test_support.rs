//! In-memory test doubles for the event loop and connection-manager contracts,
//! letting lifecycle/namespace/listener/reverse-connect behavior be exercised
//! deterministically without binding real sockets or sleeping real wall time.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opcua_core::{
    CallbackId, Clock, ConnectionEvent, ConnectionId, ConnectionManager, ConnectionParams,
    CycleMissPolicy, EventLoop, EventSource, EventSourceKind, EventSourceState, MonotonicTime,
    NetworkCallback, RunStatus, ServerError, SystemClock, TimedCallback,
};

enum CallbackKind {
    OneShot,
    Cyclic { interval: Duration, miss_policy: CycleMissPolicy },
}

struct FakeState {
    entries: HashMap<CallbackId, (MonotonicTime, CallbackKind)>,
    callbacks: HashMap<CallbackId, TimedCallback>,
    delayed: Vec<Box<dyn FnOnce() + Send>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self { entries: HashMap::new(), callbacks: HashMap::new(), delayed: Vec::new() }
    }
}

/// A single-pass event loop double: each `run` call processes whatever network
/// events, due timed/cyclic callbacks, and delayed callbacks are pending *right now*
/// (per the injected [`Clock`]) and returns without sleeping. Tests drive time by
/// advancing a [`opcua_core::ManualClock`] and calling `run` again, rather than
/// waiting on real timers — the same "tick on demand" posture as a hand-rolled
/// immediate executor.
pub struct FakeEventLoop {
    clock: Arc<dyn Clock>,
    handles: opcua_core::HandleAllocator,
    state: Mutex<FakeState>,
    network_queue: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    started: AtomicBool,
    stop_requested: AtomicBool,
    event_sources: Mutex<Vec<Arc<dyn EventSource>>>,
}

impl FakeEventLoop {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            handles: opcua_core::HandleAllocator::new(),
            state: Mutex::new(FakeState::default()),
            network_queue: Mutex::new(VecDeque::new()),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            event_sources: Mutex::new(Vec::new()),
        }
    }

    pub fn register_event_source(&self, source: Arc<dyn EventSource>) {
        self.event_sources.lock().unwrap().push(source);
    }

    pub fn enqueue_network_event(&self, thunk: Box<dyn FnOnce() + Send>) {
        self.network_queue.lock().unwrap().push_back(thunk);
    }

    pub fn pending_callback_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

impl Default for FakeEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventLoop for FakeEventLoop {
    async fn start(&self) -> Result<(), ServerError> {
        self.started.store(true, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    async fn run(&self, _timeout: Duration) -> Result<RunStatus, ServerError> {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Ok(RunStatus::Stopped);
        }

        let mut ran_any = false;

        let network_thunks: Vec<_> = self.network_queue.lock().unwrap().drain(..).collect();
        if !network_thunks.is_empty() {
            ran_any = true;
            for thunk in network_thunks {
                thunk();
            }
        }

        let now = self.clock.now();
        let due: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            let due_ids: Vec<CallbackId> = state
                .entries
                .iter()
                .filter(|(_, (deadline, _))| deadline.has_passed(now))
                .map(|(id, _)| *id)
                .collect();
            due_ids
                .into_iter()
                .map(|id| {
                    let (_, kind) = state.entries.remove(&id).unwrap();
                    let callback = state.callbacks.remove(&id).unwrap();
                    (id, callback, kind)
                })
                .collect()
        };
        if !due.is_empty() {
            ran_any = true;
            for (id, mut callback, kind) in due {
                callback(now);
                if let CallbackKind::Cyclic { interval, miss_policy } = kind {
                    let next_deadline = now.checked_add(interval).unwrap_or(now);
                    let mut state = self.state.lock().unwrap();
                    state.entries.insert(id, (next_deadline, CallbackKind::Cyclic { interval, miss_policy }));
                    state.callbacks.insert(id, callback);
                }
            }
        }

        let delayed: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.delayed)
        };
        if !delayed.is_empty() {
            ran_any = true;
            for callback in delayed {
                callback();
            }
        }

        if self.stop_requested.load(Ordering::SeqCst) {
            return Ok(RunStatus::Stopped);
        }
        Ok(if ran_any { RunStatus::Ran } else { RunStatus::TimedOut })
    }

    fn next_cyclic_deadline(&self) -> Option<MonotonicTime> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|(_, kind)| matches!(kind, CallbackKind::Cyclic { .. }))
            .map(|(deadline, _)| *deadline)
            .min()
    }

    fn add_timed_callback(&self, deadline: MonotonicTime, callback: TimedCallback) -> Result<CallbackId, ServerError> {
        let id = CallbackId::from_raw(self.handles.next());
        let mut state = self.state.lock().unwrap();
        state.entries.insert(id, (deadline, CallbackKind::OneShot));
        state.callbacks.insert(id, callback);
        Ok(id)
    }

    fn add_cyclic_callback(
        &self,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        miss_policy: CycleMissPolicy,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError> {
        let deadline = initial_deadline.unwrap_or_else(|| {
            self.clock.now().checked_add(interval).unwrap_or_else(|| self.clock.now())
        });
        let id = CallbackId::from_raw(self.handles.next());
        let mut state = self.state.lock().unwrap();
        state.entries.insert(id, (deadline, CallbackKind::Cyclic { interval, miss_policy }));
        state.callbacks.insert(id, callback);
        Ok(id)
    }

    fn modify_cyclic_callback(
        &self,
        id: CallbackId,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        miss_policy: CycleMissPolicy,
    ) -> Result<(), ServerError> {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&id) {
            return Err(ServerError::internal(format!("cannot modify unknown callback {id}")));
        }
        let deadline = initial_deadline.unwrap_or_else(|| {
            self.clock.now().checked_add(interval).unwrap_or_else(|| self.clock.now())
        });
        state.entries.insert(id, (deadline, CallbackKind::Cyclic { interval, miss_policy }));
        Ok(())
    }

    fn remove_callback(&self, id: CallbackId) {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&id);
        state.callbacks.remove(&id);
    }

    fn add_delayed_callback(&self, callback: Box<dyn FnOnce() + Send>) {
        self.state.lock().unwrap().delayed.push(callback);
    }

    fn event_sources(&self) -> Vec<Arc<dyn EventSource>> {
        self.event_sources.lock().unwrap().clone()
    }
}

/// What a [`FakeConnectionManager`] does when asked to open a connection.
pub enum FakeBehavior {
    /// Synchronously reports `Opened` with a freshly minted id.
    Succeed,
    /// Synchronously reports `Failed` with the given message.
    Fail(String),
}

/// An in-memory [`ConnectionManager`] double. `open_connection` runs its configured
/// [`FakeBehavior`] synchronously (no task spawn, no real socket) so listener
/// fan-out and reverse-connect tests can assert outcomes without an async runtime
/// driving background work.
pub struct FakeConnectionManager {
    protocol: &'static str,
    state: Mutex<EventSourceState>,
    behavior: Mutex<FakeBehavior>,
    handles: opcua_core::HandleAllocator,
    pub opened_params: Mutex<Vec<ConnectionParams>>,
    pub closed_ids: Mutex<Vec<ConnectionId>>,
}

impl FakeConnectionManager {
    pub fn new(protocol: &'static str, behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            state: Mutex::new(EventSourceState::Started),
            behavior: Mutex::new(behavior),
            handles: opcua_core::HandleAllocator::new(),
            opened_params: Mutex::new(Vec::new()),
            closed_ids: Mutex::new(Vec::new()),
        })
    }

    pub fn set_state(&self, state: EventSourceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

impl EventSource for FakeConnectionManager {
    fn event_source_type(&self) -> EventSourceKind {
        EventSourceKind::ConnectionManager
    }

    fn state(&self) -> EventSourceState {
        *self.state.lock().unwrap()
    }

    fn as_connection_manager(&self) -> Option<&dyn ConnectionManager> {
        Some(self)
    }
}

impl ConnectionManager for FakeConnectionManager {
    fn protocol(&self) -> &str {
        self.protocol
    }

    fn open_connection(
        &self,
        params: ConnectionParams,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) -> Result<(), ServerError> {
        self.opened_params.lock().unwrap().push(params);
        let event = match &*self.behavior.lock().unwrap() {
            FakeBehavior::Succeed => ConnectionEvent::Opened {
                connection_id: ConnectionId::from_raw(self.handles.next()),
                local_addr: None,
                peer_addr: None,
            },
            FakeBehavior::Fail(message) => ConnectionEvent::Failed { error: ServerError::internal(message.clone()) },
        };
        callback(user_context, event);
        Ok(())
    }

    fn close_connection(&self, id: ConnectionId) {
        self.closed_ids.lock().unwrap().push(id);
    }
}
