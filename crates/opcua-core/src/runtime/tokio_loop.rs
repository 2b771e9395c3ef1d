//! Default [`EventLoop`] implementation on top of Tokio.
//!
//! # Design (How)
//! - Timed/cyclic callbacks live in a `HashMap<CallbackId, CallbackEntry>` plus a
//!   min-heap index (`BinaryHeap` over `Reverse<(deadline, id)>`). Heap entries can go
//!   stale (the callback was removed or rescheduled); a pop is only acted on if its
//!   recorded deadline still matches the live entry, a standard lazy-deletion index.
//! - Network events do not call back directly from whatever Tokio task accepted them;
//!   a [`ConnectionManager`] implementation enqueues a thunk via
//!   [`TokioEventLoop::enqueue_network_event`] and the loop drains it on the same
//!   thread as timed callbacks inside `run`, preserving the "network callbacks
//!   serialize with timed callbacks" ordering.
//! - `run(timeout)` drains network events, then due timed/cyclic callbacks, then
//!   delayed callbacks (in that order, matching "delayed fires after the current
//!   iteration"), then either loops again or sleeps until the next deadline or the
//!   timeout, whichever is sooner. A [`tokio::sync::Notify`] wakes a sleeping pump
//!   early when new work is scheduled from another thread.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::ServerError;
use crate::ids::{CallbackId, HandleAllocator};
use crate::time::MonotonicTime;

use super::{CycleMissPolicy, EventSource, NetworkEventSink, RunStatus, TimedCallback};

enum CallbackKind {
    OneShot,
    Cyclic { interval: Duration, miss_policy: CycleMissPolicy },
}

struct CallbackEntry {
    deadline: MonotonicTime,
    kind: CallbackKind,
}

#[derive(PartialEq, Eq)]
struct HeapItem {
    deadline: MonotonicTime,
    id: CallbackId,
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse so `BinaryHeap` (a max-heap) pops the earliest deadline first.
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}

struct LoopState {
    entries: std::collections::HashMap<CallbackId, CallbackEntry>,
    callbacks: std::collections::HashMap<CallbackId, TimedCallback>,
    heap: BinaryHeap<HeapItem>,
    delayed: Vec<Box<dyn FnOnce() + Send>>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            entries: Default::default(),
            callbacks: Default::default(),
            heap: BinaryHeap::new(),
            delayed: Vec::new(),
        }
    }
}

/// The bundled Tokio-backed event loop. One instance is shared (by reference) between
/// the embedder that built the server configuration and the server itself, per the
/// ownership model: the event loop manages its own synchronization and is exempt from
/// the server's service mutex.
pub struct TokioEventLoop {
    handles: HandleAllocator,
    state: Mutex<LoopState>,
    network_queue: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    notify: Notify,
    started: AtomicBool,
    stop_requested: AtomicBool,
    event_sources: Mutex<Vec<Arc<dyn EventSource>>>,
}

impl Default for TokioEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioEventLoop {
    pub fn new() -> Self {
        Self {
            handles: HandleAllocator::new(),
            state: Mutex::new(LoopState::default()),
            network_queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            event_sources: Mutex::new(Vec::new()),
        }
    }

    /// Adds an event source (typically a connection manager) to the enumerable list.
    /// Not part of the [`EventLoop`] trait: registration is an assembly-time concern
    /// of the concrete loop, not something `opcua-server` needs to do through the
    /// abstract contract.
    pub fn register_event_source(&self, source: Arc<dyn EventSource>) {
        self.event_sources.lock().unwrap().push(source);
    }

    /// Queues a thunk (typically "invoke this `NetworkCallback` with this event") to
    /// run on the loop thread during the next `run` iteration, and wakes a sleeping
    /// pump immediately.
    pub fn enqueue_network_event(&self, thunk: Box<dyn FnOnce() + Send>) {
        self.network_queue.lock().unwrap().push_back(thunk);
        self.notify.notify_one();
    }

    fn next_deadline(&self) -> Option<MonotonicTime> {
        let state = self.state.lock().unwrap();
        state.entries.values().map(|e| e.deadline).min()
    }

    fn pop_due(&self, now: MonotonicTime) -> Vec<(CallbackId, TimedCallback, Option<(Duration, CycleMissPolicy)>)> {
        let mut state = self.state.lock().unwrap();
        let mut due = Vec::new();
        loop {
            let Some(top) = state.heap.peek() else { break };
            if !top.deadline.has_passed(now) {
                break;
            }
            let item = state.heap.pop().unwrap();
            let Some(entry) = state.entries.get(&item.id) else {
                continue; // removed since it was scheduled; drop the stale index entry
            };
            if entry.deadline != item.deadline {
                continue; // rescheduled since; a fresher heap entry exists for it
            }
            let entry = state.entries.remove(&item.id).unwrap();
            let callback = state.callbacks.remove(&item.id).unwrap();
            let cyclic = match entry.kind {
                CallbackKind::OneShot => None,
                CallbackKind::Cyclic { interval, miss_policy } => Some((interval, miss_policy)),
            };
            due.push((item.id, callback, cyclic));
        }
        due
    }

    fn reinsert(&self, id: CallbackId, callback: TimedCallback, deadline: MonotonicTime, kind: CallbackKind) {
        let mut state = self.state.lock().unwrap();
        state.heap.push(HeapItem { deadline, id });
        state.entries.insert(id, CallbackEntry { deadline, kind });
        state.callbacks.insert(id, callback);
    }

    fn schedule(&self, deadline: MonotonicTime, kind: CallbackKind, callback: TimedCallback) -> CallbackId {
        let id = CallbackId::from_raw(self.handles.next());
        let mut state = self.state.lock().unwrap();
        state.heap.push(HeapItem { deadline, id });
        state.entries.insert(id, CallbackEntry { deadline, kind });
        state.callbacks.insert(id, callback);
        drop(state);
        self.notify.notify_one();
        id
    }
}

#[async_trait::async_trait]
impl super::EventLoop for TokioEventLoop {
    async fn start(&self) -> Result<(), ServerError> {
        self.started.store(true, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn run(&self, timeout: Duration) -> Result<RunStatus, ServerError> {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Ok(RunStatus::Stopped);
        }

        let run_until = Instant::now() + timeout;
        let mut ran_any = false;

        loop {
            let network_thunks: Vec<_> = {
                let mut queue = self.network_queue.lock().unwrap();
                queue.drain(..).collect()
            };
            if !network_thunks.is_empty() {
                ran_any = true;
                for thunk in network_thunks {
                    thunk();
                }
            }

            let now = MonotonicTime::now();
            let due = self.pop_due(now);
            if !due.is_empty() {
                ran_any = true;
                for (id, mut callback, cyclic) in due {
                    callback(now);
                    if let Some((interval, miss_policy)) = cyclic {
                        // Fire-with-current-time: the next deadline is anchored to
                        // `now`, not the missed deadline, so a backlog collapses into
                        // one firing instead of bursting.
                        let next_deadline = now.checked_add(interval).unwrap_or(now);
                        self.reinsert(
                            id,
                            callback,
                            next_deadline,
                            CallbackKind::Cyclic { interval, miss_policy },
                        );
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

            let now_instant = Instant::now();
            if now_instant >= run_until {
                return Ok(if ran_any { RunStatus::Ran } else { RunStatus::TimedOut });
            }

            let next_deadline_instant =
                self.next_deadline().map(MonotonicTime::into_instant);
            let sleep_until = match next_deadline_instant {
                Some(deadline) if deadline < run_until => deadline,
                _ => run_until,
            };
            let sleep_duration = sleep_until.saturating_duration_since(now_instant);
            if sleep_duration.is_zero() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = self.notify.notified() => {}
            }
        }
    }

    fn next_cyclic_deadline(&self) -> Option<MonotonicTime> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| matches!(e.kind, CallbackKind::Cyclic { .. }))
            .map(|e| e.deadline)
            .min()
    }

    fn add_timed_callback(
        &self,
        deadline: MonotonicTime,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError> {
        Ok(self.schedule(deadline, CallbackKind::OneShot, callback))
    }

    fn add_cyclic_callback(
        &self,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        miss_policy: CycleMissPolicy,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError> {
        let deadline = initial_deadline
            .unwrap_or_else(|| MonotonicTime::now().checked_add(interval).unwrap_or_else(MonotonicTime::now));
        Ok(self.schedule(deadline, CallbackKind::Cyclic { interval, miss_policy }, callback))
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
            return Err(ServerError::internal(format!(
                "cannot modify unknown callback {id}"
            )));
        }
        let deadline = initial_deadline
            .unwrap_or_else(|| MonotonicTime::now().checked_add(interval).unwrap_or_else(MonotonicTime::now));
        state.entries.insert(id, CallbackEntry { deadline, kind: CallbackKind::Cyclic { interval, miss_policy } });
        state.heap.push(HeapItem { deadline, id });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    fn remove_callback(&self, id: CallbackId) {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&id);
        state.callbacks.remove(&id);
        // The matching heap entry is left in place and discarded lazily on pop.
    }

    fn add_delayed_callback(&self, callback: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();
        state.delayed.push(callback);
        drop(state);
        self.notify.notify_one();
    }

    fn event_sources(&self) -> Vec<Arc<dyn EventSource>> {
        self.event_sources.lock().unwrap().clone()
    }
}

impl NetworkEventSink for TokioEventLoop {
    fn enqueue(&self, thunk: Box<dyn FnOnce() + Send>) {
        self.enqueue_network_event(thunk);
    }
}
