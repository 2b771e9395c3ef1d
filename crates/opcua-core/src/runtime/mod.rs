//! The event-loop contract. This module only declares the
//! shape; the default implementation lives in [`tokio_loop`].
//!
//! # Why a trait at all
//! The server core is deliberately not coupled to one async runtime. `opcua-server`
//! depends only on [`EventLoop`]/[`EventSource`]/[`ConnectionManager`]; swapping the
//! concrete scheduler (the bundled Tokio one, or a test double) never touches the
//! lifecycle, namespace, or reverse-connect code.

mod tokio_loop;

pub use tokio_loop::TokioEventLoop;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServerError;
use crate::ids::{CallbackId, ConnectionId};
use crate::time::MonotonicTime;

/// Outcome of one `run(timeout)` pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// At least one callback fired before the timeout elapsed.
    Ran,
    /// Nothing was due; the pump returned once `timeout` elapsed.
    TimedOut,
    /// `stop()` was called concurrently with (or before) this pump.
    Stopped,
}

/// Cycle-miss policy for repeating callbacks. Only one policy is specified: prefer
/// liveness over catch-up. A backlog of missed ticks (e.g. the process was suspended)
/// collapses into a single firing at the current time rather than bursting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMissPolicy {
    #[default]
    FireWithCurrentTime,
}

/// A one-shot or cyclic callback. Invoked with the event loop's notion of "now" at
/// fire time, never with the originally scheduled deadline, so that cyclic callbacks
/// observe actual elapsed time under the fire-with-current-time policy.
pub type TimedCallback = Box<dyn FnMut(MonotonicTime) + Send>;

/// A callback that runs once, after the event loop's current iteration has otherwise
/// completed. Used for deferred memory reclamation (see the reverse-connect manager).
pub type DelayedCallback = Box<dyn FnOnce() + Send>;

/// The event-loop contract consumed by the server core.
#[async_trait::async_trait]
pub trait EventLoop: Send + Sync {
    /// Starts the loop. Idempotent: calling `start` on an already-started loop is a
    /// no-op that returns `Ok(())`.
    async fn start(&self) -> Result<(), ServerError>;

    /// Stops the loop. Any pump currently inside `run` observes `RunStatus::Stopped`
    /// as soon as it next checks for due work.
    async fn stop(&self);

    /// Pumps due timed/cyclic callbacks and polls event sources for at most
    /// `timeout`. Returns promptly once no further work is due, even if `timeout`
    /// has not elapsed.
    async fn run(&self, timeout: Duration) -> Result<RunStatus, ServerError>;

    /// The earliest deadline among currently registered cyclic callbacks, if any.
    fn next_cyclic_deadline(&self) -> Option<MonotonicTime>;

    /// Registers a one-shot callback at an absolute deadline.
    fn add_timed_callback(
        &self,
        deadline: MonotonicTime,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError>;

    /// Registers a repeating callback. `initial_deadline` defaults to `now + interval`
    /// when absent.
    fn add_cyclic_callback(
        &self,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        miss_policy: CycleMissPolicy,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError>;

    /// Changes the interval/phase/policy of an existing cyclic callback in place.
    fn modify_cyclic_callback(
        &self,
        id: CallbackId,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        miss_policy: CycleMissPolicy,
    ) -> Result<(), ServerError>;

    /// Removes a timed or cyclic callback. A no-op if `id` is already gone.
    fn remove_callback(&self, id: CallbackId);

    /// Queues a callback to run once after the loop finishes its current iteration.
    fn add_delayed_callback(&self, callback: DelayedCallback);

    /// Snapshot of currently registered event sources (connection managers and
    /// anything else the concrete loop exposes).
    fn event_sources(&self) -> Vec<Arc<dyn EventSource>>;
}

/// Lifecycle state of one event source, mirroring the secure-channel-style
/// fresh/started/stopped vocabulary used elsewhere for secure-channel and session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceState {
    Fresh,
    Started,
    Stopped,
}

/// What kind of thing an [`EventSource`] is. Only `ConnectionManager` is relevant to
/// this server core; other kinds (timers, signal sources) are opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceKind {
    ConnectionManager,
    Other,
}

/// One element of the event loop's event-source list.
pub trait EventSource: Send + Sync {
    fn event_source_type(&self) -> EventSourceKind;
    fn state(&self) -> EventSourceState;

    /// Downcast to [`ConnectionManager`] when `event_source_type` is
    /// `EventSourceKind::ConnectionManager`. Default is `None` so non-transport event
    /// sources don't need a stub implementation.
    fn as_connection_manager(&self) -> Option<&dyn ConnectionManager> {
        None
    }
}

/// The parameter map passed to `open_connection`: `port`, `listen`, and — only when
/// the caller has a concrete hostname — `address`. A small typed struct rather than a
/// free-form map, so callers get compile-time field checking instead of stringly-typed
/// keys.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub port: Option<u16>,
    pub listen: bool,
    pub address: Option<Vec<String>>,
}

/// Outcome delivered to a [`NetworkCallback`] as connections open, close, or fail to
/// open. `context` carries back whatever opaque value the caller passed to
/// `open_connection`, letting the reverse-connect manager correlate an event with its
/// originating entry without a side table.
pub enum ConnectionEvent {
    Opened { connection_id: ConnectionId, local_addr: Option<SocketAddr>, peer_addr: Option<SocketAddr> },
    Closed { connection_id: ConnectionId },
    Failed { error: ServerError },
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { connection_id, local_addr, peer_addr } => f
                .debug_struct("Opened")
                .field("connection_id", connection_id)
                .field("local_addr", local_addr)
                .field("peer_addr", peer_addr)
                .finish(),
            Self::Closed { connection_id } => {
                f.debug_struct("Closed").field("connection_id", connection_id).finish()
            }
            Self::Failed { error } => f.debug_struct("Failed").field("error", error).finish(),
        }
    }
}

/// A network callback, invoked by the owning connection manager as events occur on
/// one logical `open_connection` request. Shared (`Arc`) because the server installs
/// the same callback implementation (reading the server-owned context) across every
/// listener and reverse-connect attempt.
pub type NetworkCallback = Arc<dyn Fn(Arc<dyn Any + Send + Sync>, ConnectionEvent) + Send + Sync>;

/// Lets a [`ConnectionManager`] hand a network-event delivery back to the owning
/// event loop instead of invoking the [`NetworkCallback`] directly from whatever
/// background task observed the socket event. Routing through this sink is what lets
/// the "network callbacks serialize with timed callbacks, same thread" guarantee hold
/// for connection managers that accept on their own tasks.
pub trait NetworkEventSink: Send + Sync {
    fn enqueue(&self, thunk: Box<dyn FnOnce() + Send>);
}

/// An event source that can accept inbound connections (listen mode) or dial out
/// (reverse-connect mode), matching the `protocol`/`openConnection`/`closeConnection`
/// surface named in the external-interfaces section.
pub trait ConnectionManager: EventSource {
    /// The transport scheme this manager advertises, e.g. `"tcp"`.
    fn protocol(&self) -> &str;

    /// Starts an asynchronous open. `user_context` is handed back verbatim on every
    /// [`ConnectionEvent`] delivered to `callback` for the connection(s) this call
    /// produces. Non-blocking: results arrive only through `callback`.
    fn open_connection(
        &self,
        params: ConnectionParams,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) -> Result<(), ServerError>;

    /// Requests that an open connection be closed. Asynchronous: the close is
    /// confirmed later via a [`ConnectionEvent::Closed`] callback.
    fn close_connection(&self, id: ConnectionId);
}
