//! `opcua-core`: the small set of contracts shared by the server crates.
//!
//! # Scope (Why)
//! - Carries exactly the vocabulary the server core needs from its host: a stable error
//!   domain, a monotonic clock, and the event-loop contract — start/stop/run, timed and
//!   cyclic callbacks, delayed callbacks, event-source enumeration.
//! - Everything here is a trait or a plain data type; no concrete networking, no node
//!   store, no codec. Those live in sibling crates (`opcua-transport-tcp`) or are
//!   supplied by the embedder.
//!
//! # Non-goals
//! This crate does not implement PubSub, subscriptions, the address-space model, or the
//! secure-channel handshake. It only describes the shapes those subsystems are plugged
//! in through.

pub mod error;
pub mod ids;
pub mod runtime;
pub mod time;

pub use error::{ErrorKind, ServerError};
pub use ids::{CallbackId, ConnectionId, HandleAllocator, ReverseConnectHandle};
pub use runtime::{
    ConnectionEvent, ConnectionManager, ConnectionParams, CycleMissPolicy, EventLoop, EventSource,
    EventSourceKind, EventSourceState, NetworkCallback, NetworkEventSink, RunStatus, TimedCallback,
    TokioEventLoop,
};
pub use time::{Clock, ManualClock, MonotonicTime, SystemClock};
