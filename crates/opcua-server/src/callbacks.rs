//! Timed-callback façade (component C): a thin wrapper mapping server-scoped
//! one-shot and cyclic callbacks onto the event-loop contract (component A). Every
//! public entry point here is called with the service mutex already held by the
//! caller (see [`crate::server::Server`]) — this module performs no locking of its
//! own, matching the "service mutex held across every public API call" rule.

use std::sync::Arc;
use std::time::Duration;

use opcua_core::{CallbackId, CycleMissPolicy, EventLoop, MonotonicTime, ServerError, TimedCallback};

/// Registers a one-shot callback at an absolute deadline.
pub fn add_timed_callback(
    event_loop: &Arc<dyn EventLoop>,
    deadline: MonotonicTime,
    callback: TimedCallback,
) -> Result<CallbackId, ServerError> {
    event_loop.add_timed_callback(deadline, callback)
}

/// Registers a repeating callback at `interval`, firing for the first time at
/// `initial_deadline` (or `now + interval` when absent), under the
/// fire-with-current-time cycle-miss policy.
pub fn add_repeated_callback(
    event_loop: &Arc<dyn EventLoop>,
    interval: Duration,
    initial_deadline: Option<MonotonicTime>,
    callback: TimedCallback,
) -> Result<CallbackId, ServerError> {
    event_loop.add_cyclic_callback(interval, initial_deadline, CycleMissPolicy::FireWithCurrentTime, callback)
}

/// Changes the interval of an already-registered repeating callback in place.
pub fn change_repeated_callback_interval(
    event_loop: &Arc<dyn EventLoop>,
    id: CallbackId,
    interval: Duration,
) -> Result<(), ServerError> {
    event_loop.modify_cyclic_callback(id, interval, None, CycleMissPolicy::FireWithCurrentTime)
}

/// Removes a timed or cyclic callback. A no-op if `id` is already gone.
pub fn remove_callback(event_loop: &Arc<dyn EventLoop>, id: CallbackId) {
    event_loop.remove_callback(id);
}
