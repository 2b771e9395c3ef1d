//! Reverse-connect registry (component E): the server dials out to clients instead of
//! listening, retrying at the 1 Hz housekeeping cadence until each entry connects.
//!
//! # Container shape
//! An intrusive singly-linked list is an awkward fit once entries can be destroyed while a connection
//! attempt is still in flight: a removed node must outlive its own removal until the
//! in-flight callback resolves. Rather than port the intrusive list, entries are kept
//! in a `HashMap` indexed by the stable [`ReverseConnectHandle`] the caller already
//! holds, and a destroyed entry is quarantined — flagged, then only actually dropped
//! from the map via [`opcua_core::EventLoop::add_delayed_callback`] once the current
//! event-loop iteration (and whatever callback it was mid-delivery of) has finished.
//! That gives the same "safe to free after this tick" guarantee the original's
//! destruction flag provided, without needing raw pointers to express it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

use opcua_core::{
    ConnectionEvent, ConnectionId, EventLoop, HandleAllocator, MonotonicTime, NetworkCallback,
    ReverseConnectHandle, ServerError,
};

use crate::listener::parse_server_url;

/// Lifecycle state of one reverse-connect entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseConnectState {
    /// Not currently connected; eligible for a retry attempt on the next tick.
    Closed,
    /// A dial attempt is outstanding; the entry will not be retried again until that
    /// attempt resolves.
    Connecting,
    /// Connected, with the transport-assigned id of the live connection.
    Connected,
}

/// A snapshot of one reverse-connect entry, returned by [`ReverseConnectManager::list`].
#[derive(Debug, Clone)]
pub struct ReverseConnectEntry {
    pub handle: ReverseConnectHandle,
    pub url: String,
    pub state: ReverseConnectState,
    pub connection_id: Option<ConnectionId>,
}

/// The user-supplied state-change callback passed to
/// [`ReverseConnectManager::add`], invoked with the entry's handle, its new state,
/// and the caller-supplied context every time that state actually changes. Held as a
/// weak (handle-indexed) association only — dropping every [`Arc`] to the manager
/// itself does not keep a callback alive past the entry's removal.
pub type ReverseConnectStateCallback =
    Arc<dyn Fn(ReverseConnectHandle, ReverseConnectState, &Arc<dyn Any + Send + Sync>) + Send + Sync>;

struct Slot {
    url: String,
    state: ReverseConnectState,
    connection_id: Option<ConnectionId>,
    destroyed: bool,
    state_callback: Option<ReverseConnectStateCallback>,
    context: Arc<dyn Any + Send + Sync>,
}

/// Registry of reverse-connect targets, dispatching dial attempts through whichever
/// registered connection manager advertises the URL's scheme (the same lookup
/// [`crate::listener`] performs for inbound listeners, just with `listen = false`).
pub struct ReverseConnectManager {
    event_loop: Arc<dyn EventLoop>,
    handles: HandleAllocator,
    slots: Arc<Mutex<HashMap<ReverseConnectHandle, Slot>>>,
}

impl ReverseConnectManager {
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Arc<Self> {
        Arc::new(Self { event_loop, handles: HandleAllocator::new(), slots: Arc::new(Mutex::new(HashMap::new())) })
    }

    /// Registers a new reverse-connect target and attempts an immediate connect before
    /// returning; if that attempt doesn't resolve synchronously the entry falls back
    /// to the 1 Hz [`retry_tick`](Self::retry_tick) cadence like any other `Closed`
    /// entry. `state_callback`, when present, fires with `context` every time this
    /// entry's state actually changes, until the entry is removed.
    pub fn add(
        self: &Arc<Self>,
        url: impl Into<String>,
        state_callback: Option<ReverseConnectStateCallback>,
        context: Arc<dyn Any + Send + Sync>,
    ) -> ReverseConnectHandle {
        let handle = ReverseConnectHandle::from_raw(self.handles.next());
        let url = url.into();
        let slot = Slot {
            url: url.clone(),
            state: ReverseConnectState::Closed,
            connection_id: None,
            destroyed: false,
            state_callback,
            context,
        };
        self.slots.lock().insert(handle, slot);
        self.dial(handle, &url);
        handle
    }

    /// Marks `handle` for removal. If a dial is in flight, the slot is quarantined
    /// (flagged `destroyed`, ignored by any callback that still arrives for it) and
    /// only dropped from the table once the event loop's current iteration finishes;
    /// an already-`Connected` entry is closed eagerly by the caller via the returned
    /// connection id, since no further callback is pending for it.
    pub fn remove(&self, handle: ReverseConnectHandle) -> Result<Option<ConnectionId>, ServerError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&handle).ok_or_else(|| ServerError::reverse_connect_not_found(handle))?;
        slot.destroyed = true;
        let connection_id = if slot.state == ReverseConnectState::Connected { slot.connection_id } else { None };
        drop(slots);

        let slots = Arc::clone(&self.slots);
        self.event_loop.add_delayed_callback(Box::new(move || {
            slots.lock().remove(&handle);
        }));
        Ok(connection_id)
    }

    /// A point-in-time snapshot of every registered entry, destroyed ones excluded.
    pub fn list(&self) -> Vec<ReverseConnectEntry> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.destroyed)
            .map(|(&handle, slot)| ReverseConnectEntry {
                handle,
                url: slot.url.clone(),
                state: slot.state,
                connection_id: slot.connection_id,
            })
            .collect()
    }

    /// Attempts to dial every `Closed`, non-destroyed entry. Called once per
    /// housekeeping tick (component F); entries already `Connecting` or `Connected`
    /// are left untouched.
    pub fn retry_tick(self: &Arc<Self>, _now: MonotonicTime) {
        let due: Vec<(ReverseConnectHandle, String)> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .filter(|(_, slot)| !slot.destroyed && slot.state == ReverseConnectState::Closed)
                .map(|(&handle, slot)| (handle, slot.url.clone()))
                .collect()
        };

        for (handle, url) in due {
            self.dial(handle, &url);
        }
    }

    fn dial(self: &Arc<Self>, handle: ReverseConnectHandle, url: &str) {
        let parsed = match parse_server_url(url) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(url, %error, "reverse-connect entry has an unparsable target URL");
                return;
            }
        };

        let transport = crate::listener::transport_for_scheme(&parsed.scheme);
        let sources = self.event_loop.event_sources();
        let matching_protocol = sources.iter().any(|source| {
            source.as_connection_manager().is_some_and(|manager| manager.protocol() == transport)
        });
        let manager = sources.iter().find_map(|source| {
            if source.state() != opcua_core::EventSourceState::Started {
                return None;
            }
            let manager = source.as_connection_manager()?;
            (manager.protocol() == transport).then_some(manager)
        });
        let Some(manager) = manager else {
            if matching_protocol {
                // The manager exists but hasn't started yet; this is not a hard
                // failure (`ErrorKind::AsyncInProgress`), just a reason to wait for
                // the next 1 Hz retry tick.
                tracing::debug!(url, protocol = transport, "connection manager not started yet; retrying next tick");
            } else {
                tracing::warn!(url, protocol = transport, "no connection manager can dial this reverse-connect target");
            }
            return;
        };

        let params = opcua_core::ConnectionParams {
            port: Some(parsed.port),
            listen: false,
            address: parsed.host.map(|host| vec![host]),
        };

        let this = Arc::clone(self);
        let callback: NetworkCallback = Arc::new(move |context, event| {
            let handle = *context.downcast_ref::<ReverseConnectHandle>().expect("context is always a handle");
            this.on_event(handle, event);
        });

        // Transition to `Connecting` before calling `open_connection`, not after: a
        // connection manager's contract is non-blocking, but nothing stops one from
        // invoking the callback synchronously before returning (the in-process test
        // double does exactly this for a local success). Setting state first means a
        // synchronous `Connected`/`Closed` callback is never clobbered by the
        // post-call `Connecting` write.
        self.set_state(handle, ReverseConnectState::Connecting, None);
        if let Err(error) = manager.open_connection(params, Arc::new(handle) as Arc<dyn Any + Send + Sync>, callback) {
            tracing::warn!(url, %error, "reverse-connect dial attempt could not start; retrying next tick");
            self.set_state(handle, ReverseConnectState::Closed, None);
        }
    }

    fn on_event(&self, handle: ReverseConnectHandle, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { connection_id, .. } => {
                self.set_state(handle, ReverseConnectState::Connected, Some(connection_id));
            }
            ConnectionEvent::Closed { .. } | ConnectionEvent::Failed { .. } => {
                self.set_state(handle, ReverseConnectState::Closed, None);
            }
        }
    }

    /// Updates an entry's state and, if the state actually changed, fires its
    /// state-change callback with the lock released (a user callback must be free to
    /// call back into this manager, e.g. to `remove` itself).
    fn set_state(&self, handle: ReverseConnectHandle, state: ReverseConnectState, connection_id: Option<ConnectionId>) {
        let notify = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&handle) else { return };
            if slot.destroyed {
                return;
            }
            let changed = slot.state != state;
            slot.state = state;
            slot.connection_id = connection_id;
            changed
                .then(|| slot.state_callback.clone())
                .flatten()
                .map(|callback| (callback, Arc::clone(&slot.context)))
        };

        if let Some((callback, context)) = notify {
            callback(handle, state, &context);
        }
    }
}
