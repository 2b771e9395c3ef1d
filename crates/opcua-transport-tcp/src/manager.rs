//! [`TcpConnectionManager`]: the concrete `tcp` connection manager that the listener
//! fan-out (component D) and the reverse-connect manager (component E) both drive.
//!
//! # Design (How)
//! - `open_connection` with `params.listen == true` binds a `TcpListener` and spawns
//!   an accept loop; each accepted socket gets a fresh [`ConnectionId`] and an
//!   `Opened` event. `params.listen == false` dials once (the reverse-connect shape):
//!   exactly one of `Opened`/`Failed` follows.
//! - Every event is handed to the owning event loop through [`NetworkEventSink`]
//!   rather than invoked directly from the Tokio task that observed it, so ordering
//!   with timed/cyclic callbacks is preserved.
//! - `close_connection` works uniformly on listening-socket ids and accepted-channel
//!   ids: closing a listener's id stops its accept loop; closing a channel's id shuts
//!   down that socket. Both paths end in a `Closed` event once the transport confirms.

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use opcua_core::{
    ConnectionEvent, ConnectionId, ConnectionManager, ConnectionParams, EventSource,
    EventSourceKind, EventSourceState, HandleAllocator, NetworkCallback, NetworkEventSink,
    ServerError,
};

use crate::channel::TcpChannel;
use crate::listener::TcpListener;

enum Slot {
    Listener { shutdown: Arc<Notify> },
    Channel { channel: Arc<tokio::sync::Mutex<TcpChannel>> },
}

type SlotTable = Arc<Mutex<HashMap<ConnectionId, Slot>>>;

const STATE_FRESH: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// The `tcp` connection manager. Construct one per server, register it with the
/// event loop's event-source list, and pass `Arc::clone`d handles to the listener
/// fan-out and reverse-connect manager.
pub struct TcpConnectionManager {
    sink: Arc<dyn NetworkEventSink>,
    handles: HandleAllocator,
    state: AtomicU8,
    slots: SlotTable,
}

impl TcpConnectionManager {
    pub fn new(sink: Arc<dyn NetworkEventSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            handles: HandleAllocator::new(),
            state: AtomicU8::new(STATE_FRESH),
            slots: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Marks the manager started. The listener fan-out and reverse-connect manager
    /// only attempt `open_connection` against managers in this state.
    pub fn mark_started(&self) {
        self.state.store(STATE_STARTED, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId::from_raw(self.handles.next())
    }
}

impl EventSource for TcpConnectionManager {
    fn event_source_type(&self) -> EventSourceKind {
        EventSourceKind::ConnectionManager
    }

    fn state(&self) -> EventSourceState {
        match self.state.load(Ordering::SeqCst) {
            STATE_STARTED => EventSourceState::Started,
            STATE_STOPPED => EventSourceState::Stopped,
            _ => EventSourceState::Fresh,
        }
    }

    fn as_connection_manager(&self) -> Option<&dyn ConnectionManager> {
        Some(self)
    }
}

impl ConnectionManager for TcpConnectionManager {
    fn protocol(&self) -> &str {
        "tcp"
    }

    fn open_connection(
        &self,
        params: ConnectionParams,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) -> Result<(), ServerError> {
        if params.listen {
            self.open_listener(params, user_context, callback)
        } else {
            self.open_dial(params, user_context, callback)
        }
    }

    fn close_connection(&self, id: ConnectionId) {
        let slot = self.slots.lock().unwrap().remove(&id);
        match slot {
            Some(Slot::Listener { shutdown }) => {
                debug!(connection_id = %id, "stopping tcp listener");
                shutdown.notify_waiters();
            }
            Some(Slot::Channel { channel }) => {
                debug!(connection_id = %id, "closing tcp channel");
                tokio::spawn(async move {
                    let mut guard = channel.lock().await;
                    let _ = guard.shutdown().await;
                });
            }
            None => {}
        }
    }
}

impl TcpConnectionManager {
    fn open_listener(
        &self,
        params: ConnectionParams,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) -> Result<(), ServerError> {
        let bind_addr = resolve_bind_addr(&params)?;

        let id = self.next_id();
        let shutdown = Arc::new(Notify::new());
        self.slots
            .lock()
            .unwrap()
            .insert(id, Slot::Listener { shutdown: Arc::clone(&shutdown) });

        tokio::spawn(Self::accept_loop(
            bind_addr,
            id,
            shutdown,
            Arc::clone(&self.sink),
            Arc::clone(&self.slots),
            HandleAllocator::new(),
            user_context,
            callback,
        ));

        Ok(())
    }

    async fn accept_loop(
        bind_addr: SocketAddr,
        listener_id: ConnectionId,
        shutdown: Arc<Notify>,
        sink: Arc<dyn NetworkEventSink>,
        slots: SlotTable,
        channel_ids: HandleAllocator,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) {
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!(%bind_addr, %error, "tcp listener bind failed");
                slots.lock().unwrap().remove(&listener_id);
                sink.enqueue(Box::new(move || {
                    callback(user_context, ConnectionEvent::Failed { error: error.into() })
                }));
                return;
            }
        };
        debug!(local_addr = %listener.local_addr(), "tcp listener open");

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!(connection_id = %listener_id, "tcp listener shutdown requested");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((channel, peer_addr)) => {
                            let local_addr = listener.local_addr();
                            let channel_id = ConnectionId::from_raw(channel_ids.next());
                            slots.lock().unwrap().insert(
                                channel_id,
                                Slot::Channel { channel: Arc::new(tokio::sync::Mutex::new(channel)) },
                            );

                            let ctx = Arc::clone(&user_context);
                            let cb = Arc::clone(&callback);
                            sink.enqueue(Box::new(move || {
                                cb(
                                    ctx,
                                    ConnectionEvent::Opened {
                                        connection_id: channel_id,
                                        local_addr: Some(local_addr),
                                        peer_addr: Some(peer_addr),
                                    },
                                )
                            }));
                        }
                        Err(error) => {
                            warn!(%error, "tcp accept failed");
                        }
                    }
                }
            }
        }

        slots.lock().unwrap().remove(&listener_id);
        sink.enqueue(Box::new(move || {
            callback(user_context, ConnectionEvent::Closed { connection_id: listener_id })
        }));
    }

    fn open_dial(
        &self,
        params: ConnectionParams,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) -> Result<(), ServerError> {
        let port = params
            .port
            .ok_or_else(|| ServerError::invalid_argument("reverse-connect dial requires a port"))?;
        let host = params
            .address
            .as_ref()
            .and_then(|addrs| addrs.first())
            .cloned()
            .ok_or_else(|| ServerError::invalid_argument("reverse-connect dial requires a host"))?;

        let id = self.next_id();
        tokio::spawn(Self::dial_task(
            host,
            port,
            id,
            Arc::clone(&self.sink),
            Arc::clone(&self.slots),
            user_context,
            callback,
        ));
        Ok(())
    }

    async fn dial_task(
        host: String,
        port: u16,
        id: ConnectionId,
        sink: Arc<dyn NetworkEventSink>,
        slots: SlotTable,
        user_context: Arc<dyn Any + Send + Sync>,
        callback: NetworkCallback,
    ) {
        let target = format!("{host}:{port}");
        match TcpStream::connect(&target).await {
            Ok(stream) => {
                let local_addr = stream.local_addr().ok();
                let peer_addr = stream.peer_addr().ok();
                let Some(peer) = peer_addr else {
                    warn!(%target, "reverse-connect dial succeeded but peer address unavailable");
                    sink.enqueue(Box::new(move || {
                        callback(
                            user_context,
                            ConnectionEvent::Failed {
                                error: ServerError::internal("dialed socket has no peer address"),
                            },
                        )
                    }));
                    return;
                };
                let channel = TcpChannel::from_parts(stream, local_addr.unwrap_or(peer), peer);
                slots
                    .lock()
                    .unwrap()
                    .insert(id, Slot::Channel { channel: Arc::new(tokio::sync::Mutex::new(channel)) });

                debug!(%target, "reverse-connect dial succeeded");
                sink.enqueue(Box::new(move || {
                    callback(
                        user_context,
                        ConnectionEvent::Opened { connection_id: id, local_addr, peer_addr: Some(peer) },
                    )
                }));
            }
            Err(error) => {
                warn!(%target, %error, "reverse-connect dial failed");
                sink.enqueue(Box::new(move || {
                    callback(user_context, ConnectionEvent::Failed { error: error.into() })
                }));
            }
        }
    }
}

fn resolve_bind_addr(params: &ConnectionParams) -> Result<SocketAddr, ServerError> {
    let port = params.port.unwrap_or(4840);
    let host = params.address.as_ref().and_then(|addrs| addrs.first());
    match host {
        Some(host) if !host.is_empty() => {
            let ip: IpAddr = host
                .parse()
                .map_err(|_| ServerError::invalid_argument(format!("invalid bind address `{host}`")))?;
            Ok(SocketAddr::new(ip, port))
        }
        _ => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcua_core::runtime::NetworkEventSink;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<Box<dyn FnOnce() + Send>>,
    }

    impl NetworkEventSink for ChannelSink {
        fn enqueue(&self, thunk: Box<dyn FnOnce() + Send>) {
            let _ = self.tx.send(thunk);
        }
    }

    #[tokio::test]
    async fn dial_against_closed_port_reports_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn NetworkEventSink> = Arc::new(ChannelSink { tx });
        let manager = TcpConnectionManager::new(sink);

        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let events_cb = Arc::clone(&events);
        let callback: NetworkCallback = Arc::new(move |_ctx, event| {
            let mut guard = events_cb.lock().unwrap();
            guard.push(match event {
                ConnectionEvent::Opened { .. } => "opened",
                ConnectionEvent::Closed { .. } => "closed",
                ConnectionEvent::Failed { .. } => "failed",
            });
        });

        let params = ConnectionParams {
            listen: false,
            address: Some(vec!["127.0.0.1".to_string()]),
            port: Some(1),
        };
        manager
            .open_connection(params, Arc::new(AtomicUsize::new(0)), callback)
            .unwrap();

        let thunk = rx.recv().await.expect("expected one queued event");
        thunk();
        assert_eq!(events.lock().unwrap().as_slice(), ["failed"]);
    }

    #[tokio::test]
    async fn listener_open_then_close_reports_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn NetworkEventSink> = Arc::new(ChannelSink { tx });
        let manager = TcpConnectionManager::new(sink);

        let events: Arc<Mutex<Vec<(&'static str, ConnectionId)>>> = Arc::new(Mutex::new(Vec::new()));
        let events_cb = Arc::clone(&events);
        let callback: NetworkCallback = Arc::new(move |_ctx, event| {
            let mut guard = events_cb.lock().unwrap();
            match event {
                ConnectionEvent::Opened { connection_id, .. } => guard.push(("opened", connection_id)),
                ConnectionEvent::Closed { connection_id } => guard.push(("closed", connection_id)),
                ConnectionEvent::Failed { .. } => guard.push(("failed", ConnectionId::EMPTY)),
            }
        });

        // port 0: let the OS pick a free ephemeral port.
        let params = ConnectionParams { listen: true, address: Some(vec!["127.0.0.1".to_string()]), port: Some(0) };
        manager
            .open_connection(params, Arc::new(AtomicUsize::new(0)), callback)
            .unwrap();

        // `open_connection` assigns handles starting at 1 for a fresh manager.
        let listener_id = ConnectionId::from_raw(1);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        manager.close_connection(listener_id);
        let thunk = rx.recv().await.expect("expected closed event");
        thunk();
        assert_eq!(events.lock().unwrap().as_slice(), [("closed", listener_id)]);
    }
}
