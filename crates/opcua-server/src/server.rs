//! Server lifecycle (component H): `new`/`init`/`startup`/`iterate`/`shutdown`/`delete`,
//! plus the public surface (namespaces, reverse-connect, timed callbacks, certificate
//! rotation, statistics) that ties components B through G together.
//!
//! # Concurrency
//! [`Server`] serializes every operation that touches its own aggregates (namespace
//! table, reverse-connect registry, lifecycle state, start/end time) behind one
//! [`tokio::sync::Mutex`] — the "service mutex" referenced throughout this module. A
//! `tokio` mutex, not a `parking_lot` one, because `startup`/`shutdown` need to hold it
//! across `.await` points (starting/stopping the event loop); a synchronous mutex
//! guard cannot cross an await point. The event loop and the timed-callback façade are
//! explicitly exempted from this rule (they manage their own synchronization), so
//! `add_timed_callback` and friends never touch the service mutex at all.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opcua_core::{
    CallbackId, EventLoop, MonotonicTime, NetworkCallback, ReverseConnectHandle, RunStatus,
    ServerError, TimedCallback,
};

use crate::certificate::{self, CertificateUpdateOutcome};
use crate::collaborators::{ChildRef, NodeId};
use crate::config::{ServerConfig, DEFAULT_ITERATE_TIMEOUT, DEFAULT_SHUTDOWN_DRAIN_TIMEOUT};
use crate::housekeeping;
use crate::listener;
use crate::reverse_connect::ReverseConnectManager;
use crate::stats::{self, ServerStatistics};
use crate::util;

/// Lifecycle state: `fresh → started → shutting-down → stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Fresh,
    Started,
    ShuttingDown,
    Stopped,
}

/// What [`Server::set_server_shutdown`] tells the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDisposition {
    /// `shutdownDelay` was zero; the caller should proceed straight to `shutdown`.
    StopNow,
    /// A grace period was set; the caller should keep iterating until
    /// [`Server::test_shutdown_condition`] returns `true`.
    Continue,
}

struct Inner {
    state: ServerState,
    namespaces: crate::namespace::NamespaceTable,
    reverse_connect: Arc<ReverseConnectManager>,
    housekeeping_callback_id: Option<CallbackId>,
    start_time: Option<MonotonicTime>,
    end_time: Option<MonotonicTime>,
    admin_session_id: String,
}

/// The server root aggregate. Construct via [`ServerConfig`]/[`crate::ServerBuilder`],
/// then drive it through `init` → `startup` → (steady state via `iterate`, or the
/// [`Server::run`] convenience loop) → `shutdown` → `delete`.
pub struct Server {
    config: ServerConfig,
    inner: tokio::sync::Mutex<Inner>,
}

impl Server {
    /// Builds a fresh, uninitialized server from an already-validated configuration.
    /// Never fails: every collaborator required for construction (`fatal-init`
    /// triggers) was already enforced by
    /// [`crate::ServerBuilder::build`].
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let reverse_connect = ReverseConnectManager::new(Arc::clone(&config.event_loop));
        let namespaces = crate::namespace::NamespaceTable::new(config.application_uri.clone());
        Arc::new(Self {
            inner: tokio::sync::Mutex::new(Inner {
                state: ServerState::Fresh,
                namespaces,
                reverse_connect,
                housekeeping_callback_id: None,
                start_time: None,
                end_time: None,
                admin_session_id: String::new(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// Seeds the administrative session, installs namespaces 0 and 1, and initializes
    /// every configured collaborator. On any failure, every already-initialized
    /// collaborator is cleared again before the error is returned — a best-effort
    /// undo, not the full `delete` (which additionally requires the server to have
    /// been shut down first).
    pub async fn init(&self) -> Result<(), ServerError> {
        if let Err(error) = self.try_init().await {
            self.clear_collaborators();
            return Err(error);
        }
        Ok(())
    }

    async fn try_init(&self) -> Result<(), ServerError> {
        self.config.node_store.init()?;
        self.config.session_store.init()?;
        self.config.secure_channel_store.init()?;
        if let Some(discovery) = &self.config.discovery_manager {
            discovery.init()?;
        }
        if let Some(async_manager) = &self.config.async_manager {
            async_manager.init()?;
        }
        if let Some(pubsub) = &self.config.pubsub_manager {
            pubsub.init()?;
        }

        let mut inner = self.inner.lock().await;
        inner.namespaces.setup_ns1();
        inner.admin_session_id = "00000000-0000-0000-0000-000000000001".to_string();
        Ok(())
    }

    fn clear_collaborators(&self) {
        self.config.node_store.clear();
        self.config.session_store.clear();
        self.config.secure_channel_store.clear();
        if let Some(discovery) = &self.config.discovery_manager {
            discovery.clear();
        }
        if let Some(async_manager) = &self.config.async_manager {
            async_manager.clear();
        }
        if let Some(pubsub) = &self.config.pubsub_manager {
            pubsub.clear();
        }
    }

    /// Starts the event loop, opens listeners for every configured server URL,
    /// registers housekeeping, and transitions to `started`. Idempotent past
    /// `started`.
    pub async fn startup(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ServerState::Started {
            return Ok(());
        }

        inner.namespaces.setup_ns1();
        self.config.event_loop.start().await?;

        let context: Arc<dyn Any + Send + Sync> = Arc::new(());
        let callback: NetworkCallback = Arc::new(|_context, event| {
            tracing::debug!(?event, "listener network event (no session layer bound in this core)");
        });
        let server_urls = self.config.effective_server_urls();
        let opened = listener::open_listeners(&self.config.event_loop, &server_urls, context, callback);
        if opened < server_urls.len() {
            tracing::warn!(opened, configured = server_urls.len(), "fewer listeners opened than server URLs configured");
        }

        // Discovery URLs exclude server URLs with an empty host: an empty host means
        // "listen on all interfaces", which is not itself a dialable address.
        let discovery_urls: Vec<String> = server_urls
            .iter()
            .filter(|url| listener::parse_server_url(url).map(|parsed| parsed.host.is_some()).unwrap_or(false))
            .cloned()
            .collect();
        for endpoint in self.config.endpoints.lock().iter_mut() {
            endpoint.discovery_urls = discovery_urls.clone();
        }

        let housekeeping_id = housekeeping::start(
            &self.config.event_loop,
            self.config.housekeeping_interval,
            Arc::clone(&self.config.session_store),
            Arc::clone(&self.config.secure_channel_store),
            self.config.discovery_manager.clone(),
            Arc::clone(&inner.reverse_connect),
        )?;

        inner.housekeeping_callback_id = Some(housekeeping_id);
        inner.start_time = Some(self.config.clock.now());
        inner.state = ServerState::Started;
        Ok(())
    }

    /// Pumps the event loop for at most 50 ms and reports how long the caller can
    /// sleep before the next cyclic callback is due.
    pub async fn iterate(&self) -> Result<Duration, ServerError> {
        self.config.event_loop.run(DEFAULT_ITERATE_TIMEOUT).await?;
        let now = self.config.clock.now();
        let wait = match self.config.event_loop.next_cyclic_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(DEFAULT_ITERATE_TIMEOUT),
            None => DEFAULT_ITERATE_TIMEOUT,
        };
        Ok(wait)
    }

    /// `setServerShutdown`: with a zero delay, tells the caller to shut down
    /// immediately; otherwise records a deadline `shutdown_delay` from now and tells
    /// the caller to keep iterating until [`test_shutdown_condition`](Self::test_shutdown_condition) trips.
    pub async fn set_server_shutdown(&self, shutdown_delay: Duration) -> ShutdownDisposition {
        if shutdown_delay.is_zero() {
            return ShutdownDisposition::StopNow;
        }
        let mut inner = self.inner.lock().await;
        let now = self.config.clock.now();
        inner.end_time = Some(now.checked_add(shutdown_delay).unwrap_or(now));
        ShutdownDisposition::Continue
    }

    pub async fn test_shutdown_condition(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.end_time {
            Some(end_time) => end_time.has_passed(self.config.clock.now()),
            None => false,
        }
    }

    /// Cancels housekeeping, tears down every reverse-connect entry and secure
    /// channel, closes listeners, and drains the event loop to a stopped state.
    ///
    /// The service mutex is held only for the bookkeeping step (cancel housekeeping,
    /// mark reverse-connect entries for teardown) and for the final state
    /// transition — not across the drain loop itself, so a long drain never blocks
    /// unrelated reads of server state such as [`Server::state`].
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ServerState::Stopped {
                return Ok(());
            }
            inner.state = ServerState::ShuttingDown;

            if let Some(id) = inner.housekeeping_callback_id.take() {
                self.config.event_loop.remove_callback(id);
            }

            for entry in inner.reverse_connect.list() {
                if let Ok(Some(connection_id)) = inner.reverse_connect.remove(entry.handle) {
                    self.close_on_every_manager(connection_id);
                }
            }
        }

        self.config.event_loop.stop().await;
        let drain_start = self.config.clock.now();
        loop {
            let status = self.config.event_loop.run(DEFAULT_SHUTDOWN_DRAIN_TIMEOUT).await?;
            if matches!(status, RunStatus::Stopped) {
                break;
            }
            if self.config.clock.now().saturating_duration_since(drain_start) >= self.config.shutdown_grace_period {
                break;
            }
        }

        let mut inner = self.inner.lock().await;
        inner.state = ServerState::Stopped;
        inner.start_time = None;
        inner.end_time = None;
        Ok(())
    }

    fn close_on_every_manager(&self, connection_id: opcua_core::ConnectionId) {
        for source in self.config.event_loop.event_sources() {
            if let Some(manager) = source.as_connection_manager() {
                manager.close_connection(connection_id);
            }
        }
    }

    /// Requires `shutdown` to have completed; clears every collaborator and the
    /// admin session.
    pub async fn delete(&self) -> Result<(), ServerError> {
        {
            let inner = self.inner.lock().await;
            if inner.state != ServerState::Stopped {
                return Err(ServerError::invalid_argument("delete requires shutdown to have completed first"));
            }
        }
        self.clear_collaborators();
        self.inner.lock().await.admin_session_id.clear();
        Ok(())
    }

    /// Convenience main loop: `startup`, then `iterate` until `running` is cleared or
    /// a pending shutdown's deadline trips, then `shutdown`. `delete` is left to the
    /// caller; `delete` is a separate, explicit step the caller takes afterward.
    pub async fn run(&self, running: &AtomicBool) -> Result<(), ServerError> {
        self.startup().await?;
        while running.load(Ordering::SeqCst) {
            self.iterate().await?;
            if self.test_shutdown_condition().await {
                break;
            }
        }
        self.shutdown().await
    }

    pub async fn add_namespace(&self, uri: &str) -> Result<u16, ServerError> {
        self.inner.lock().await.namespaces.add(uri)
    }

    pub async fn namespace_by_uri(&self, uri: &str) -> Result<u16, ServerError> {
        self.inner.lock().await.namespaces.lookup_by_uri(uri)
    }

    pub async fn namespace_by_index(&self, index: u16) -> Result<String, ServerError> {
        self.inner.lock().await.namespaces.lookup_by_index(index).map(str::to_string)
    }

    pub fn for_each_child_node_call(
        &self,
        node: &NodeId,
        visit: &mut dyn FnMut(&ChildRef) -> Result<(), ServerError>,
    ) -> Result<(), ServerError> {
        util::for_each_child_node_call(&self.config.node_store, node, visit)
    }

    /// Holds the service mutex across certificate install *and* the subsequent
    /// session/secure-channel closures, so callers never observe a window where the
    /// new certificate is live but old sessions are still being torn down.
    pub async fn update_certificate(
        &self,
        security_policy_uri: &str,
        old_certificate: &[u8],
        new_certificate: &[u8],
        new_private_key: &[u8],
        close_sessions: bool,
        close_secure_channels: bool,
    ) -> Result<CertificateUpdateOutcome, ServerError> {
        let _inner = self.inner.lock().await;
        certificate::update_certificate(
            &self.config.security_policies,
            &self.config.session_store,
            &self.config.secure_channel_store,
            &self.config.endpoints,
            security_policy_uri,
            old_certificate,
            new_certificate,
            new_private_key,
            close_sessions,
            close_secure_channels,
        )
    }

    /// `addReverseConnect`: registers a new outbound target, retried at the 1 Hz
    /// housekeeping cadence until it connects. `state_callback`, when given, fires
    /// with `context` on every subsequent state transition (`closed → connecting →
    /// connected`, and back) until the entry is removed.
    pub async fn add_reverse_connect(
        &self,
        url: impl Into<String>,
        state_callback: Option<crate::reverse_connect::ReverseConnectStateCallback>,
        context: Arc<dyn Any + Send + Sync>,
    ) -> ReverseConnectHandle {
        self.inner.lock().await.reverse_connect.add(url, state_callback, context)
    }

    pub async fn remove_reverse_connect(&self, handle: ReverseConnectHandle) -> Result<(), ServerError> {
        let connection_id = self.inner.lock().await.reverse_connect.remove(handle)?;
        if let Some(connection_id) = connection_id {
            self.close_on_every_manager(connection_id);
        }
        Ok(())
    }

    /// Registers a one-shot timed callback. Exempt from the service mutex: the event
    /// loop serializes its own callback table internally (see the module doc).
    pub fn add_timed_callback(&self, deadline: MonotonicTime, callback: TimedCallback) -> Result<CallbackId, ServerError> {
        crate::callbacks::add_timed_callback(&self.config.event_loop, deadline, callback)
    }

    pub fn add_repeated_callback(
        &self,
        interval: Duration,
        initial_deadline: Option<MonotonicTime>,
        callback: TimedCallback,
    ) -> Result<CallbackId, ServerError> {
        crate::callbacks::add_repeated_callback(&self.config.event_loop, interval, initial_deadline, callback)
    }

    pub fn change_repeated_callback_interval(&self, id: CallbackId, interval: Duration) -> Result<(), ServerError> {
        crate::callbacks::change_repeated_callback_interval(&self.config.event_loop, id, interval)
    }

    pub fn remove_callback(&self, id: CallbackId) {
        crate::callbacks::remove_callback(&self.config.event_loop, id);
    }

    pub fn get_statistics(&self) -> ServerStatistics {
        stats::snapshot(&self.config.session_store, &self.config.secure_channel_store)
    }
}
