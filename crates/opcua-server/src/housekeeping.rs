//! Periodic housekeeping (component F): one 1 Hz cyclic callback, registered at
//! server startup, that expires timed-out sessions and secure channels, retries
//! reverse-connect targets, and expires discovery registrations.
//!
//! All of this runs from inside a timed callback, which the event loop guarantees
//! never overlaps a network callback — so housekeeping never needs to take any lock
//! beyond what its collaborators already serialize internally.

use std::sync::Arc;
use std::time::Duration;

use opcua_core::{CallbackId, CycleMissPolicy, EventLoop, MonotonicTime, ServerError};

use crate::collaborators::{DiscoveryManager, SecureChannelStore, SessionStore};
use crate::reverse_connect::ReverseConnectManager;

pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(1000);

/// Registers the 1 Hz housekeeping callback. Returns the callback id so
/// [`crate::server::Server::shutdown`] can remove it.
pub fn start(
    event_loop: &Arc<dyn EventLoop>,
    interval: Duration,
    session_store: Arc<dyn SessionStore>,
    secure_channel_store: Arc<dyn SecureChannelStore>,
    discovery_manager: Option<Arc<dyn DiscoveryManager>>,
    reverse_connect: Arc<ReverseConnectManager>,
) -> Result<CallbackId, ServerError> {
    event_loop.add_cyclic_callback(
        interval,
        None,
        CycleMissPolicy::FireWithCurrentTime,
        Box::new(move |now| {
            run_once(now, &session_store, &secure_channel_store, discovery_manager.as_deref(), &reverse_connect);
        }),
    )
}

/// One housekeeping pass, factored out of [`start`] so tests can drive it directly
/// against a fixed `now` instead of waiting on the event loop.
pub fn run_once(
    now: MonotonicTime,
    session_store: &Arc<dyn SessionStore>,
    secure_channel_store: &Arc<dyn SecureChannelStore>,
    discovery_manager: Option<&dyn DiscoveryManager>,
    reverse_connect: &Arc<ReverseConnectManager>,
) {
    let expired_sessions = session_store.expire_before(now);
    if expired_sessions > 0 {
        tracing::debug!(expired_sessions, "housekeeping expired timed-out sessions");
    }

    let expired_channels = secure_channel_store.expire_before(now);
    if expired_channels > 0 {
        tracing::debug!(expired_channels, "housekeeping expired timed-out secure channels");
    }

    if let Some(discovery) = discovery_manager {
        let expired_registrations = discovery.expire_before(now);
        if expired_registrations > 0 {
            tracing::debug!(expired_registrations, "housekeeping expired discovery registrations");
        }
    }

    reverse_connect.retry_tick(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{SecureChannelCounters, ServerComponent, SessionCounters};
    use crate::test_support::FakeEventLoop;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSessionStore {
        expired: AtomicUsize,
    }
    impl ServerComponent for CountingSessionStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SessionStore for CountingSessionStore {
        fn expire_before(&self, _now: MonotonicTime) -> usize {
            self.expired.fetch_add(1, Ordering::SeqCst);
            2
        }
        fn close_sessions_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> SessionCounters {
            Default::default()
        }
    }

    struct NoopSecureChannelStore;
    impl ServerComponent for NoopSecureChannelStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SecureChannelStore for NoopSecureChannelStore {
        fn expire_before(&self, _now: MonotonicTime) -> usize {
            0
        }
        fn close_channels_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> SecureChannelCounters {
            Default::default()
        }
    }

    #[test]
    fn run_once_calls_every_collaborator() {
        let session_store: Arc<dyn SessionStore> = Arc::new(CountingSessionStore { expired: AtomicUsize::new(0) });
        let secure_channel_store: Arc<dyn SecureChannelStore> = Arc::new(NoopSecureChannelStore);
        let event_loop: Arc<dyn EventLoop> = Arc::new(FakeEventLoop::new());
        let reverse_connect = ReverseConnectManager::new(Arc::clone(&event_loop));

        run_once(MonotonicTime::now(), &session_store, &secure_channel_store, None, &reverse_connect);
        run_once(MonotonicTime::now(), &session_store, &secure_channel_store, None, &reverse_connect);
    }

    #[tokio::test]
    async fn start_registers_a_cyclic_callback() {
        let event_loop: Arc<dyn EventLoop> = Arc::new(FakeEventLoop::new());
        let session_store: Arc<dyn SessionStore> = Arc::new(CountingSessionStore { expired: AtomicUsize::new(0) });
        let secure_channel_store: Arc<dyn SecureChannelStore> = Arc::new(NoopSecureChannelStore);
        let reverse_connect = ReverseConnectManager::new(Arc::clone(&event_loop));

        let id = start(&event_loop, Duration::from_millis(10), session_store, secure_channel_store, None, reverse_connect)
            .unwrap();

        event_loop.run(Duration::from_millis(10)).await.unwrap();
        opcua_core::EventLoop::remove_callback(event_loop.as_ref(), id);
    }
}
