//! Read-only statistics snapshot (component I): aggregates the session and
//! secure-channel counters the respective collaborators already maintain. This module
//! owns no state of its own — it only shapes a point-in-time view for callers (a
//! diagnostics endpoint, a log line) that want both counter sets together.

use std::sync::Arc;

use crate::collaborators::{SecureChannelCounters, SecureChannelStore, SessionCounters, SessionStore};

/// A combined snapshot of session and secure-channel counters, as of the moment
/// [`snapshot`] was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatistics {
    pub sessions: SessionCounters,
    pub secure_channels: SecureChannelCounters,
}

/// Reads the current counters from both collaborators. Cheap and side-effect-free;
/// safe to call at any point in the server's lifecycle, including before `startup`.
pub fn snapshot(
    session_store: &Arc<dyn SessionStore>,
    secure_channel_store: &Arc<dyn SecureChannelStore>,
) -> ServerStatistics {
    ServerStatistics { sessions: session_store.counters(), secure_channels: secure_channel_store.counters() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ServerComponent;
    use opcua_core::{MonotonicTime, ServerError};

    struct FixedSessionStore(SessionCounters);
    impl ServerComponent for FixedSessionStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SessionStore for FixedSessionStore {
        fn expire_before(&self, _now: MonotonicTime) -> usize {
            0
        }
        fn close_sessions_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> SessionCounters {
            self.0
        }
    }

    struct FixedSecureChannelStore(SecureChannelCounters);
    impl ServerComponent for FixedSecureChannelStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SecureChannelStore for FixedSecureChannelStore {
        fn expire_before(&self, _now: MonotonicTime) -> usize {
            0
        }
        fn close_channels_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> SecureChannelCounters {
            self.0
        }
    }

    #[test]
    fn snapshot_combines_both_counter_sets() {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(FixedSessionStore(SessionCounters { current: 4, cumulated: 10, ..Default::default() }));
        let channels: Arc<dyn SecureChannelStore> =
            Arc::new(FixedSecureChannelStore(SecureChannelCounters { current: 2, ..Default::default() }));

        let stats = snapshot(&sessions, &channels);
        assert_eq!(stats.sessions.current, 4);
        assert_eq!(stats.sessions.cumulated, 10);
        assert_eq!(stats.secure_channels.current, 2);
    }
}
