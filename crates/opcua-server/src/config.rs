//! Server configuration and its builder.
//!
//! A builder with chainable `configure_*` methods returning `Result<&mut Self, _>`, and
//! a single fallible `build()` step. `ServerConfig` itself is immutable once built —
//! matching the data model's "nested configuration (immutable after `new`)" — so the
//! only way to change it is to build a new one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use opcua_core::{Clock, EventLoop, ServerError, SystemClock};

use crate::collaborators::{
    AsyncManager, DiscoveryManager, EndpointDescription, NodeStore, PubSubManager,
    SecureChannelStore, SecurityPolicyRegistry, SessionStore,
};

pub const DEFAULT_PORT: u16 = 4840;
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_ITERATE_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// The server's immutable, builder-constructed configuration.
pub struct ServerConfig {
    pub server_urls: Vec<String>,
    pub application_uri: String,
    pub shutdown_grace_period: Duration,
    pub housekeeping_interval: Duration,
    pub max_server_connections: usize,
    /// Mutable behind a lock even though the rest of `ServerConfig` is immutable past
    /// `build`: certificate rotation (component G) and discovery-URL derivation at
    /// `startup` (component H) both need to patch these records in place.
    pub endpoints: Mutex<Vec<EndpointDescription>>,

    pub event_loop: Arc<dyn EventLoop>,
    pub clock: Arc<dyn Clock>,
    pub node_store: Arc<dyn NodeStore>,
    pub session_store: Arc<dyn SessionStore>,
    pub secure_channel_store: Arc<dyn SecureChannelStore>,
    pub discovery_manager: Option<Arc<dyn DiscoveryManager>>,
    pub async_manager: Option<Arc<dyn AsyncManager>>,
    pub pubsub_manager: Option<Arc<dyn PubSubManager>>,
    pub security_policies: Arc<dyn SecurityPolicyRegistry>,
}

impl ServerConfig {
    /// The server URLs to listen on, defaulting to `opc.tcp://:4840` when none are
    /// configured.
    pub fn effective_server_urls(&self) -> Vec<String> {
        if self.server_urls.is_empty() {
            vec![format!("opc.tcp://:{DEFAULT_PORT}")]
        } else {
            self.server_urls.clone()
        }
    }

    pub fn endpoints_snapshot(&self) -> Vec<EndpointDescription> {
        self.endpoints.lock().clone()
    }
}

/// Assembles a [`ServerConfig`]. Every `configure_*` method is infallible at the
/// field-assignment level (there is nothing to validate before `build`); `build` is
/// the sole fallible step, returning [`ServerError::FatalInit`] when a required
/// collaborator (node store, event loop) is missing.
#[derive(Default)]
pub struct ServerBuilder {
    server_urls: Vec<String>,
    application_uri: String,
    shutdown_grace_period: Duration,
    housekeeping_interval: Option<Duration>,
    max_server_connections: usize,
    endpoints: Vec<EndpointDescription>,

    event_loop: Option<Arc<dyn EventLoop>>,
    clock: Option<Arc<dyn Clock>>,
    node_store: Option<Arc<dyn NodeStore>>,
    session_store: Option<Arc<dyn SessionStore>>,
    secure_channel_store: Option<Arc<dyn SecureChannelStore>>,
    discovery_manager: Option<Arc<dyn DiscoveryManager>>,
    async_manager: Option<Arc<dyn AsyncManager>>,
    pubsub_manager: Option<Arc<dyn PubSubManager>>,
    security_policies: Option<Arc<dyn SecurityPolicyRegistry>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self { max_server_connections: 64, ..Self::default() }
    }

    pub fn configure_network(&mut self, server_urls: Vec<String>) -> Result<&mut Self, ServerError> {
        self.server_urls = server_urls;
        Ok(self)
    }

    pub fn configure_application_uri(&mut self, application_uri: impl Into<String>) -> Result<&mut Self, ServerError> {
        self.application_uri = application_uri.into();
        Ok(self)
    }

    pub fn configure_shutdown_grace_period(&mut self, grace_period: Duration) -> Result<&mut Self, ServerError> {
        self.shutdown_grace_period = grace_period;
        Ok(self)
    }

    pub fn configure_housekeeping_interval(&mut self, interval: Duration) -> Result<&mut Self, ServerError> {
        self.housekeeping_interval = Some(interval);
        Ok(self)
    }

    pub fn configure_max_server_connections(&mut self, max: usize) -> Result<&mut Self, ServerError> {
        self.max_server_connections = max;
        Ok(self)
    }

    pub fn configure_endpoints(&mut self, endpoints: Vec<EndpointDescription>) -> Result<&mut Self, ServerError> {
        self.endpoints = endpoints;
        Ok(self)
    }

    pub fn configure_event_loop(&mut self, event_loop: Arc<dyn EventLoop>) -> Result<&mut Self, ServerError> {
        self.event_loop = Some(event_loop);
        Ok(self)
    }

    pub fn configure_clock(&mut self, clock: Arc<dyn Clock>) -> Result<&mut Self, ServerError> {
        self.clock = Some(clock);
        Ok(self)
    }

    pub fn configure_node_store(&mut self, node_store: Arc<dyn NodeStore>) -> Result<&mut Self, ServerError> {
        self.node_store = Some(node_store);
        Ok(self)
    }

    pub fn configure_session_store(&mut self, session_store: Arc<dyn SessionStore>) -> Result<&mut Self, ServerError> {
        self.session_store = Some(session_store);
        Ok(self)
    }

    pub fn configure_secure_channel_store(
        &mut self,
        secure_channel_store: Arc<dyn SecureChannelStore>,
    ) -> Result<&mut Self, ServerError> {
        self.secure_channel_store = Some(secure_channel_store);
        Ok(self)
    }

    pub fn configure_discovery_manager(&mut self, manager: Arc<dyn DiscoveryManager>) -> Result<&mut Self, ServerError> {
        self.discovery_manager = Some(manager);
        Ok(self)
    }

    pub fn configure_async_manager(&mut self, manager: Arc<dyn AsyncManager>) -> Result<&mut Self, ServerError> {
        self.async_manager = Some(manager);
        Ok(self)
    }

    pub fn configure_pubsub_manager(&mut self, manager: Arc<dyn PubSubManager>) -> Result<&mut Self, ServerError> {
        self.pubsub_manager = Some(manager);
        Ok(self)
    }

    pub fn configure_security_policies(
        &mut self,
        registry: Arc<dyn SecurityPolicyRegistry>,
    ) -> Result<&mut Self, ServerError> {
        self.security_policies = Some(registry);
        Ok(self)
    }

    /// Assembles the immutable [`ServerConfig`]. Fails with
    /// [`ServerError::FatalInit`] when the node store or event loop — the two
    /// collaborators — were never configured.
    pub fn build(self) -> Result<ServerConfig, ServerError> {
        let event_loop = self.event_loop.ok_or_else(|| ServerError::fatal_init("no event loop configured"))?;
        let node_store = self.node_store.ok_or_else(|| ServerError::fatal_init("no node store configured"))?;
        let session_store =
            self.session_store.ok_or_else(|| ServerError::fatal_init("no session store configured"))?;
        let secure_channel_store = self
            .secure_channel_store
            .ok_or_else(|| ServerError::fatal_init("no secure-channel store configured"))?;
        let security_policies = self
            .security_policies
            .ok_or_else(|| ServerError::fatal_init("no security-policy registry configured"))?;

        Ok(ServerConfig {
            server_urls: self.server_urls,
            application_uri: self.application_uri,
            shutdown_grace_period: self.shutdown_grace_period,
            housekeeping_interval: self.housekeeping_interval.unwrap_or(DEFAULT_HOUSEKEEPING_INTERVAL),
            max_server_connections: self.max_server_connections,
            endpoints: Mutex::new(self.endpoints),
            event_loop,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            node_store,
            session_store,
            secure_channel_store,
            discovery_manager: self.discovery_manager,
            async_manager: self.async_manager,
            pubsub_manager: self.pubsub_manager,
            security_policies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChildRef, NodeId, SecurityMode, ServerComponent};
    use crate::test_support::FakeEventLoop;

    struct StubNodeStore;
    impl ServerComponent for StubNodeStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl NodeStore for StubNodeStore {
        fn children(&self, _node: &NodeId) -> Vec<ChildRef> {
            Vec::new()
        }
    }

    struct StubSessionStore;
    impl ServerComponent for StubSessionStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SessionStore for StubSessionStore {
        fn expire_before(&self, _now: opcua_core::MonotonicTime) -> usize {
            0
        }
        fn close_sessions_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> crate::collaborators::SessionCounters {
            Default::default()
        }
    }

    struct StubSecureChannelStore;
    impl ServerComponent for StubSecureChannelStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl SecureChannelStore for StubSecureChannelStore {
        fn expire_before(&self, _now: opcua_core::MonotonicTime) -> usize {
            0
        }
        fn close_channels_with_certificate(&self, _old_certificate: &[u8]) -> usize {
            0
        }
        fn counters(&self) -> crate::collaborators::SecureChannelCounters {
            Default::default()
        }
    }

    struct StubSecurityPolicyRegistry;
    impl SecurityPolicyRegistry for StubSecurityPolicyRegistry {
        fn by_uri(&self, _uri: &str) -> Option<Arc<dyn crate::collaborators::SecurityPolicy>> {
            None
        }
        fn all(&self) -> Vec<Arc<dyn crate::collaborators::SecurityPolicy>> {
            Vec::new()
        }
    }

    fn minimal_builder() -> ServerBuilder {
        let mut builder = ServerBuilder::new();
        builder.configure_event_loop(Arc::new(FakeEventLoop::new())).unwrap();
        builder.configure_node_store(Arc::new(StubNodeStore)).unwrap();
        builder.configure_session_store(Arc::new(StubSessionStore)).unwrap();
        builder.configure_secure_channel_store(Arc::new(StubSecureChannelStore)).unwrap();
        builder.configure_security_policies(Arc::new(StubSecurityPolicyRegistry)).unwrap();
        builder
    }

    #[test]
    fn build_fails_without_node_store() {
        let mut builder = ServerBuilder::new();
        builder.configure_event_loop(Arc::new(FakeEventLoop::new())).unwrap();
        let err = builder.build().unwrap_err();
        assert_eq!(err.kind(), opcua_core::ErrorKind::FatalInit);
    }

    #[test]
    fn build_succeeds_with_required_collaborators() {
        let config = minimal_builder().build().unwrap();
        assert_eq!(config.housekeeping_interval, DEFAULT_HOUSEKEEPING_INTERVAL);
    }

    #[test]
    fn empty_server_urls_default_to_standard_port() {
        let config = minimal_builder().build().unwrap();
        assert_eq!(config.effective_server_urls(), vec!["opc.tcp://:4840".to_string()]);
    }

    #[test]
    fn endpoints_round_trip_through_the_builder() {
        let mut builder = minimal_builder();
        builder
            .configure_endpoints(vec![EndpointDescription::new(
                "opc.tcp://:4840",
                "http://opcfoundation.org/UA/SecurityPolicy#None",
                SecurityMode::None,
                vec![1, 2, 3],
            )])
            .unwrap();
        let config = builder.build().unwrap();
        assert_eq!(config.endpoints_snapshot().len(), 1);
    }
}
