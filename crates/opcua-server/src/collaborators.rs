//! Narrow trait boundaries toward the subsystems this crate treats as external
//! collaborators: the node store, the secure-channel manager, the session manager,
//! discovery, and (optionally) PubSub and the async manager. None of their concrete
//! implementations live here; the server core only ever calls through these traits.
//!
//! Every collaborator is `init`/`clear` symmetric so `Server::init`/`Server::delete`
//! can drive them uniformly regardless of which optional subsystems are present.

use std::sync::Arc;

use opcua_core::ServerError;

/// Common lifecycle every external collaborator participates in.
pub trait ServerComponent: Send + Sync {
    fn init(&self) -> Result<(), ServerError>;
    fn clear(&self);
}

/// A node identifier. Kept deliberately minimal: the address-space/information model
/// is out of scope here, so this exists only to give [`NodeStore`] and
/// [`forEachChildNodeCall`](crate::util::for_each_child_node_call) compile-time-checked
/// types instead of opaque byte strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace_index: u16,
    pub identifier: String,
}

impl NodeId {
    pub fn new(namespace_index: u16, identifier: impl Into<String>) -> Self {
        Self { namespace_index, identifier: identifier.into() }
    }
}

/// One child reference as browsed from a node, local-only (no remote server
/// references followed).
#[derive(Debug, Clone)]
pub struct ChildRef {
    pub child_id: NodeId,
    pub is_inverse: bool,
    pub reference_type_id: NodeId,
}

/// The address-space/node-store collaborator. Only the browse surface needed by
/// `forEachChildNodeCall` is modeled; encoding, attribute storage, and the rest of the
/// information model live entirely outside this crate.
pub trait NodeStore: ServerComponent {
    /// Local children of `node`, forward and inverse references combined, already
    /// filtered to local-only targets.
    fn children(&self, node: &NodeId) -> Vec<ChildRef>;
}

/// Session-count counters for the statistics snapshot (component I).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub current: u32,
    pub cumulated: u64,
    pub security_rejected: u64,
    pub rejected: u64,
    pub timeout: u64,
    pub abort: u64,
}

/// Secure-channel counters for the statistics snapshot (component I).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecureChannelCounters {
    pub current: u32,
    pub cumulated: u64,
    pub rejected: u64,
    pub timeout: u64,
    pub abort: u64,
}

/// The session-service collaborator. Housekeeping (component F) drives expiry;
/// certificate rotation (component G) drives forced closure by certificate.
pub trait SessionStore: ServerComponent {
    /// Expires every session whose `validTill` is at or before `now`. Returns the
    /// number of sessions removed.
    fn expire_before(&self, now: opcua_core::MonotonicTime) -> usize;

    /// Closes every session bound to a secure channel whose security policy carries
    /// `old_certificate` as its local certificate, with diagnostic reason "close".
    /// Returns the number of sessions removed.
    fn close_sessions_with_certificate(&self, old_certificate: &[u8]) -> usize;

    fn counters(&self) -> SessionCounters;
}

/// The secure-channel collaborator, mirroring [`SessionStore`]'s shape.
pub trait SecureChannelStore: ServerComponent {
    fn expire_before(&self, now: opcua_core::MonotonicTime) -> usize;

    /// Shuts down every channel whose security policy carries `old_certificate`.
    /// Returns the number of channels closed.
    fn close_channels_with_certificate(&self, old_certificate: &[u8]) -> usize;

    fn counters(&self) -> SecureChannelCounters;
}

/// Local/mDNS discovery registration bookkeeping. Present only when discovery is
/// enabled; a server without it simply never constructs one.
pub trait DiscoveryManager: ServerComponent {
    fn expire_before(&self, now: opcua_core::MonotonicTime) -> usize;
}

/// Marker collaborator for the optional async manager (multithreading level ≥ 100).
/// This core never itself releases the service mutex around long operations; a
/// concrete async manager is free to do so internally.
pub trait AsyncManager: ServerComponent {}

/// Marker collaborator for the optional PubSub subsystem.
pub trait PubSubManager: ServerComponent {}

/// Security mode advertised by an [`EndpointDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

/// Minimal endpoint-description record: enough fields for certificate rotation and
/// discovery-URL derivation to be well-typed without pulling in the full
/// application-description/user-token-policy model.
#[derive(Debug, Clone)]
pub struct EndpointDescription {
    pub url: String,
    pub security_policy_uri: String,
    pub security_mode: SecurityMode,
    pub server_certificate: Vec<u8>,
    /// The application description's discovery URLs, derived at `startup` from every
    /// configured server URL whose host is non-empty (an empty host means "listen on
    /// all interfaces" and is not itself a reachable discovery target).
    pub discovery_urls: Vec<String>,
}

impl EndpointDescription {
    pub fn new(
        url: impl Into<String>,
        security_policy_uri: impl Into<String>,
        security_mode: SecurityMode,
        server_certificate: Vec<u8>,
    ) -> Self {
        Self {
            url: url.into(),
            security_policy_uri: security_policy_uri.into(),
            security_mode,
            server_certificate,
            discovery_urls: Vec::new(),
        }
    }
}

/// One security policy's certificate/key swap surface, looked up by URI during
/// certificate rotation.
pub trait SecurityPolicy: Send + Sync {
    fn uri(&self) -> &str;
    fn certificate(&self) -> Vec<u8>;
    fn update_certificate_and_key(&self, certificate: &[u8], private_key: &[u8]) -> Result<(), ServerError>;
}

/// Registry of configured security policies, looked up by URI.
pub trait SecurityPolicyRegistry: Send + Sync {
    fn by_uri(&self, uri: &str) -> Option<Arc<dyn SecurityPolicy>>;
    fn all(&self) -> Vec<Arc<dyn SecurityPolicy>>;
}
