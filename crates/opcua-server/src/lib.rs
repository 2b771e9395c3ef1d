//! An embeddable OPC UA server core: lifecycle, namespace table, timed callbacks,
//! listener fan-out, reverse-connect, periodic housekeeping, and certificate rotation,
//! built on the [`opcua_core::EventLoop`] contract so the scheduler and transport are
//! swappable without touching this crate.
//!
//! # Scope (Why)
//! This crate owns the parts of an OPC UA server that are protocol-adjacent but not
//! protocol-specific: the state machine that takes a server from constructed to
//! running to torn down, the namespace-URI table, the registry of reverse-connect
//! targets, and the 1 Hz housekeeping tick. It does not implement the secure-channel
//! handshake, session services, or the address-space/information model — those are
//! supplied by the embedder through the narrow traits in [`collaborators`].
//!
//! # Concurrency model
//! Every public operation on [`server::Server`] is documented as running with a single
//! service mutex held for its entire duration — including `updateCertificate`, which
//! holds it across certificate install *and* the subsequent session/channel closure
//! rather than re-acquiring per step. Nothing in this crate spawns work that touches
//! server state without that lock; the only exception is the event loop itself, whose
//! job is precisely to serialize timed and network callbacks onto one thread before
//! they ever reach this crate's API.

pub mod callbacks;
pub mod certificate;
pub mod collaborators;
pub mod config;
pub mod housekeeping;
pub mod listener;
pub mod namespace;
pub mod reverse_connect;
pub mod server;
pub mod stats;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use certificate::CertificateUpdateOutcome;
pub use collaborators::{
    AsyncManager, ChildRef, DiscoveryManager, EndpointDescription, NodeId, NodeStore,
    PubSubManager, SecureChannelCounters, SecureChannelStore, SecurityMode, SecurityPolicy,
    SecurityPolicyRegistry, ServerComponent, SessionCounters, SessionStore,
};
pub use config::{ServerBuilder, ServerConfig};
pub use listener::{parse_server_url, ParsedServerUrl};
pub use namespace::NamespaceTable;
pub use reverse_connect::{
    ReverseConnectEntry, ReverseConnectManager, ReverseConnectState, ReverseConnectStateCallback,
};
pub use server::{Server, ServerState, ShutdownDisposition};
pub use stats::ServerStatistics;
