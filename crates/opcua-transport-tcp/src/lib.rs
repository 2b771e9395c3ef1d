//! `opcua-transport-tcp`
//!
//! ## Design motivation (Why)
//! - Provides the `tcp` transport that the listener fan-out (component D) and the
//!   reverse-connect manager (component E) both drive through the
//!   [`opcua_core::ConnectionManager`] contract, in listen mode for the former and
//!   dial mode for the latter.
//! - Connection accept/dial results are reported exclusively through the
//!   `NetworkCallback` passed to `open_connection`; this crate performs no blocking
//!   I/O on the caller's thread.
//!
//! ## Core contract (What)
//! - [`TcpConnectionManager::new`] takes an [`opcua_core::NetworkEventSink`] so that
//!   every accepted/dialed connection's notification is delivered on the owning event
//!   loop's thread rather than from whatever Tokio task observed the socket event.
//! - `open_connection` with `listen = true` binds and spawns an accept loop; with
//!   `listen = false` it dials the given `address`/`port` once.
//!
//! ## Implementation strategy (How)
//! - Built directly on `tokio::net::{TcpListener, TcpStream}`; `tokio::select!`
//!   combines the accept loop with a shutdown signal so `close_connection`/manager
//!   teardown cancels outstanding accepts promptly.

mod channel;
mod listener;
mod manager;

pub use channel::TcpChannel;
pub use listener::TcpListener;
pub use manager::TcpConnectionManager;
