//! Listener fan-out (component D): turns the configured server URLs into
//! `open_connection(listen = true, ...)` calls against whichever registered connection
//! manager advertises the matching protocol.
//!
//! Each URL is tried against every connection manager the event loop exposes, in
//! registration order, stopping at the first manager whose `open_connection` call
//! returns `Ok` — "first manager success wins". A URL that no manager
//! accepts is logged and skipped rather than treated as fatal: a server with three
//! configured URLs and one bad listener should still serve the other two.

use std::any::Any;
use std::sync::Arc;

use opcua_core::{ConnectionParams, EventLoop, NetworkCallback, ServerError};

pub const DEFAULT_PORT: u16 = 4840;

/// A parsed `opc.tcp://[host][:port][/path]` endpoint URL. Only the scheme, host, and
/// port are meaningful to connection-manager dispatch; the path is retained for
/// endpoint-description bookkeeping but otherwise unused here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedServerUrl {
    pub scheme: String,
    pub host: Option<String>,
    pub port: u16,
    pub path: String,
}

/// Maps a server URL's scheme to the transport name a [`opcua_core::ConnectionManager`]
/// advertises via `protocol()`, e.g. `"opc.tcp"` → `"tcp"`. Schemes without an `opc.`
/// prefix are passed through unchanged (so a bare `"tcp"`/`"udp"` scheme still
/// dispatches correctly against a manager advertising that same name).
pub fn transport_for_scheme(scheme: &str) -> &str {
    scheme.strip_prefix("opc.").unwrap_or(scheme)
}

/// Parses a server URL of the form `scheme://[host][:port][/path]`. A missing host
/// yields `host: None` (meaning "bind to all interfaces"); a missing port defaults to
/// [`DEFAULT_PORT`].
pub fn parse_server_url(url: &str) -> Result<ParsedServerUrl, ServerError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| ServerError::invalid_argument(format!("`{url}` is missing a scheme")))?;
    if scheme.is_empty() {
        return Err(ServerError::invalid_argument(format!("`{url}` has an empty scheme")));
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) if !port_str.is_empty() => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ServerError::invalid_argument(format!("`{url}` has an invalid port")))?;
            (host, port)
        }
        _ => (authority, DEFAULT_PORT),
    };

    Ok(ParsedServerUrl {
        scheme: scheme.to_string(),
        host: if host.is_empty() { None } else { Some(host.to_string()) },
        port,
        path: path.to_string(),
    })
}

/// Opens listeners for every URL in `server_urls` against the connection managers
/// currently registered on `event_loop`. Returns the number of URLs for which some
/// manager accepted the listen request; a return value smaller than
/// `server_urls.len()` means at least one URL had no matching manager, which the
/// caller should treat as a (logged) degraded start, not a fatal one.
pub fn open_listeners(
    event_loop: &Arc<dyn EventLoop>,
    server_urls: &[String],
    user_context: Arc<dyn Any + Send + Sync>,
    callback: NetworkCallback,
) -> usize {
    let sources = event_loop.event_sources();
    let mut opened = 0;

    for url in server_urls {
        let parsed = match parse_server_url(url) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(url, %error, "skipping unparsable server URL");
                continue;
            }
        };

        let params = ConnectionParams {
            port: Some(parsed.port),
            listen: true,
            address: parsed.host.map(|host| vec![host]),
        };

        let transport = transport_for_scheme(&parsed.scheme);
        let mut accepted = false;
        for source in &sources {
            let Some(manager) = source.as_connection_manager() else { continue };
            if manager.protocol() != transport {
                continue;
            }
            match manager.open_connection(params.clone(), Arc::clone(&user_context), Arc::clone(&callback)) {
                Ok(()) => {
                    accepted = true;
                    break;
                }
                Err(error) => {
                    tracing::warn!(url, %error, protocol = parsed.scheme, "connection manager declined listen request");
                }
            }
        }

        if accepted {
            opened += 1;
        } else {
            tracing::warn!(url, "no connection manager accepted this server URL");
        }
    }

    opened
}
