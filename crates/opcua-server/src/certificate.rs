//! Certificate rotation (component G): `updateCertificate` swaps the certificate and
//! private key behind a security policy and, optionally, force-closes sessions and
//! secure channels still bound to the old certificate.
//!
//! The whole operation runs under the single caller-held service mutex: the certificate install and the
//! subsequent closures are one atomic step from the outside, not "install, then
//! separately and maybe-later close" — a reader watching session/channel counters
//! never observes a moment where the new certificate is live but old sessions are
//! still being torn down from a prior call.

use std::sync::Arc;

use parking_lot::Mutex;

use opcua_core::ServerError;

use crate::collaborators::{EndpointDescription, SecureChannelStore, SecurityPolicyRegistry, SessionStore};

/// Outcome of one [`update_certificate`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateUpdateOutcome {
    pub sessions_closed: usize,
    pub secure_channels_closed: usize,
    pub endpoints_updated: usize,
}

/// Installs `new_certificate`/`new_private_key` on the security policy identified by
/// `security_policy_uri`, force-closes sessions and/or secure channels still bound to
/// `old_certificate`, then replaces `server_certificate` on every endpoint that
/// currently advertises `old_certificate`. Only `security_policy_uri`,
/// `old_certificate`, `new_certificate`, and `new_private_key` are null/empty-checked;
/// `close_sessions` and `close_secure_channels` are plain booleans and are never
/// "invalid" on their own, even both `false` (a deliberately silent no-op on the
/// closure side).
#[allow(clippy::too_many_arguments)]
pub fn update_certificate(
    security_policies: &Arc<dyn SecurityPolicyRegistry>,
    session_store: &Arc<dyn SessionStore>,
    secure_channel_store: &Arc<dyn SecureChannelStore>,
    endpoints: &Mutex<Vec<EndpointDescription>>,
    security_policy_uri: &str,
    old_certificate: &[u8],
    new_certificate: &[u8],
    new_private_key: &[u8],
    close_sessions: bool,
    close_secure_channels: bool,
) -> Result<CertificateUpdateOutcome, ServerError> {
    if security_policy_uri.is_empty() {
        return Err(ServerError::invalid_argument("security policy URI must not be empty"));
    }
    if old_certificate.is_empty() {
        return Err(ServerError::invalid_argument("old certificate must not be empty"));
    }
    if new_certificate.is_empty() {
        return Err(ServerError::invalid_argument("new certificate must not be empty"));
    }
    if new_private_key.is_empty() {
        return Err(ServerError::invalid_argument("new private key must not be empty"));
    }

    let policy = security_policies
        .by_uri(security_policy_uri)
        .ok_or_else(|| ServerError::invalid_argument(format!("unknown security policy `{security_policy_uri}`")))?;

    policy.update_certificate_and_key(new_certificate, new_private_key)?;
    tracing::info!(security_policy_uri, "installed rotated certificate");

    let mut outcome = CertificateUpdateOutcome::default();
    if close_sessions {
        outcome.sessions_closed = session_store.close_sessions_with_certificate(old_certificate);
    }
    if close_secure_channels {
        outcome.secure_channels_closed = secure_channel_store.close_channels_with_certificate(old_certificate);
    }

    {
        let mut endpoints = endpoints.lock();
        for endpoint in endpoints.iter_mut() {
            if endpoint.server_certificate == old_certificate {
                endpoint.server_certificate = new_certificate.to_vec();
                outcome.endpoints_updated += 1;
            }
        }
    }

    if outcome.sessions_closed > 0 || outcome.secure_channels_closed > 0 || outcome.endpoints_updated > 0 {
        tracing::info!(
            sessions_closed = outcome.sessions_closed,
            secure_channels_closed = outcome.secure_channels_closed,
            endpoints_updated = outcome.endpoints_updated,
            "closed connections and endpoints bound to the rotated-out certificate"
        );
    }

    Ok(outcome)
}
