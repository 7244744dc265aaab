//! The three-step HMAC-SHA1 nonce handshake gating request forwarding.

use bd_protocol::{hmac_sha1, verify_hmac_sha1, HMAC_DIGEST_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Disabled,
    Enabled,
    NonceSent,
    Done,
}

impl AuthState {
    /// The starting state for a freshly accepted client.
    pub fn initial(secret_configured: bool) -> AuthState {
        if secret_configured { AuthState::Enabled } else { AuthState::Disabled }
    }

    /// Whether a request with `uid != 1` may be forwarded to hardware in
    /// this state.
    pub fn forwarding_allowed(self) -> bool {
        matches!(self, AuthState::Disabled | AuthState::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Send `server_nonce` back to the client and transition to `NonceSent`.
    SendNonce(u32),
    /// Authentication succeeded; transition to `Done`. `respond` is set when
    /// the request had `response_expected`.
    Authenticated { respond: bool },
    /// Protocol violation: disconnect, no response.
    Disconnect,
}

/// `GET_AUTHENTICATION_NONCE` handling. `state` is mutated in place;
/// `server_nonce` is the value assigned to this client at accept time.
pub fn handle_get_nonce(state: &mut AuthState, server_nonce: u32) -> AuthOutcome {
    match *state {
        AuthState::Enabled | AuthState::Done => {
            *state = AuthState::NonceSent;
            AuthOutcome::SendNonce(server_nonce)
        }
        AuthState::Disabled | AuthState::NonceSent => AuthOutcome::Disconnect,
    }
}

/// `AUTHENTICATE` handling: `client_nonce`/`digest` come from the request
/// payload, `secret` from config, `server_nonce` from the client's
/// connection-time value.
pub fn handle_authenticate(
    state: &mut AuthState,
    secret: &[u8],
    server_nonce: u32,
    client_nonce: u32,
    digest: &[u8; HMAC_DIGEST_LEN],
    response_expected: bool,
) -> AuthOutcome {
    if *state != AuthState::NonceSent {
        return AuthOutcome::Disconnect;
    }
    if verify_hmac_sha1(secret, server_nonce, client_nonce, digest) {
        *state = AuthState::Done;
        AuthOutcome::Authenticated { respond: response_expected }
    } else {
        AuthOutcome::Disconnect
    }
}

/// Computes the digest a compliant client would send, for tests and for the
/// daemon's own fixed test vector check.
pub fn expected_digest(secret: &[u8], server_nonce: u32, client_nonce: u32) -> [u8; HMAC_DIGEST_LEN] {
    hmac_sha1(secret, server_nonce, client_nonce)
}
