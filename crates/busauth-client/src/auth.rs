//! Authentication mechanisms.
//!
//! Each mechanism produces the initial response carried by `AUTH`, and may
//! answer server `DATA` challenges. Only DBUS_COOKIE_SHA1 is challenge-based.

use crate::cookie::{self, CookieChallenge, CookieLookup};
use crate::identity;
use crate::observer::HandshakeObserver;
use busauth_core::{hex_encode, AuthError, AuthResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identification string sent by ANONYMOUS unless configured otherwise.
pub const DEFAULT_ANONYMOUS_TRACE: &str = "busauth";

/// What the handshake should do with a challenge response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Send `DATA` and expect another challenge.
    Continue,
    /// Send `DATA` and expect `OK`.
    Ok,
    /// Send `ERROR`.
    Error,
}

/// Reply to a server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub outcome: ChallengeOutcome,
    /// Hex-encoded payload for `DATA`.
    pub data: String,
}

impl ChallengeResponse {
    pub fn ok(data: String) -> Self {
        Self {
            outcome: ChallengeOutcome::Ok,
            data,
        }
    }

    pub fn continue_with(data: String) -> Self {
        Self {
            outcome: ChallengeOutcome::Continue,
            data,
        }
    }

    pub fn error() -> Self {
        Self {
            outcome: ChallengeOutcome::Error,
            data: String::new(),
        }
    }
}

/// A credential mechanism.
pub trait Authenticator {
    /// Protocol keyword for `AUTH`.
    fn name(&self) -> &'static str;

    /// Hex-encoded initial response.
    fn initial_response(&mut self) -> AuthResult<String>;

    /// Answer a hex-encoded server challenge. Diagnostics go to `observer`.
    ///
    /// Mechanisms without a challenge step refuse by default.
    fn respond_to_challenge(
        &mut self,
        _hex_challenge: &str,
        _observer: &dyn HandshakeObserver,
    ) -> AuthResult<ChallengeResponse> {
        Err(AuthError::AuthenticationFailed(format!(
            "{} does not accept challenges",
            self.name()
        )))
    }
}

/// Mechanism tag, as named in configuration and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MechanismKind {
    #[serde(rename = "EXTERNAL")]
    External,
    #[serde(rename = "DBUS_COOKIE_SHA1")]
    CookieSha1,
    #[serde(rename = "ANONYMOUS")]
    Anonymous,
}

impl MechanismKind {
    /// Fixed priority order.
    pub const DEFAULT_ORDER: [MechanismKind; 3] = [
        MechanismKind::External,
        MechanismKind::CookieSha1,
        MechanismKind::Anonymous,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::External => External::NAME,
            MechanismKind::CookieSha1 => CookieSha1::NAME,
            MechanismKind::Anonymous => Anonymous::NAME,
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── ANONYMOUS ────────────────────────────────────────────────────────

/// Sends a fixed, hex-encoded trace string.
#[derive(Debug, Clone)]
pub struct Anonymous {
    trace: String,
}

impl Anonymous {
    pub const NAME: &'static str = "ANONYMOUS";

    pub fn new(trace: impl Into<String>) -> Self {
        Self {
            trace: trace.into(),
        }
    }
}

impl Default for Anonymous {
    fn default() -> Self {
        Self::new(DEFAULT_ANONYMOUS_TRACE)
    }
}

impl Authenticator for Anonymous {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initial_response(&mut self) -> AuthResult<String> {
        Ok(hex_encode(&self.trace))
    }
}

// ── EXTERNAL ─────────────────────────────────────────────────────────

/// Proves identity through the transport's peer credentials.
///
/// The initial response is the decimal uid with each digit character
/// hex-encoded: uid 1000 becomes `"31303030"`.
#[derive(Debug, Clone, Default)]
pub struct External {
    uid: Option<u32>,
}

impl External {
    pub const NAME: &'static str = "EXTERNAL";

    /// Use the effective uid of the calling process.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_uid(uid: u32) -> Self {
        Self { uid: Some(uid) }
    }
}

/// Hex-encode the ASCII decimal digits of `uid`, one character at a time.
pub fn encode_uid(uid: u32) -> String {
    uid.to_string()
        .chars()
        .map(|digit| format!("{:02x}", digit as u32))
        .collect()
}

impl Authenticator for External {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initial_response(&mut self) -> AuthResult<String> {
        let uid = match self.uid {
            Some(uid) => uid,
            None => identity::effective_uid()?,
        };
        Ok(encode_uid(uid))
    }
}

// ── DBUS_COOKIE_SHA1 ─────────────────────────────────────────────────

/// Challenge-response against a shared secret in the user's keyring.
#[derive(Debug, Clone)]
pub struct CookieSha1 {
    lookup: CookieLookup,
    login: Option<String>,
    client_challenge: Option<String>,
}

impl CookieSha1 {
    pub const NAME: &'static str = "DBUS_COOKIE_SHA1";

    pub fn new(lookup: CookieLookup) -> Self {
        Self {
            lookup,
            login: None,
            client_challenge: None,
        }
    }

    /// Override the login name sent in the initial response.
    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Use a fixed client challenge instead of a random one.
    pub fn with_client_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.client_challenge = Some(challenge.into());
        self
    }

    fn client_challenge_for(&self, server_challenge: &str) -> String {
        match &self.client_challenge {
            Some(fixed) => fixed.clone(),
            None => generate_client_challenge(server_challenge.len() / 2),
        }
    }
}

/// `len` random bytes, hex-encoded.
pub fn generate_client_challenge(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(&mut bytes[..]);
    hex_encode(bytes)
}

impl Authenticator for CookieSha1 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initial_response(&mut self) -> AuthResult<String> {
        let login = match &self.login {
            Some(login) => login.clone(),
            None => identity::login_name()?,
        };
        Ok(hex_encode(login))
    }

    fn respond_to_challenge(
        &mut self,
        hex_challenge: &str,
        observer: &dyn HandshakeObserver,
    ) -> AuthResult<ChallengeResponse> {
        let challenge = CookieChallenge::parse(hex_challenge)?;
        let client_challenge = self.client_challenge_for(&challenge.server_challenge);

        let record = self
            .lookup
            .find(&challenge.context, challenge.cookie_id, observer)?;
        let digest =
            cookie::response_digest(&challenge.server_challenge, &client_challenge, &record.secret);

        Ok(ChallengeResponse::ok(hex_encode(format!(
            "{client_challenge} {digest}"
        ))))
    }
}
