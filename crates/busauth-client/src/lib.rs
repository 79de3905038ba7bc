//! busauth-client: client side of the message-bus authentication handshake.
//!
//! Negotiates a session over an already-open byte stream using the EXTERNAL,
//! DBUS_COOKIE_SHA1 and ANONYMOUS mechanisms, falling back from one to the
//! next as the server rejects them.
//!
//! # Quick Start
//!
//! ```no_run
//! use busauth_client::{authenticate, AuthConfig};
//! use std::os::unix::net::UnixStream;
//!
//! # fn example() -> busauth_client::AuthResult<()> {
//! let stream = UnixStream::connect("/run/dbus/system_bus_socket")?;
//! let stream = authenticate(stream, &AuthConfig::default())?;
//! // `stream` is now ready for the binary message protocol.
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cookie;
pub mod handshake;
pub mod identity;
pub mod observer;

// Re-export primary public types.
pub use auth::{
    Anonymous, Authenticator, ChallengeOutcome, ChallengeResponse, CookieSha1, External,
    MechanismKind,
};
pub use config::AuthConfig;
pub use cookie::{CookieLookup, CookieRecord, Keyring};
pub use handshake::{AuthenticatorQueue, Handshake, HandshakeState};
pub use observer::{HandshakeObserver, NoopObserver, TracingObserver};

// Re-export busauth-core error types for convenience.
pub use busauth_core::{AuthError, AuthResult, Connection};

/// Authenticate `conn` with the mechanisms from `config`.
///
/// Returns the connection ready for post-authentication traffic, or closes it
/// and returns the reason for failure.
pub fn authenticate<C: Connection>(conn: C, config: &AuthConfig) -> AuthResult<C> {
    Handshake::new(conn, config.build_queue())
        .with_max_line_len(config.max_line_len)
        .authenticate()
}
