//! Diagnostic hooks for the handshake.
//!
//! Nothing here affects the protocol. The default observer forwards to
//! `tracing`; callers can inject their own sink or silence it.

use crate::handshake::HandshakeState;
use busauth_core::AuthError;
use std::time::Duration;
use tracing::{debug, warn};

/// Receives handshake events. Every method defaults to a no-op.
pub trait HandshakeObserver {
    /// A line is about to be written (without `\r\n`).
    fn on_send(&self, _line: &str) {}

    /// A reply line was read and split into fields.
    fn on_receive(&self, _fields: &[String]) {}

    fn on_transition(&self, _from: HandshakeState, _to: HandshakeState) {}

    /// A mechanism became the active one.
    fn on_mechanism(&self, _name: &str) {}

    /// A mechanism could not produce credentials or answer a challenge.
    fn on_mechanism_failed(&self, _name: &str, _error: &AuthError) {}

    /// A cookie was missing from the keyring; the lookup sleeps `delay` and tries again.
    fn on_cookie_retry(&self, _context: &str, _id: u32, _delay: Duration) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl HandshakeObserver for TracingObserver {
    fn on_send(&self, line: &str) {
        debug!(line, "auth send");
    }

    fn on_receive(&self, fields: &[String]) {
        debug!(?fields, "auth receive");
    }

    fn on_transition(&self, from: HandshakeState, to: HandshakeState) {
        if from != to {
            debug!(?from, ?to, "auth state");
        }
    }

    fn on_mechanism(&self, name: &str) {
        debug!(mechanism = name, "trying mechanism");
    }

    fn on_mechanism_failed(&self, name: &str, error: &AuthError) {
        warn!(mechanism = name, "mechanism failed: {}", error);
    }

    fn on_cookie_retry(&self, context: &str, id: u32, delay: Duration) {
        warn!(
            context,
            id,
            delay_ms = delay.as_millis() as u64,
            "cookie not found, retrying"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl HandshakeObserver for NoopObserver {}

impl<O: HandshakeObserver + ?Sized> HandshakeObserver for &O {
    fn on_send(&self, line: &str) {
        (**self).on_send(line)
    }

    fn on_receive(&self, fields: &[String]) {
        (**self).on_receive(fields)
    }

    fn on_transition(&self, from: HandshakeState, to: HandshakeState) {
        (**self).on_transition(from, to)
    }

    fn on_mechanism(&self, name: &str) {
        (**self).on_mechanism(name)
    }

    fn on_mechanism_failed(&self, name: &str, error: &AuthError) {
        (**self).on_mechanism_failed(name, error)
    }

    fn on_cookie_retry(&self, context: &str, id: u32, delay: Duration) {
        (**self).on_cookie_retry(context, id, delay)
    }
}
