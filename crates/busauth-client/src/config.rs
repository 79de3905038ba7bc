//! Handshake configuration, optionally loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! standard EXTERNAL, DBUS_COOKIE_SHA1, ANONYMOUS order.

use crate::auth::{Anonymous, CookieSha1, External, MechanismKind, DEFAULT_ANONYMOUS_TRACE};
use crate::cookie::{CookieLookup, Keyring, DEFAULT_RETRIES};
use crate::handshake::AuthenticatorQueue;
use crate::observer::{HandshakeObserver, TracingObserver};
use busauth_core::{AuthError, AuthResult, DEFAULT_MAX_LINE_LEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Handshake settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Mechanisms to try, in order.
    #[serde(default = "default_mechanisms")]
    pub mechanisms: Vec<MechanismKind>,

    /// Keyring directory (default `~/.dbus-keyrings`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring_dir: Option<PathBuf>,

    /// Extra cookie lookups after a miss.
    #[serde(default = "default_cookie_retries")]
    pub cookie_retries: u32,

    #[serde(default = "default_cookie_retry_delay_ms")]
    pub cookie_retry_delay_ms: u64,

    /// Longest reply line accepted, in bytes.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Trace string sent by ANONYMOUS.
    #[serde(default = "default_anonymous_trace")]
    pub anonymous_trace: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mechanisms: default_mechanisms(),
            keyring_dir: None,
            cookie_retries: default_cookie_retries(),
            cookie_retry_delay_ms: default_cookie_retry_delay_ms(),
            max_line_len: default_max_line_len(),
            anonymous_trace: default_anonymous_trace(),
        }
    }
}

fn default_mechanisms() -> Vec<MechanismKind> {
    MechanismKind::DEFAULT_ORDER.to_vec()
}

fn default_cookie_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_cookie_retry_delay_ms() -> u64 {
    1000
}

fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

fn default_anonymous_trace() -> String {
    DEFAULT_ANONYMOUS_TRACE.to_string()
}

impl AuthConfig {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        let config: AuthConfig = toml::from_str(&content).map_err(|e| {
            AuthError::Config(format!("failed to parse config at {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> AuthResult<Self> {
        toml::from_str(content).map_err(|e| AuthError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> AuthResult<String> {
        toml::to_string_pretty(self).map_err(|e| AuthError::Config(e.to_string()))
    }

    pub fn cookie_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cookie_retry_delay_ms)
    }

    /// The configured keyring, or the one under the home directory.
    pub fn keyring(&self) -> AuthResult<Keyring> {
        match &self.keyring_dir {
            Some(dir) => Ok(Keyring::new(dir)),
            None => Keyring::default_location(),
        }
    }

    /// Build the mechanism queue in configured order.
    ///
    /// DBUS_COOKIE_SHA1 is left out when no keyring directory can be resolved.
    /// An empty queue makes the handshake fail after the NUL byte.
    pub fn build_queue(&self) -> AuthenticatorQueue {
        self.build_queue_with(&TracingObserver)
    }

    /// [`build_queue`](Self::build_queue), reporting skipped mechanisms to `observer`.
    pub fn build_queue_with(&self, observer: &dyn HandshakeObserver) -> AuthenticatorQueue {
        let mut queue = AuthenticatorQueue::new();

        for kind in &self.mechanisms {
            match kind {
                MechanismKind::External => queue.push(Box::new(External::new())),
                MechanismKind::CookieSha1 => match self.keyring() {
                    Ok(keyring) => {
                        let lookup = CookieLookup::new(keyring)
                            .with_retry(self.cookie_retries, self.cookie_retry_delay());
                        queue.push(Box::new(CookieSha1::new(lookup)));
                    }
                    Err(e) => observer.on_mechanism_failed(kind.name(), &e),
                },
                MechanismKind::Anonymous => {
                    queue.push(Box::new(Anonymous::new(self.anonymous_trace.clone())))
                }
            }
        }

        queue
    }
}
