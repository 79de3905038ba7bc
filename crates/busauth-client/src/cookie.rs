//! DBUS_COOKIE_SHA1 support: keyring lookup and response digest.
//!
//! Keyrings live at `~/.dbus-keyrings/<context>`, one cookie per line:
//! `<id> <creation-time> <secret>`.

use crate::observer::HandshakeObserver;
use busauth_core::{codec, AuthError, AuthResult};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keyring directory name under the user's home.
pub const KEYRING_DIR_NAME: &str = ".dbus-keyrings";

/// Default number of extra lookup attempts after a miss.
pub const DEFAULT_RETRIES: u32 = 1;

/// Default pause before a retried lookup.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One cookie from a keyring file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    /// Keyring context (file name) the cookie came from.
    pub context: String,
    pub id: u32,
    /// Creation time, seconds since the epoch.
    pub created: i64,
    pub secret: String,
}

/// Parse a keyring file, skipping malformed lines.
pub fn parse_keyring(content: &str, context: &str) -> Vec<CookieRecord> {
    content
        .lines()
        .filter_map(|line| parse_keyring_line(line, context))
        .collect()
}

fn parse_keyring_line(line: &str, context: &str) -> Option<CookieRecord> {
    let mut fields = line.split_ascii_whitespace();
    let id = fields.next()?.parse().ok()?;
    let created = fields.next()?.parse().ok()?;
    let secret = fields.next()?.trim_end().to_string();

    Some(CookieRecord {
        context: context.to_string(),
        id,
        created,
        secret,
    })
}

/// Reject context names that could escape the keyring directory.
pub fn validate_context(context: &str) -> AuthResult<()> {
    if context.is_empty() {
        return Err(AuthError::InvalidChallenge("empty keyring context".into()));
    }
    if context.starts_with('.') || context.contains(&['/', '\\'][..]) {
        return Err(AuthError::InvalidChallenge(format!(
            "unsafe keyring context: {context:?}"
        )));
    }
    Ok(())
}

/// SHA-1 hex digest of `server_challenge:client_challenge:secret`.
pub fn response_digest(server_challenge: &str, client_challenge: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(client_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// A decoded DBUS_COOKIE_SHA1 server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChallenge {
    pub context: String,
    pub cookie_id: u32,
    /// The server's random challenge, as the text it sent.
    pub server_challenge: String,
}

impl CookieChallenge {
    /// Parse the hex payload of a server `DATA` line.
    pub fn parse(hex_data: &str) -> AuthResult<Self> {
        let raw = codec::hex_decode(hex_data)?;
        let text = String::from_utf8(raw)
            .map_err(|_| AuthError::InvalidChallenge("challenge is not UTF-8".into()))?;

        let fields: Vec<&str> = text.split_ascii_whitespace().collect();
        if fields.len() < 3 {
            return Err(AuthError::InvalidChallenge(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        }

        validate_context(fields[0])?;
        let cookie_id = fields[1]
            .parse()
            .map_err(|_| AuthError::InvalidChallenge(format!("bad cookie id: {:?}", fields[1])))?;

        Ok(Self {
            context: fields[0].to_string(),
            cookie_id,
            server_challenge: fields[2].to_string(),
        })
    }
}

/// File-based keyring directory.
#[derive(Debug, Clone)]
pub struct Keyring {
    dir: PathBuf,
}

impl Keyring {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Keyring at the default location (`~/.dbus-keyrings/`).
    pub fn default_location() -> AuthResult<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            AuthError::AuthenticationFailed("cannot determine home directory".into())
        })?;
        Ok(Self::new(home.join(KEYRING_DIR_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the keyring file for `context`.
    pub fn context_path(&self, context: &str) -> AuthResult<PathBuf> {
        validate_context(context)?;
        Ok(self.dir.join(context))
    }

    /// Find the first cookie with `id` in `context`.
    pub fn lookup(&self, context: &str, id: u32) -> AuthResult<CookieRecord> {
        let path = self.context_path(context)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AuthError::SecretNotFound {
                    context: context.to_string(),
                    id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        parse_keyring(&content, context)
            .into_iter()
            .find(|record| record.id == id)
            .ok_or_else(|| AuthError::SecretNotFound {
                context: context.to_string(),
                id,
            })
    }
}

/// Keyring lookup with a bounded retry on a miss.
#[derive(Debug, Clone)]
pub struct CookieLookup {
    keyring: Keyring,
    retries: u32,
    retry_delay: Duration,
}

impl CookieLookup {
    pub fn new(keyring: Keyring) -> Self {
        Self {
            keyring,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Look up a cookie, sleeping and retrying on [`AuthError::SecretNotFound`].
    ///
    /// Any other error is returned immediately. Each retry is reported to `observer`.
    pub fn find(
        &self,
        context: &str,
        id: u32,
        observer: &dyn HandshakeObserver,
    ) -> AuthResult<CookieRecord> {
        let mut retries_left = self.retries;
        loop {
            match self.keyring.lookup(context, id) {
                Err(AuthError::SecretNotFound { .. }) if retries_left > 0 => {
                    observer.on_cookie_retry(context, id, self.retry_delay);
                    retries_left -= 1;
                    std::thread::sleep(self.retry_delay);
                }
                other => return other,
            }
        }
    }
}
