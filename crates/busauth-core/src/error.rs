use thiserror::Error;

/// Errors produced by the authentication handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Every mechanism was exhausted, or a mechanism could not produce credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No cookie with the requested id exists in the keyring context.
    #[error("secret not found: cookie {id} in context {context:?}")]
    SecretNotFound { context: String, id: u32 },

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
