//! busauth-core: wire-level pieces of the message-bus authentication handshake.
//!
//! Provides the error type, hex and CRLF line codec, client command and server
//! reply types, and the blocking `Connection` trait the handshake runs over.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{hex_decode, hex_encode, read_fields, write_line, DEFAULT_MAX_LINE_LEN};
pub use error::{AuthError, AuthResult};
pub use messages::{Command, Reply, ReplyKind};
pub use transport::Connection;
