//! Hex helpers and CRLF line framing for the handshake stream.
//!
//! Wire format: ASCII fields separated by single spaces, terminated by `\r\n`.
//! Lines are read one byte at a time so that nothing past the terminator is
//! consumed; whatever follows `BEGIN` belongs to the binary message protocol.

use crate::error::{AuthError, AuthResult};
use std::io::{ErrorKind, Read, Write};

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Default upper bound for a single reply line.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Lowercase hex encoding. Empty input encodes to an empty string.
pub fn hex_encode(data: impl AsRef<[u8]>) -> String {
    hex::encode(data)
}

/// Decode a hex string as sent on the wire.
pub fn hex_decode(encoded: &str) -> AuthResult<Vec<u8>> {
    Ok(hex::decode(encoded.trim())?)
}

/// Read raw bytes up to and including `\r\n`.
///
/// Returns `Ok(None)` if the stream ends before any byte arrives. A stream that
/// ends mid-line, or a line that reaches `max_len`, yields what was accumulated.
pub fn read_line<R: Read>(reader: &mut R, max_len: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    while line.len() < max_len {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if line.ends_with(CRLF) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}

/// Strip the line terminator and split on runs of ASCII whitespace.
pub fn split_fields(line: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(line);
    text.trim_end_matches(&['\r', '\n'][..])
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

/// Read one line and split it into fields.
///
/// End of stream and read failures both surface as [`AuthError::ConnectionClosed`].
pub fn read_fields<R: Read>(reader: &mut R, max_len: usize) -> AuthResult<Vec<String>> {
    match read_line(reader, max_len) {
        Ok(Some(line)) => Ok(split_fields(&line)),
        Ok(None) => Err(AuthError::ConnectionClosed("end of stream".into())),
        Err(e) => Err(AuthError::ConnectionClosed(e.to_string())),
    }
}

/// Join fields with single spaces and append `\r\n`.
pub fn encode_line<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(field.as_ref().as_bytes());
    }
    out.extend_from_slice(CRLF);
    out
}

/// Write one framed line and flush.
pub fn write_line<W: Write, S: AsRef<str>>(writer: &mut W, fields: &[S]) -> std::io::Result<()> {
    writer.write_all(&encode_line(fields))?;
    writer.flush()
}
