//! Handshake commands sent by the client and replies received from the server.

use crate::codec;
use std::fmt;

/// Client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AUTH <mechanism> [initial-response]`
    Auth {
        mechanism: String,
        initial_response: String,
    },
    /// `DATA <hex>`
    Data(String),
    Error,
    Cancel,
    Begin,
}

impl Command {
    /// The protocol keyword for this command.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "AUTH",
            Command::Data(_) => "DATA",
            Command::Error => "ERROR",
            Command::Cancel => "CANCEL",
            Command::Begin => "BEGIN",
        }
    }

    /// Space-separated fields, keyword first. Empty payloads are omitted.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = vec![self.keyword()];
        match self {
            Command::Auth {
                mechanism,
                initial_response,
            } => {
                fields.push(mechanism);
                if !initial_response.is_empty() {
                    fields.push(initial_response);
                }
            }
            Command::Data(data) if !data.is_empty() => fields.push(data),
            _ => {}
        }
        fields
    }

    /// Wire encoding including the trailing `\r\n`.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_line(&self.fields())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields().join(" "))
    }
}

/// Classification of a server reply by its first field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ok,
    Continue,
    Rejected,
    /// The bare `REJECT` keyword.
    Reject,
    Data,
    Error,
    /// Anything else, including an empty line.
    Unknown,
}

impl ReplyKind {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "OK" => ReplyKind::Ok,
            "CONTINUE" => ReplyKind::Continue,
            "REJECTED" => ReplyKind::Rejected,
            "REJECT" => ReplyKind::Reject,
            "DATA" => ReplyKind::Data,
            "ERROR" => ReplyKind::Error,
            _ => ReplyKind::Unknown,
        }
    }
}

/// A parsed server reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    /// The first field as received (empty for a blank line).
    pub keyword: String,
    /// Remaining fields.
    pub args: Vec<String>,
}

impl Reply {
    pub fn from_fields(mut fields: Vec<String>) -> Self {
        let keyword = if fields.is_empty() {
            String::new()
        } else {
            fields.remove(0)
        };
        Self {
            kind: ReplyKind::from_keyword(&keyword),
            keyword,
            args: fields,
        }
    }

    /// Parse an unframed line such as `"OK 1234abcd"`.
    pub fn parse(line: &str) -> Self {
        Self::from_fields(codec::split_fields(line.as_bytes()))
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}
