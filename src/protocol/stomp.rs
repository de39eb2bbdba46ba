//! STOMP 1.2 frames.
//!
//! Every WebSocket message carries exactly one frame or a heartbeat:
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! where `^@` is the NUL octet. A message that contains nothing but an
//! end-of-line is a heartbeat.
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) in every frame except
//! `CONNECT` and `CONNECTED`, as the protocol requires.

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Frame commands, client and server.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        };
        f.write_str(command)
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return Err(Error::validation(format!("unknown STOMP command {s:?}"))),
        };
        Ok(command)
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order; when a header repeats, the first
/// occurrence is the one that counts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// What a WebSocket message decoded to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Incoming {
    Heartbeat,
    Frame(Frame),
}

impl Frame {
    pub const CONTENT_LENGTH: &'static str = "content-length";
    pub const CONTENT_TYPE: &'static str = "content-type";
    pub const DESTINATION: &'static str = "destination";
    pub const HEART_BEAT: &'static str = "heart-beat";
    pub const ID: &'static str = "id";
    pub const SUBSCRIPTION: &'static str = "subscription";

    /// End-of-line sent as a heartbeat.
    pub const HEARTBEAT: &'static str = "\n";

    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The body as UTF-8 text.
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(Error::validation)
    }

    /// Serializes the frame, adding `content-length` for non-empty bodies.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());

        out.extend_from_slice(self.command.to_string().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        if !self.body.is_empty() && self.get(Self::CONTENT_LENGTH).is_none() {
            out.extend_from_slice(format!("{}:{}\n", Self::CONTENT_LENGTH, self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

/// Decodes one WebSocket message.
///
/// # Errors
///
/// Returns a validation error if the message is not a well-formed frame.
pub fn decode(data: &[u8]) -> Result<Incoming> {
    // Heartbeats may precede a frame within the same message.
    let start = data
        .iter()
        .position(|&byte| byte != b'\n' && byte != b'\r')
        .unwrap_or(data.len());
    let data = &data[start..];
    if data.is_empty() {
        return Ok(Incoming::Heartbeat);
    }

    let mut lines = Lines { data, pos: 0 };
    let command = lines
        .next_line()
        .ok_or_else(|| Error::validation("STOMP frame without command"))?;
    let command = std::str::from_utf8(command)
        .map_err(Error::validation)?
        .parse::<Command>()?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let line = lines
            .next_line()
            .ok_or_else(|| Error::validation("STOMP frame headers not terminated"))?;
        if line.is_empty() {
            break;
        }

        let line = std::str::from_utf8(line).map_err(Error::validation)?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("malformed STOMP header {line:?}")))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let rest = &data[lines.pos..];
    let content_length = headers
        .iter()
        .find(|(name, _)| name == Frame::CONTENT_LENGTH)
        .map(|(_, value)| value.trim().parse::<usize>())
        .transpose()
        .map_err(|e| Error::validation(format!("invalid content-length: {e}")))?;

    let body = match content_length {
        Some(length) => {
            if rest.len() <= length || rest[length] != 0 {
                return Err(Error::validation("STOMP body shorter than content-length"));
            }
            rest[..length].to_vec()
        }
        None => {
            let end = rest
                .iter()
                .position(|&byte| byte == 0)
                .ok_or_else(|| Error::validation("STOMP frame not NUL-terminated"))?;
            rest[..end].to_vec()
        }
    };

    Ok(Incoming::Frame(Frame {
        command,
        headers,
        body,
    }))
}

/// Splits on LF, dropping an optional trailing CR.
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn next_line(&mut self) -> Option<&'a [u8]> {
        let data = self.data;
        let rest = &data[self.pos..];
        let end = rest.iter().position(|&byte| byte == b'\n')?;
        self.pos += end + 1;
        let line = &rest[..end];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

fn escape_header(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for chr in value.chars() {
        match chr {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(value: &str) -> Result<String> {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(chr) = chars.next() {
        if chr != '\\' {
            unescaped.push(chr);
            continue;
        }

        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('c') => unescaped.push(':'),
            other => {
                return Err(Error::validation(format!(
                    "undefined escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_send_with_content_length() {
        let frame = Frame::new(Command::Send)
            .header(Frame::DESTINATION, "/app/chat")
            .header(Frame::CONTENT_TYPE, "application/json")
            .with_body(r#"{"a":1}"#);

        let encoded = frame.encode();
        assert_eq!(
            encoded,
            b"SEND\ndestination:/app/chat\ncontent-type:application/json\ncontent-length:7\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("host", "example.com:443");
        assert_eq!(frame.encode(), b"CONNECT\nhost:example.com:443\n\n\0");
    }

    #[test]
    fn decodes_message_with_crlf_and_escapes() {
        let data = b"MESSAGE\r\nsubscription:sub-0\r\ndestination:/topic/a\\cb\r\n\r\nhello\0";
        let Incoming::Frame(frame) = decode(data).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get(Frame::DESTINATION), Some("/topic/a:b"));
        assert_eq!(frame.body_str().unwrap(), "hello");
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let data = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let Incoming::Frame(frame) = decode(data).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn bare_eol_is_heartbeat() {
        assert_eq!(decode(b"\n").unwrap(), Incoming::Heartbeat);
        assert_eq!(decode(b"\r\n").unwrap(), Incoming::Heartbeat);
    }

    #[test]
    fn first_header_occurrence_wins() {
        let data = b"MESSAGE\nfoo:1\nfoo:2\n\n\0";
        let Incoming::Frame(frame) = decode(data).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(decode(b"BOGUS\n\n\0").is_err());
        assert!(decode(b"MESSAGE\nfoo\n\n\0").is_err());
        assert!(decode(b"MESSAGE\n\nno terminator").is_err());
        assert!(decode(b"MESSAGE\nbad:\\x\n\n\0").is_err());
    }
}
