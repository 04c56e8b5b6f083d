//! STOMP 1.2 frame codec.
//!
//! The broker speaks STOMP over a text transport. A frame is a command line,
//! header lines, a blank line and a body terminated by NUL:
//!
//! ```text
//! SEND
//! destination:/app/move
//! content-type:application/json
//!
//! {"lobbyId":"L1",...}\0
//! ```
//!
//! Bare end-of-line sequences between frames are heart-beats and decode to
//! nothing. Header values are escaped on every frame except `CONNECT` and
//! `CONNECTED`.

use std::fmt;

use crate::error::{Result, SessionError};

/// STOMP protocol versions offered during the handshake.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Frame commands used by this client and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self> {
        Ok(match line {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => {
                return Err(SessionError::Decode(format!(
                    "unknown STOMP command {other:?}"
                )))
            }
        })
    }

    /// Whether header values on this command are escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Lookups return the first occurrence.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    // ── Client frames ───────────────────────────────────────────────

    /// Handshake frame. Heart-beating is disabled in both directions.
    pub fn connect(host: &str) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn send(destination: &str, json: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(json)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    // ── Codec ───────────────────────────────────────────────────────

    /// Serialize to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode every frame in `text`, skipping heart-beats.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Decode`] if any frame is malformed; frames
    /// before the malformed one are discarded with it.
    pub fn decode_all(text: &str) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut rest = text;
        loop {
            let trimmed = rest.trim_start_matches(['\r', '\n']);
            if trimmed.is_empty() {
                return Ok(frames);
            }
            let (frame, consumed) = decode_one(trimmed)?;
            frames.push(frame);
            rest = trimmed.get(consumed..).unwrap_or_default();
        }
    }
}

/// Decode one frame at the start of `text`; returns it and the bytes used.
fn decode_one(text: &str) -> Result<(Frame, usize)> {
    let (command_line, mut cursor) = next_line(text, 0)
        .ok_or_else(|| SessionError::Decode("truncated STOMP command line".into()))?;
    let command = Command::parse(command_line)?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = next_line(text, cursor)
            .ok_or_else(|| SessionError::Decode("truncated STOMP headers".into()))?;
        cursor = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SessionError::Decode(format!("malformed STOMP header {line:?}")))?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut frame = Frame {
        command,
        headers,
        body: String::new(),
    };

    let body_end = match frame.header("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| SessionError::Decode(format!("bad content-length {len:?}")))?;
            cursor
                .checked_add(len)
                .ok_or_else(|| SessionError::Decode(format!("bad content-length {len}")))?
        }
        None => text
            .get(cursor..)
            .and_then(|body| body.find('\0'))
            .map(|offset| cursor + offset)
            .ok_or_else(|| SessionError::Decode("STOMP frame is missing NUL".into()))?,
    };

    frame.body = text
        .get(cursor..body_end)
        .ok_or_else(|| SessionError::Decode("STOMP body shorter than content-length".into()))?
        .to_string();

    if text.get(body_end..=body_end) != Some("\0") {
        return Err(SessionError::Decode("STOMP frame is missing NUL".into()));
    }
    Ok((frame, body_end + 1))
}

/// Line starting at byte `start`, without its EOL, and the offset after it.
fn next_line(text: &str, start: usize) -> Option<(&str, usize)> {
    let rest = text.get(start..)?;
    let newline = rest.find('\n')?;
    let line = rest.get(..newline)?;
    Some((line.strip_suffix('\r').unwrap_or(line), start + newline + 1))
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(SessionError::Decode(format!(
                    "invalid STOMP header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn encodes_send_with_content_length() {
        let text = Frame::send("/app/join", r#"{"a":1}"#).encode();
        assert_eq!(
            text,
            "SEND\ndestination:/app/join\ncontent-type:application/json\ncontent-length:7\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let text = Frame::connect("localhost:8080").encode();
        assert!(text.contains("host:localhost:8080\n"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn decodes_message_frame() {
        let text = "MESSAGE\ndestination:/topic/game\nsubscription:sub-0\nmessage-id:1\n\n{\"x\":1}\0\n";
        let frames = Frame::decode_all(text).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.body, "{\"x\":1}");
    }

    #[test]
    fn heartbeats_decode_to_nothing() {
        assert!(Frame::decode_all("\n").unwrap().is_empty());
        assert!(Frame::decode_all("\r\n\n").unwrap().is_empty());
        assert!(Frame::decode_all("").unwrap().is_empty());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let text = format!(
            "{}\n{}",
            Frame::new(Command::Receipt)
                .with_header("receipt-id", "r1")
                .encode(),
            Frame::new(Command::Message)
                .with_header("subscription", "sub-1")
                .with_body("b")
                .encode()
        );
        let frames = Frame::decode_all(&text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "b");
    }

    #[test]
    fn header_escapes_survive_encode_decode() {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/topic/chat/a:b")
            .with_header("note", "line\none\\two")
            .with_body("{}");
        let decoded = Frame::decode_all(&frame.encode()).unwrap();
        assert_eq!(decoded[0].header("destination"), Some("/topic/chat/a:b"));
        assert_eq!(decoded[0].header("note"), Some("line\none\\two"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let text = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frames = Frame::decode_all(text).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn first_repeated_header_wins() {
        let text = "MESSAGE\nsubscription:first\nsubscription:second\n\n\0";
        let frames = Frame::decode_all(text).unwrap();
        assert_eq!(frames[0].header("subscription"), Some("first"));
    }

    #[test]
    fn malformed_frames_are_errors() {
        for text in [
            "BOGUS\n\n\0",
            "MESSAGE\nno-colon\n\n\0",
            "MESSAGE\n\nbody without nul",
            "MESSAGE\ncontent-length:10\n\nshort\0",
            "MESSAGE\ncontent-length:18446744073709551615\n\nx\0",
            "MESSAGE\nbad:\\x\n\n\0",
            "MESSAGE",
        ] {
            assert!(
                matches!(Frame::decode_all(text), Err(SessionError::Decode(_))),
                "expected decode error for {text:?}"
            );
        }
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let text = "CONNECTED\r\nversion:1.2\r\n\r\n\0";
        let frames = Frame::decode_all(text).unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].header("version"), Some("1.2"));
    }
}
