//! Absolute-form HTTP request lines, as sent by clients configured to use a proxy.

use crate::error::ParseError;
use http::Method;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest request line accepted, terminator included
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

const DEFAULT_PORT: u16 = 80;

/// A parsed `METHOD http://HOST[:PORT]/PATH HTTP/VERSION` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub version: String,
}

impl RequestLine {
    /// Parse a complete line, CRLF included.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line
            .strip_suffix("\r\n")
            .ok_or(malformed("line must end with CRLF"))?;

        let (method, rest) = line.split_once(' ').ok_or(malformed("missing request target"))?;
        if method.is_empty() || !method.bytes().all(|byte| byte.is_ascii_uppercase()) {
            return Err(malformed("method must be uppercase letters"));
        }
        let method =
            Method::from_bytes(method.as_bytes()).map_err(|_| malformed("invalid method"))?;

        let rest = rest
            .strip_prefix("http://")
            .ok_or(malformed("target is not an absolute http:// URI"))?;

        // the target may not contain spaces, so the last " HTTP/" ends it
        let (target, version) = rest
            .rsplit_once(" HTTP/")
            .ok_or(malformed("missing HTTP version"))?;
        if version.is_empty() || version.contains(' ') {
            return Err(malformed("invalid HTTP version"));
        }

        let path_start = target.find('/').ok_or(malformed("missing path"))?;
        let (authority, path) = target.split_at(path_start);
        if path.contains(' ') {
            return Err(malformed("path contains a space"));
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(malformed("empty host"));
        }
        if host.contains(' ') {
            return Err(malformed("host contains a space"));
        }

        Ok(Self {
            method,
            host: host.to_owned(),
            port,
            path: path.to_owned(),
            version: version.to_owned(),
        })
    }

    /// `host:port`, suitable for connecting to
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The origin-form line the upstream should see, CRLF included.
    pub fn origin_form(&self) -> String {
        format!("{self}\r\n")
    }
}

/// Origin-form line without the terminator
impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} HTTP/{}", self.method, self.path, self.version)
    }
}

fn parse_port(port: &str) -> Result<u16, ParseError> {
    if port.is_empty() || !port.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(malformed("port must be digits"));
    }
    port.parse().map_err(|_| malformed("port out of range"))
}

fn malformed(reason: &'static str) -> ParseError {
    ParseError::Malformed { reason }
}

/// Read one CRLF-terminated line without consuming anything past it.
///
/// Returns the raw bytes read alongside the outcome, so a caller can record what the client
/// actually sent even when it was not a usable line.
pub async fn read_request_line<R>(reader: &mut R) -> (Vec<u8>, Result<String, ParseError>)
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = (&mut *reader)
        .take(MAX_REQUEST_LINE as u64)
        .read_until(b'\n', &mut raw)
        .await;

    let outcome = match read {
        Err(error) => {
            tracing::debug!(%error, "client read failed before request line");
            Err(ParseError::Incomplete)
        }
        Ok(_) if raw.ends_with(b"\n") => match String::from_utf8(raw.clone()) {
            Ok(line) => Ok(line),
            Err(_) => Err(ParseError::NotUtf8),
        },
        Ok(_) if raw.len() >= MAX_REQUEST_LINE => Err(ParseError::TooLong {
            limit: MAX_REQUEST_LINE,
        }),
        Ok(_) => Err(ParseError::Incomplete),
    };
    (raw, outcome)
}
