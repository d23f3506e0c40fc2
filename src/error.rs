//! Error types for sessions and their setup.

use std::io;
use thiserror::Error;

/// Reasons the first line of an HTTP proxy request could not be turned into an upstream target.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The client closed its side before a full CRLF-terminated line arrived
    #[error("client disconnected before sending a complete request line")]
    Incomplete,

    /// No line terminator within the allowed line length
    #[error("request line exceeds {limit} bytes")]
    TooLong { limit: usize },

    /// The request line did not arrive within the configured deadline
    #[error("timed out waiting for the request line")]
    Timeout,

    #[error("request line is not valid UTF-8")]
    NotUtf8,

    /// The line does not match `METHOD http://HOST[:PORT]/PATH HTTP/VERSION`
    #[error("malformed request line: {reason}")]
    Malformed { reason: &'static str },
}

/// Failures that end a Session before its relay starts.
///
/// Failures during the relay itself are never errors, see [`crate::copier::Termination`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {target}")]
    ConnectTimeout { target: String },

    /// A REQ or PROXY record could not be written to the session log
    #[error("failed to write session log: {0}")]
    Log(#[source] io::Error),

    #[error("I/O error before relay started: {0}")]
    Io(#[from] io::Error),
}

/// Invalid combinations of command-line options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a destination --host is required unless --http is given")]
    MissingHost,
}
