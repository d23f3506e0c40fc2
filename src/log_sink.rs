//! Per-connection traffic log shared by both directions of a Session.

use std::{fmt, io};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

/// Label for the logical stream a log record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// upstream -> client
    In,
    /// client -> upstream
    Out,
    /// the client's original HTTP request line
    Req,
    /// notes about the upstream connection and the rewritten request
    Proxy,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::In => "IN",
            Tag::Out => "OUT",
            Tag::Req => "REQ",
            Tag::Proxy => "PROXY",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner<W> {
    writer: W,
    last_tag: Option<Tag>,
}

/// Append-only log that serializes tagged writes from concurrent callers.
///
/// A `"<TAG>:\t"` header is written only when the tag differs from the previous record's,
/// so each run of same-direction traffic reads as one block. Every call is flushed before
/// the lock is released. The sink never closes its writer; whoever owns the last handle
/// does that by dropping it.
pub struct LogSink<W = File> {
    inner: Mutex<Inner<W>>,
}

impl<W> LogSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Inner {
                writer,
                last_tag: None,
            }),
        }
    }

    /// Record `bytes` under `tag` as one uninterrupted unit.
    pub async fn log(&self, tag: Tag, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.last_tag != Some(tag) {
            let header = format!("{tag}:\t");
            inner.writer.write_all(header.as_bytes()).await?;
        }
        inner.writer.write_all(bytes).await?;
        inner.writer.flush().await?;
        inner.last_tag = Some(tag);
        Ok(())
    }

    /// Give back the underlying writer once nothing else holds the sink.
    pub fn into_inner(self) -> W {
        self.inner.into_inner().writer
    }
}
