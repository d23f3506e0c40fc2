//! One direction of a relay: read a chunk, record it, forward it unchanged.

use crate::log_sink::{LogSink, Tag};
use bytes::BytesMut;
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk read from the source in one go
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Why a copier stopped. None of these are propagated as errors.
#[derive(Debug)]
pub enum Termination {
    /// The source reached a clean end of stream
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// Recording a chunk failed, so it was never forwarded
    LogFailed(io::Error),
}

impl Termination {
    pub fn is_eof(&self) -> bool {
        matches!(self, Termination::Eof)
    }
}

/// Outcome of one finished copier
#[derive(Debug)]
pub struct CopyReport {
    pub tag: Tag,
    /// bytes forwarded to the sink
    pub bytes: u64,
    pub termination: Termination,
}

/// Copy `source` into `sink` until end of stream or the first I/O failure.
///
/// Each chunk is handed to `log` (when present) before it is written to `sink`, so a log
/// never lags behind what a peer has received. On a clean end of stream the sink's write
/// side is shut down, passing the half-close on to the other peer.
#[tracing::instrument(name = "copy", skip_all, fields(%tag))]
pub async fn copy_to_eof<R, W, L>(
    mut source: R,
    mut sink: W,
    tag: Tag,
    log: Option<Arc<LogSink<L>>>,
) -> CopyReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    L: AsyncWrite + Unpin + Send,
{
    tracing::debug!("starting");

    let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
    let mut bytes = 0;
    let termination = loop {
        buffer.clear();
        match source.read_buf(&mut buffer).await {
            Ok(0) => break Termination::Eof,
            Ok(_) => {}
            Err(error) => break Termination::ReadFailed(error),
        }

        if let Some(log) = &log {
            if let Err(error) = log.log(tag, &buffer).await {
                break Termination::LogFailed(error);
            }
        }

        if let Err(error) = write_chunk(&mut sink, &buffer).await {
            break Termination::WriteFailed(error);
        }
        bytes += buffer.len() as u64;
    };

    match &termination {
        Termination::Eof => {
            tracing::debug!(bytes, "got EOF, finishing");
            if let Err(error) = sink.shutdown().await {
                tracing::debug!(%error, "peer already gone at shutdown");
            }
        }
        Termination::ReadFailed(error) | Termination::WriteFailed(error) => {
            tracing::info!(bytes, %error, kind = ?error.kind(), "connection error, finishing");
        }
        Termination::LogFailed(error) => {
            tracing::warn!(bytes, %error, "session log unwritable, finishing");
        }
    }

    CopyReport {
        tag,
        bytes,
        termination,
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(sink: &mut W, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}
