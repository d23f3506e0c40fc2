use crate::{
    copier::{copy_to_eof, CopyReport},
    log_sink::{LogSink, Tag},
};
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

/// What happened to both directions of a finished relay.
#[derive(Debug)]
pub struct SessionSummary {
    /// client -> upstream, always run to completion
    pub outbound: CopyReport,
    /// upstream -> client, `None` when it was abandoned at the drain deadline
    pub inbound: Option<CopyReport>,
}

/// Bi-directional logging relay between a client and its upstream.
pub struct Proxy;

impl Proxy {
    /// Relay both directions until the client is done, then let the upstream drain.
    ///
    /// upstream -> client runs in its own task; client -> upstream runs on the caller's task.
    /// When the latter finishes, the upstream has already seen the half-close, and the
    /// upstream copier gets at most `drain_timeout` to deliver its remaining bytes before it
    /// is aborted. Either way it has fully stopped by the time this returns, so the caller
    /// may close the client socket and release the log.
    pub async fn start<CR, CW, UR, UW, L>(
        client_read: CR,
        client_write: CW,
        upstream_read: UR,
        upstream_write: UW,
        log: Option<Arc<LogSink<L>>>,
        drain_timeout: Duration,
    ) -> SessionSummary
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin + Send + 'static,
        UR: AsyncRead + Unpin + Send + 'static,
        UW: AsyncWrite + Unpin,
        L: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::debug!("Starting proxy connection");

        let mut inbound = tokio::spawn(
            copy_to_eof(upstream_read, client_write, Tag::In, log.clone()).in_current_span(),
        );
        let outbound = copy_to_eof(client_read, upstream_write, Tag::Out, log).await;

        let inbound = match tokio::time::timeout(drain_timeout, &mut inbound).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(error)) => {
                tracing::warn!(%error, "upstream copier did not complete");
                None
            }
            Err(_) => {
                tracing::debug!(
                    ?drain_timeout,
                    "upstream still open after drain timeout, aborting"
                );
                inbound.abort();
                // wait for the cancelled task to drop its socket half and log handle
                let _ = inbound.await;
                None
            }
        };

        tracing::debug!(
            outbound = outbound.bytes,
            inbound = inbound.as_ref().map(|report| report.bytes),
            "Proxy connection closing"
        );

        SessionSummary { outbound, inbound }
    }
}
