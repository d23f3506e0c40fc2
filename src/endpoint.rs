use crate::{
    config::Configuration, log_files::LogFiles, log_sink::LogSink, session::Session,
};
use anyhow::Context;
use futures::{Stream, StreamExt, TryFutureExt};
use std::{io, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    fs::File,
    net::{TcpListener, TcpStream},
};

/// TCP connection-listener server
pub struct Endpoint {
    listener: TcpListener,
}

impl Endpoint {
    /// Bind a listening socket. Port 0 picks a free port, see [`Endpoint::local_addr`].
    #[tracing::instrument(err)]
    pub async fn bind(address: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Turn this Endpoint into an endless stream of accepted connections
    pub fn listen(self) -> impl Stream<Item = io::Result<(TcpStream, SocketAddr)>> {
        futures::stream::unfold(self.listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        })
    }

    /// Accept connections forever, relaying each one in its own task.
    ///
    /// There is no cap on concurrent sessions. Errors that concern a single connection are
    /// logged and skipped, running out of file descriptors pauses accepting for a moment, and
    /// only a failure of the listening socket itself ends the loop. Anything that goes wrong
    /// inside a session, including creating its log file, stays there.
    pub async fn serve(self, configuration: Arc<Configuration>) -> anyhow::Result<()> {
        let mut log_files = configuration.log_base.clone().map(LogFiles::new);
        tracing::info!(address = %self.local_addr()?, "listening for new connections");

        let incoming = self.listen();
        futures::pin_mut!(incoming);
        while let Some(accepted) = incoming.next().await {
            let (client, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(error) => match AcceptFailure::of(&error) {
                    AcceptFailure::Connection => {
                        tracing::warn!(%error, "Failed to accept connection, continuing");
                        continue;
                    }
                    AcceptFailure::Exhausted => {
                        tracing::warn!(
                            %error,
                            backoff = ?ACCEPT_BACKOFF,
                            "Out of resources accepting connections"
                        );
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    AcceptFailure::Listener => {
                        return Err(error).context("Failed to accept connection");
                    }
                },
            };

            tracing::debug!(%peer, "Connection accepted");
            let log_path = log_files.as_mut().map(LogFiles::next_path);
            tokio::spawn(
                handle(client, peer, log_path, Arc::clone(&configuration)).inspect_err(
                    move |error| {
                        tracing::error!(%peer, "Session setup failed: {error:#}");
                    },
                ),
            );
        }

        Ok(())
    }
}

/// Pause before accepting again when the process is out of descriptors or memory
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// errno values shared by Linux, macOS and the BSDs
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// How much of the server an `accept` error takes down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Only the connection being accepted is lost
    Connection,
    /// Transient shortage of descriptors or memory
    Exhausted,
    /// The listening socket is no longer usable
    Listener,
}

impl AcceptFailure {
    fn of(error: &io::Error) -> Self {
        if matches!(error.raw_os_error(), Some(EMFILE | ENFILE))
            || error.kind() == io::ErrorKind::OutOfMemory
        {
            return Self::Exhausted;
        }
        match error.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::PermissionDenied => Self::Connection,
            _ => Self::Listener,
        }
    }
}

/// Per-connection task: owns the session log for as long as the Session runs
async fn handle(
    client: TcpStream,
    peer: SocketAddr,
    log_path: Option<PathBuf>,
    configuration: Arc<Configuration>,
) -> anyhow::Result<()> {
    let log = match log_path {
        Some(path) => {
            let file = File::create(&path)
                .await
                .with_context(|| format!("Failed to create session log {}", path.display()))?;
            Some(Arc::new(LogSink::new(file)))
        }
        None => None,
    };

    // failures are reported by the session's own instrumentation
    match Session::new(client, peer, configuration, log.clone()).run().await {
        Ok(summary) => tracing::debug!(
            %peer,
            outbound = summary.outbound.bytes,
            inbound = summary.inbound.as_ref().map(|report| report.bytes),
            "Connection closed"
        ),
        Err(_) => tracing::debug!(%peer, "Connection closed"),
    }

    // last handle: closes the log file
    drop(log);
    Ok(())
}
