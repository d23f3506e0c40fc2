use crate::{
    config::{Configuration, Mode},
    copier::CHUNK_SIZE,
    error::{ParseError, SessionError},
    log_sink::{LogSink, Tag},
    proxy::{Proxy, SessionSummary},
    request::{read_request_line, RequestLine},
};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};

/// One accepted client connection and the upstream it gets relayed to.
///
/// The Session owns the client socket and closes it when [`Session::run`] returns, on
/// success and failure alike. The log is only shared with it: whoever created the LogSink
/// closes it.
pub struct Session<L = File> {
    client: TcpStream,
    peer: SocketAddr,
    configuration: Arc<Configuration>,
    log: Option<Arc<LogSink<L>>>,
}

impl<L> Session<L>
where
    L: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        client: TcpStream,
        peer: SocketAddr,
        configuration: Arc<Configuration>,
        log: Option<Arc<LogSink<L>>>,
    ) -> Self {
        Self {
            client,
            peer,
            configuration,
            log,
        }
    }

    /// Resolve the upstream, then relay until the client is finished.
    ///
    /// In HTTP-rewrite mode the first request line decides the upstream and is forwarded in
    /// origin form; a line that can't be parsed or an upstream that can't be reached ends the
    /// session without any response to the client.
    #[tracing::instrument(skip(self), fields(peer = %self.peer), err)]
    pub async fn run(self) -> Result<SessionSummary, SessionError> {
        let Self {
            client,
            configuration,
            log,
            ..
        } = self;

        let (client_read, client_write) = client.into_split();
        // anything buffered past the request line is relayed by the client -> upstream copier
        let mut client_read = BufReader::with_capacity(CHUNK_SIZE, client_read);

        let upstream = match &configuration.mode {
            Mode::Plain { host, port } => {
                connect(host, *port, configuration.connect_timeout, log.as_deref()).await?
            }
            Mode::HttpRewrite => {
                rewrite_request(&mut client_read, &configuration, log.as_deref()).await?
            }
        };

        let (upstream_read, upstream_write) = upstream.into_split();
        let summary = Proxy::start(
            client_read,
            client_write,
            upstream_read,
            upstream_write,
            log,
            configuration.drain_timeout,
        )
        .await;

        Ok(summary)
    }
}

/// Read the absolute-form request line, connect where it points and send it on in origin form.
async fn rewrite_request<R, L>(
    client: &mut R,
    configuration: &Configuration,
    log: Option<&LogSink<L>>,
) -> Result<TcpStream, SessionError>
where
    R: AsyncBufRead + Unpin,
    L: AsyncWrite + Unpin + Send,
{
    let (raw, line) = match configuration.request_timeout {
        Some(limit) => tokio::time::timeout(limit, read_request_line(client))
            .await
            .unwrap_or_else(|_| (Vec::new(), Err(ParseError::Timeout))),
        None => read_request_line(client).await,
    };
    if !raw.is_empty() {
        record(log, Tag::Req, &raw).await?;
    }

    let request = match line.and_then(|line| RequestLine::parse(&line)) {
        Ok(request) => request,
        Err(error) => {
            record_failure(log, format!("Rejected request line: {error}\n")).await;
            return Err(error.into());
        }
    };
    tracing::debug!(
        method = %request.method,
        target = %request.authority(),
        path = %request.path,
        "parsed proxy request"
    );

    let connecting = format!("Connecting to {}\n", request.authority());
    record(log, Tag::Proxy, connecting.as_bytes()).await?;
    let mut upstream =
        connect(&request.host, request.port, configuration.connect_timeout, log).await?;

    let sending = format!("Sending '{request}'\n");
    record(log, Tag::Proxy, sending.as_bytes()).await?;
    upstream.write_all(request.origin_form().as_bytes()).await?;

    Ok(upstream)
}

/// Open the single upstream connection of a Session. Never retried.
async fn connect<L>(
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
    log: Option<&LogSink<L>>,
) -> Result<TcpStream, SessionError>
where
    L: AsyncWrite + Unpin + Send,
{
    let attempt = TcpStream::connect((host, port));
    let connected = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
        None => attempt.await,
    };

    let target = format!("{host}:{port}");
    match connected {
        Ok(upstream) => {
            tracing::debug!(%target, "connected to upstream");
            Ok(upstream)
        }
        Err(source) => {
            record_failure(log, format!("Connection to {target} failed: {source}\n")).await;
            if source.kind() == io::ErrorKind::TimedOut {
                Err(SessionError::ConnectTimeout { target })
            } else {
                Err(SessionError::Connect { target, source })
            }
        }
    }
}

async fn record<L>(log: Option<&LogSink<L>>, tag: Tag, bytes: &[u8]) -> Result<(), SessionError>
where
    L: AsyncWrite + Unpin + Send,
{
    if let Some(log) = log {
        log.log(tag, bytes).await.map_err(SessionError::Log)?;
    }
    Ok(())
}

// the session is already failing, so a log write error must not mask the real cause
async fn record_failure<L>(log: Option<&LogSink<L>>, note: String)
where
    L: AsyncWrite + Unpin + Send,
{
    if let Err(error) = record(log, Tag::Proxy, note.as_bytes()).await {
        tracing::warn!(%error, "could not record session failure");
    }
}
