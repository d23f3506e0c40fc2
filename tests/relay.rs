//! End-to-end tests: a real listener, a fake upstream, and the log files they leave behind.

use loggingproxy::{
    config::{Configuration, Mode},
    endpoint::Endpoint,
};
use std::{future::Future, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const DEADLINE: Duration = Duration::from_secs(10);

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(DEADLINE, future)
        .await
        .expect("test step timed out")
}

/// Start a proxy on an ephemeral port, logging into `logs`
async fn start_proxy(mode: Mode, logs: &Path) -> SocketAddr {
    let configuration = Arc::new(Configuration {
        mode,
        listen_port: 0,
        log_base: Some(logs.join("netlog")),
        verbose: true,
        request_timeout: Some(Duration::from_secs(5)),
        connect_timeout: Some(Duration::from_secs(5)),
        drain_timeout: Duration::from_secs(5),
    });
    let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let address = endpoint.local_addr().unwrap();
    tokio::spawn(endpoint.serve(configuration));
    address
}

/// Upstream that reads each request to EOF, then answers `reply(request)` and closes
async fn start_upstream<F>(reply: F) -> SocketAddr
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let reply = Arc::new(reply);
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let reply = Arc::clone(&reply);
            tokio::spawn(async move {
                let mut request = Vec::new();
                socket.read_to_end(&mut request).await.unwrap();
                let response = (*reply)(&request);
                socket.write_all(&response).await.unwrap();
            });
        }
    });
    address
}

/// Send `request`, half-close, and collect everything until the proxy closes
async fn exchange(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = within(TcpStream::connect(proxy)).await.unwrap();
    client.write_all(request).await.unwrap();
    client.shutdown().await.unwrap();
    let mut response = Vec::new();
    within(client.read_to_end(&mut response)).await.unwrap();
    response
}

async fn read_log(logs: &Path, sequence: u32) -> Vec<u8> {
    let path = logs.join(format!("netlog.{sequence:03}"));
    tokio::fs::read(&path)
        .await
        .unwrap_or_else(|error| panic!("reading {}: {error}", path.display()))
}

/// Like `read_log`, but waits for the session to finish writing `expected` bytes
async fn wait_for_log(logs: &Path, sequence: u32, expected: usize) -> Vec<u8> {
    within(async {
        loop {
            let path = logs.join(format!("netlog.{sequence:03}"));
            if let Ok(contents) = tokio::fs::read(&path).await {
                if contents.len() >= expected {
                    return contents;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}

#[tokio::test]
async fn plain_relay_is_byte_transparent_and_logged() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|request| {
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(request);
        reply
    })
    .await;
    let proxy = start_proxy(
        Mode::Plain {
            host: upstream.ip().to_string(),
            port: upstream.port(),
        },
        logs.path(),
    )
    .await;

    // large and binary, so it crosses many chunks
    let request: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let response = exchange(proxy, &request).await;

    let mut expected_response = b"echo:".to_vec();
    expected_response.extend_from_slice(&request);
    assert_eq!(response, expected_response);

    let mut expected_log = b"OUT:\t".to_vec();
    expected_log.extend_from_slice(&request);
    expected_log.extend_from_slice(b"IN:\t");
    expected_log.extend_from_slice(&expected_response);
    assert_eq!(read_log(logs.path(), 0).await, expected_log);
}

#[tokio::test]
async fn http_mode_forwards_origin_form() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|request| {
        assert!(request.starts_with(b"GET /index.html HTTP/1.1\r\n"));
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec()
    })
    .await;
    let proxy = start_proxy(Mode::HttpRewrite, logs.path()).await;

    let request = format!(
        "GET http://127.0.0.1:{}/index.html HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        upstream.port()
    );
    let response = exchange(proxy, request.as_bytes()).await;
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");

    let log = String::from_utf8(read_log(logs.path(), 0).await).unwrap();
    assert_eq!(
        log,
        format!(
            "REQ:\tGET http://127.0.0.1:{port}/index.html HTTP/1.1\r\n\
             PROXY:\tConnecting to 127.0.0.1:{port}\n\
             Sending 'GET /index.html HTTP/1.1'\n\
             OUT:\tHost: 127.0.0.1\r\n\r\n\
             IN:\tHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
            port = upstream.port()
        )
    );
}

#[tokio::test]
async fn malformed_request_leaves_listener_running() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|_| b"ok".to_vec()).await;
    let proxy = start_proxy(Mode::HttpRewrite, logs.path()).await;

    let response = exchange(proxy, b"GARBAGE\r\n").await;
    assert!(response.is_empty());
    let rejected = String::from_utf8(read_log(logs.path(), 0).await).unwrap();
    assert!(rejected.starts_with("REQ:\tGARBAGE\r\nPROXY:\tRejected request line"));
    assert!(!rejected.contains("Connecting"));

    let request = format!("HEAD http://127.0.0.1:{}/ HTTP/1.0\r\n\r\n", upstream.port());
    assert_eq!(exchange(proxy, request.as_bytes()).await, b"ok");
}

#[tokio::test]
async fn simultaneous_sessions_get_separate_logs() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|request| request.to_ascii_uppercase()).await;
    let proxy = start_proxy(
        Mode::Plain {
            host: upstream.ip().to_string(),
            port: upstream.port(),
        },
        logs.path(),
    )
    .await;

    // both connections are open before either sends anything
    let mut first = within(TcpStream::connect(proxy)).await.unwrap();
    let mut second = within(TcpStream::connect(proxy)).await.unwrap();
    first.write_all(b"alpha").await.unwrap();
    second.write_all(b"bravo").await.unwrap();
    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();

    let mut first_response = Vec::new();
    let mut second_response = Vec::new();
    within(first.read_to_end(&mut first_response)).await.unwrap();
    within(second.read_to_end(&mut second_response)).await.unwrap();
    assert_eq!(first_response, b"ALPHA");
    assert_eq!(second_response, b"BRAVO");

    let record_len = "OUT:\talphaIN:\tALPHA".len();
    let mut logged = vec![
        String::from_utf8(wait_for_log(logs.path(), 0, record_len).await).unwrap(),
        String::from_utf8(wait_for_log(logs.path(), 1, record_len).await).unwrap(),
    ];
    logged.sort();
    assert_eq!(logged, ["OUT:\talphaIN:\tALPHA", "OUT:\tbravoIN:\tBRAVO"]);
}

#[tokio::test]
async fn nolog_writes_no_files() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|request| request.to_vec()).await;
    let configuration = Arc::new(Configuration {
        mode: Mode::Plain {
            host: upstream.ip().to_string(),
            port: upstream.port(),
        },
        listen_port: 0,
        log_base: None,
        verbose: false,
        request_timeout: None,
        connect_timeout: None,
        drain_timeout: Duration::from_secs(5),
    });
    let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let proxy = endpoint.local_addr().unwrap();
    tokio::spawn(endpoint.serve(configuration));

    assert_eq!(exchange(proxy, b"quiet").await, b"quiet");
    let mut entries = tokio::fs::read_dir(logs.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn unwritable_log_fails_only_its_session() {
    let logs = TempDir::new().unwrap();
    let upstream = start_upstream(|request| request.to_vec()).await;
    let configuration = Arc::new(Configuration {
        mode: Mode::Plain {
            host: upstream.ip().to_string(),
            port: upstream.port(),
        },
        listen_port: 0,
        log_base: Some(logs.path().join("missing").join("netlog")),
        verbose: false,
        request_timeout: None,
        connect_timeout: None,
        drain_timeout: Duration::from_secs(5),
    });
    let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let proxy = endpoint.local_addr().unwrap();
    let served = tokio::spawn(endpoint.serve(configuration));

    // each connection is dropped without reaching the upstream; sending nothing keeps the
    // close a FIN instead of a reset
    assert!(exchange(proxy, b"").await.is_empty());
    assert!(exchange(proxy, b"").await.is_empty());
    assert!(!served.is_finished());
}
