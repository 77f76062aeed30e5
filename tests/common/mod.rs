//! Shared utilities for integration testing.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use wsgate::{Server, ServerConfig, ServerError, Subscriber};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<(), ServerError>>,
    _public: TempDir,
}

impl TestServer {
    /// Cancel the parent token and wait for `run` to return.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.cancel.cancel();
        self.handle.await.expect("server task panicked")
    }
}

/// Start a server with a 5s timeout and a small public directory.
pub async fn start_server<S: Subscriber>(subscriber: S) -> TestServer {
    start_server_with_timeout(subscriber, Duration::from_secs(5)).await
}

/// Like [`start_server`], with a custom request timeout.
#[allow(dead_code)]
pub async fn start_server_with_timeout<S: Subscriber>(
    subscriber: S,
    timeout: Duration,
) -> TestServer {
    let public = tempfile::tempdir().unwrap();
    std::fs::write(public.path().join("index.html"), "<h1>test</h1>").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(
        ServerConfig::new(addr.to_string(), timeout),
        subscriber,
    )
    .with_public_dir(public.path());

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { server.run(listener, token).await });

    TestServer {
        addr,
        cancel,
        handle,
        _public: public,
    }
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket handshake failed");
    ws
}

/// Send a close frame with `code` from the client side.
#[allow(dead_code)]
pub async fn client_close(ws: &mut Client, code: CloseCode) {
    ws.send(Message::Close(Some(CloseFrame {
        code,
        reason: "client done".into(),
    })))
    .await
    .unwrap();
}

/// Read until the stream ends and return the close codes received.
pub async fn drain_close_codes(ws: &mut Client) -> Vec<u16> {
    let mut codes = Vec::new();
    let read = async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(frame)) => {
                    codes.push(frame.map(|f| u16::from(f.code)).unwrap_or(1005));
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), read)
        .await
        .expect("connection was not closed");
    codes
}

/// Log sink that keeps formatted output in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl CapturedLogs {
    /// Install as the default subscriber for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    /// True if a line at `level` contains `needle`.
    pub fn has(&self, level: &str, needle: &str) -> bool {
        self.contents()
            .lines()
            .any(|line| line.contains(level) && line.contains(needle))
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
