//! In-process JSON-RPC servers for transport tests.
//!
//! - [`WsServer`] hands each accepted WebSocket to the test as a [`ServerConn`];
//!   the test plays the server by reading requests and writing frames.
//! - [`HttpServer`] answers every POST through a responder closure and records
//!   the requests it saw.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a `tracing` subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─── WebSocket ───────────────────────────────────────────────────────────────

pub struct WsServer {
    pub url: String,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

/// Server side of one accepted WebSocket.
pub struct ServerConn {
    /// `Authorization` header of the upgrade request.
    pub authorization: Option<String>,
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(serve_ws(stream, conn_tx));
            }
        });

        Self { url, conns }
    }

    pub async fn accept(&mut self) -> ServerConn {
        timeout(TEST_TIMEOUT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener stopped")
    }
}

async fn serve_ws(stream: TcpStream, conn_tx: mpsc::UnboundedSender<ServerConn>) {
    let mut authorization = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(resp)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .unwrap();

    let (in_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Message>();
    if conn_tx
        .send(ServerConn {
            authorization,
            incoming,
            outgoing,
        })
        .is_err()
    {
        return;
    }

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text: &str = text.as_ref();
                    let value: Value = serde_json::from_str(text).unwrap();
                    if in_tx.send(value).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            out = out_rx.recv() => match out {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if sink.send(message).await.is_err() || closing {
                        break;
                    }
                }
                // Test dropped the connection: drop the socket without a close frame.
                None => break,
            },
        }
    }
}

impl ServerConn {
    /// Next request from the client.
    pub async fn recv(&mut self) -> Value {
        timeout(TEST_TIMEOUT, self.incoming.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("client disconnected")
    }

    pub fn send_json(&self, value: Value) {
        self.outgoing
            .send(Message::Text(value.to_string().into()))
            .unwrap();
    }

    pub fn send_raw(&self, text: &str) {
        self.outgoing
            .send(Message::Text(text.to_string().into()))
            .unwrap();
    }

    pub fn reply(&self, request: &Value, result: Value) {
        self.send_json(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
    }

    pub fn reply_error(&self, request: &Value, code: i64, message: &str) {
        self.send_json(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message},
        }));
    }

    pub fn push(&self, method: &str, subscription: u64, result: Value) {
        self.send_json(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {"subscription": subscription, "result": result},
        }));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.outgoing.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: reason.to_string().into(),
        })));
    }
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// One request as seen by [`HttpServer`]. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub headers: HashMap<String, String>,
    pub body: Value,
}

pub struct HttpServer {
    pub url: String,
    requests: mpsc::UnboundedReceiver<RecordedRequest>,
}

type Responder = Arc<dyn Fn(&Value) -> (u16, String) + Send + Sync>;

impl HttpServer {
    /// Serve every request with `responder(body) -> (status, body)`.
    pub async fn start(
        responder: impl Fn(&Value) -> (u16, String) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/rpc", listener.local_addr().unwrap());
        let (req_tx, requests) = mpsc::unbounded_channel();
        let responder: Responder = Arc::new(responder);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_http(stream, responder.clone(), req_tx.clone()));
            }
        });

        Self { url, requests }
    }

    pub async fn next_request(&mut self) -> RecordedRequest {
        timeout(TEST_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("server stopped")
    }
}

async fn serve_http(
    stream: TcpStream,
    responder: Responder,
    req_tx: mpsc::UnboundedSender<RecordedRequest>,
) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let (status, response_body) = responder(&body);
    let _ = req_tx.send(RecordedRequest { headers, body });

    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{response_body}",
        reason = if status == 200 { "OK" } else { "Error" },
        len = response_body.len(),
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// `{"jsonrpc":"2.0","id":<request id>,"result":<result>}` as text.
pub fn result_body(request: &Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string()
}
