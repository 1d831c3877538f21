//! Native WebSocket transport: `tokio-tungstenite`.
//!
//! A background tokio task owns the socket. It:
//! - publishes the connection state on a `watch` channel (sends wait for `Open`)
//! - writes queued request frames
//! - routes every inbound frame through [`CorrelationStore::dispatch`]
//! - fails outstanding requests and clears subscriptions when the socket goes away
//!
//! Push callbacks run on the connection task; they must not block.
//! There is no reconnection: subscription ids are server state and do not
//! survive a new connection.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{SdkError, TransportError, WsError};
use crate::jsonrpc::envelope::Request;
use crate::jsonrpc::{
    subscribe_via, CorrelationStore, JsonRpcClient, NotificationCallback, SendOptions,
    Subscription, SubscriptionTable, TransportKind,
};
use crate::ws::{ReadyState, WsConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Send(String),
    Close,
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    config: WsConfig,
    store: Arc<CorrelationStore>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ReadyState>,
}

impl TaskState {
    /// Stop accepting commands, then fail whatever is still outstanding.
    ///
    /// Closing the command channel first guarantees that a request is either
    /// rejected at send time or registered before `fail_all` runs.
    fn shutdown(&mut self, error: impl Fn() -> SdkError) {
        self.cmd_rx.close();
        let failed = self.store.fail_all(error);
        if failed > 0 {
            tracing::warn!("Failed {} outstanding request(s)", failed);
        }
        self.store.subscriptions().clear();
    }
}

// ─── Public client ───────────────────────────────────────────────────────────

/// JSON-RPC client over a single persistent WebSocket.
///
/// Cheap to clone; clones share the connection. The connection task stops
/// when the last clone (including clones held by live [`Subscription`]s) is
/// dropped, or on [`WebsocketClient::close`].
#[derive(Clone)]
pub struct WebsocketClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: WsConfig,
    store: Arc<CorrelationStore>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ReadyState>,
    task_handle: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}

impl WebsocketClient {
    /// Start connecting in the background. Must be called within a tokio runtime.
    ///
    /// Returns immediately; requests wait until the socket is open.
    pub fn new(config: WsConfig) -> Self {
        let store = Arc::new(CorrelationStore::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);

        let state = TaskState {
            config: config.clone(),
            store: Arc::clone(&store),
            cmd_rx,
            state_tx,
        };
        let task_handle = tokio::spawn(run_task(state));

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                cmd_tx,
                state_rx,
                task_handle,
            }),
        }
    }

    /// Connect and wait for the socket to open.
    pub async fn connect(config: WsConfig) -> Result<Self, SdkError> {
        let client = Self::new(config);
        client.ready().await?;
        Ok(client)
    }

    /// Wait for the open signal.
    pub async fn ready(&self) -> Result<(), SdkError> {
        let mut rx = self.inner.state_rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                ReadyState::Open => return Ok(()),
                ReadyState::Connecting => {}
                ReadyState::Failed(reason) => return Err(WsError::ConnectionFailed(reason).into()),
                ReadyState::Closed { code, reason } => {
                    return Err(WsError::Closed { code, reason }.into())
                }
            }
            if rx.changed().await.is_err() {
                return Err(WsError::NotConnected.into());
            }
        }
    }

    /// Current connection state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.state_rx.borrow().clone()
    }

    /// Connection state changes, starting with the current state.
    ///
    /// Ends after the final `Failed`/`Closed` state.
    pub fn state_changes(&self) -> Pin<Box<dyn Stream<Item = ReadyState> + Send + 'static>> {
        let rx = self.inner.state_rx.clone();
        Box::pin(futures_util::stream::unfold(
            (rx, true),
            |(mut rx, first)| async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                let state = rx.borrow_and_update().clone();
                Some((state, (rx, false)))
            },
        ))
    }

    /// Whether the WebSocket is currently open.
    pub fn is_connected(&self) -> bool {
        self.ready_state().is_open()
    }

    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.store.pending_len()
    }

    /// Send a close frame and stop the connection task.
    ///
    /// Outstanding requests fail with [`WsError::Closed`].
    pub fn close(&self) {
        let _ = self.inner.cmd_tx.send(Command::Close);
    }
}

impl fmt::Debug for WebsocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketClient")
            .field("config", &self.inner.config)
            .field("ready_state", &self.ready_state())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

#[async_trait]
impl JsonRpcClient for WebsocketClient {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    async fn send_with(
        &self,
        method: &str,
        params: Vec<Value>,
        _options: SendOptions,
    ) -> Result<Value, SdkError> {
        self.ready().await?;

        let store = &self.inner.store;
        let id = store.next_id();
        let text = serde_json::to_string(&Request::new(id, method, &params))?;

        let rx = store.register(id);
        if self.inner.cmd_tx.send(Command::Send(text)).is_err() {
            store.forget(id);
            return Err(WsError::NotConnected.into());
        }
        tracing::debug!(id, method, "JSON-RPC request");

        let reply = match self.inner.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    store.forget(id);
                    tracing::debug!(id, method, "JSON-RPC request timed out");
                    return Err(TransportError::Timeout.into());
                }
            },
            None => rx.await,
        };

        reply.map_err(|_| {
            SdkError::from(WsError::Closed {
                code: None,
                reason: "Connection task ended".into(),
            })
        })?
    }

    fn subscription_table(&self) -> Option<SubscriptionTable> {
        Some(self.inner.store.subscriptions().clone())
    }

    async fn subscribe(
        &self,
        subscribe_method: &str,
        unsubscribe_method: &str,
        params: Vec<Value>,
        callback: NotificationCallback,
    ) -> Result<Subscription, SdkError> {
        subscribe_via(
            Arc::new(self.clone()),
            self.inner.store.subscriptions().clone(),
            subscribe_method,
            unsubscribe_method,
            params,
            callback,
        )
        .await
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    let (sink, stream) = match attempt_connect(&state.config).await {
        Ok(parts) => parts,
        Err(reason) => {
            tracing::error!("WebSocket connection to {} failed: {}", state.config.url, reason);
            state.state_tx.send_replace(ReadyState::Failed(reason.clone()));
            state.shutdown(|| WsError::ConnectionFailed(reason.clone()).into());
            return;
        }
    };

    tracing::info!("WebSocket connected to {}", state.config.url);
    state.state_tx.send_replace(ReadyState::Open);

    let ended = run_connected(&mut state, sink, stream).await;

    let final_state = ended.ready_state();
    if let ReadyState::Closed { code, reason } = &final_state {
        tracing::info!(code = ?code, "WebSocket closed: {}", reason);
    }
    state.state_tx.send_replace(final_state);
    state.shutdown(|| ended.error());
}

/// Why the connected loop stopped.
#[derive(Debug, Clone, PartialEq)]
enum Disconnect {
    Closed { code: Option<u16>, reason: String },
    SendFailed(String),
}

impl Disconnect {
    fn ready_state(&self) -> ReadyState {
        match self {
            Disconnect::Closed { code, reason } => ReadyState::Closed {
                code: *code,
                reason: reason.clone(),
            },
            Disconnect::SendFailed(e) => ReadyState::Closed {
                code: None,
                reason: format!("Send failed: {e}"),
            },
        }
    }

    /// Error handed to requests still outstanding at disconnect.
    fn error(&self) -> SdkError {
        match self {
            Disconnect::Closed { code, reason } => WsError::Closed {
                code: *code,
                reason: reason.clone(),
            }
            .into(),
            Disconnect::SendFailed(e) => WsError::SendFailed(e.clone()).into(),
        }
    }
}

/// The connected loop: runs until the connection breaks or is closed.
async fn run_connected(
    state: &mut TaskState,
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
) -> Disconnect {
    loop {
        tokio::select! {
            // ── a) Incoming WS message ───────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        state.store.dispatch(text_str);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text_str) => {
                            state.store.dispatch(text_str);
                        }
                        Err(e) => tracing::warn!("Ignoring non-UTF-8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        return Disconnect::Closed { code: Some(code), reason };
                    }
                    Some(Ok(_)) => {} // Pong, Frame
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        return Disconnect::Closed { code: None, reason: e.to_string() };
                    }
                    None => {
                        return Disconnect::Closed { code: None, reason: "Stream ended".into() };
                    }
                }
            }

            // ── b) Command from public API ───────────────────────────────
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!("Send failed: {}", e);
                            return Disconnect::SendFailed(e.to_string());
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return Disconnect::Closed {
                            code: Some(1000),
                            reason: "Client disconnect".into(),
                        };
                    }
                }
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Open the socket, adding the bearer token header when configured.
async fn attempt_connect(
    config: &WsConfig,
) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>), String> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;

    if let Some(token) = &config.bearer_token {
        let value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| e.to_string())?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws_stream, _) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| "Connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws_stream.split())
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
