//! Remote backend: a kernel hosted by the notebook server.
//!
//! Lifecycle goes through the REST API (`/api/v1/kernels`), execution through
//! the kernel WebSocket (`/ws/kernel/{id}`). Outgoing messages are JSON
//! objects tagged by `type` (`execute`, `interrupt`, `ping`). Incoming
//! messages are either control messages (`execution_start`,
//! `execution_complete`, `interrupted`, `pong`, `error`) or kernel outputs,
//! recognised by their `output_type` field.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ExecutionControl, KernelError, KernelEvent, KernelResult, KernelStatus, Listeners, Subscription};
use crate::execution::ExecutionResult;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub base_url: String,
    /// Attach to this kernel instead of creating one.
    pub kernel_id: Option<String>,
    pub kernel_name: String,
    pub request_timeout: Duration,
}

/// Kernel record returned by the REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<KernelStatus>,
    #[serde(default)]
    pub execution_count: u32,
}

/// Decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ExecutionStart {
        cell_id: Option<String>,
    },
    Output {
        cell_id: Option<String>,
        result: ExecutionResult,
    },
    ExecutionComplete {
        cell_id: Option<String>,
        status: Option<String>,
        execution_count: Option<u32>,
        duration_ms: Option<u64>,
    },
    Error {
        cell_id: Option<String>,
        message: String,
    },
    Interrupted,
    Pong,
    Other(String),
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn parse_server_message(text: &str) -> KernelResult<ServerMessage> {
    let value: Value = serde_json::from_str(text)?;
    let cell_id = str_field(&value, "cell_id");

    // output messages carry the kernel output fields merged in, including a
    // `type` that mirrors `output_type`
    if value.get("output_type").is_some() {
        let result = serde_json::from_value(value)?;
        return Ok(ServerMessage::Output { cell_id, result });
    }

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| KernelError::Protocol("message without type".into()))?;
    let message = match kind {
        "execution_start" => ServerMessage::ExecutionStart { cell_id },
        "execution_complete" => ServerMessage::ExecutionComplete {
            cell_id,
            status: str_field(&value, "status"),
            execution_count: value
                .get("execution_count")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            duration_ms: value.get("duration_ms").and_then(Value::as_u64),
        },
        "error" => ServerMessage::Error {
            cell_id,
            message: str_field(&value, "message").unwrap_or_else(|| "unknown kernel error".to_string()),
        },
        "interrupted" => ServerMessage::Interrupted,
        "pong" => ServerMessage::Pong,
        other => ServerMessage::Other(other.to_string()),
    };
    Ok(message)
}

/// Translate a server message into kernel events. Messages without a cell id
/// are attributed to the execution in flight, if any.
fn to_events(message: ServerMessage, active: &Mutex<Option<String>>) -> Vec<KernelEvent> {
    let mut active = active.lock().unwrap_or_else(PoisonError::into_inner);
    let resolve = |cell_id: Option<String>, active: &Option<String>| cell_id.or_else(|| active.clone());

    match message {
        ServerMessage::ExecutionStart { cell_id } => match resolve(cell_id, &active) {
            Some(session_id) => {
                *active = Some(session_id.clone());
                vec![KernelEvent::ExecutionStart { session_id }, KernelEvent::Status(KernelStatus::Busy)]
            }
            None => Vec::new(),
        },
        ServerMessage::Output { cell_id, result } => match resolve(cell_id, &active) {
            Some(session_id) => vec![KernelEvent::Output { session_id, result }],
            None => Vec::new(),
        },
        ServerMessage::ExecutionComplete { cell_id, status, execution_count, duration_ms } => {
            debug!(?status, ?execution_count, ?duration_ms, "execution complete");
            let session_id = resolve(cell_id, &active);
            *active = None;
            let mut events: Vec<KernelEvent> = session_id
                .map(|session_id| KernelEvent::ExecutionComplete { session_id })
                .into_iter()
                .collect();
            events.push(KernelEvent::Status(KernelStatus::Idle));
            events
        }
        ServerMessage::Error { cell_id, message } => match resolve(cell_id, &active) {
            Some(session_id) => {
                *active = None;
                vec![KernelEvent::ExecutionError { session_id, message }, KernelEvent::Status(KernelStatus::Idle)]
            }
            None => {
                warn!(%message, "kernel error outside an execution");
                Vec::new()
            }
        },
        ServerMessage::Interrupted => {
            info!("kernel acknowledged interrupt");
            Vec::new()
        }
        ServerMessage::Pong => Vec::new(),
        ServerMessage::Other(kind) => {
            debug!(kind, "ignoring server message");
            Vec::new()
        }
    }
}

/// `http(s)://host` → `ws(s)://host/ws/kernel/{id}`
pub fn websocket_url(base_url: &str, kernel_id: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/ws/kernel/{kernel_id}")
}

struct Connection {
    kernel_id: String,
    /// Created by this client, so shut down on disconnect.
    owned: bool,
    outgoing: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct RemoteKernel {
    options: RemoteOptions,
    http: reqwest::Client,
    listeners: Listeners,
    connection: tokio::sync::Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
    active: Arc<Mutex<Option<String>>>,
}

impl RemoteKernel {
    pub fn new(options: RemoteOptions) -> KernelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            options,
            http,
            listeners: Listeners::new(),
            connection: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/kernels{path}", self.options.base_url.trim_end_matches('/'))
    }

    async fn create_kernel(&self) -> KernelResult<KernelInfo> {
        let info: KernelInfo = self
            .http
            .post(self.api_url(""))
            .json(&json!({ "name": self.options.kernel_name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(kernel_id = %info.id, name = ?info.name, "remote kernel created");
        Ok(info)
    }

    async fn shutdown_kernel(&self, kernel_id: &str) {
        let result = self
            .http
            .delete(self.api_url(&format!("/{kernel_id}")))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match result {
            Ok(_) => info!(kernel_id, "remote kernel shut down"),
            Err(err) => warn!(kernel_id, error = %err, "remote kernel shutdown failed"),
        }
    }

    async fn send(&self, payload: Value) -> KernelResult<()> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(KernelError::NotConnected)?;
        connection
            .outgoing
            .send(Message::text(payload.to_string()))
            .map_err(|_| KernelError::NotConnected)
    }

    async fn kernel_id(&self) -> KernelResult<String> {
        let guard = self.connection.lock().await;
        guard.as_ref().map(|c| c.kernel_id.clone()).ok_or(KernelError::NotConnected)
    }
}

impl ExecutionControl for RemoteKernel {
    fn name(&self) -> String {
        format!("remote {}", self.options.base_url)
    }

    fn connect(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            let mut slot = self.connection.lock().await;
            if slot.is_some() && self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            *slot = None;
            self.listeners.emit(KernelEvent::Status(KernelStatus::Starting));

            let (kernel_id, owned) = match &self.options.kernel_id {
                Some(id) => (id.clone(), false),
                None => (self.create_kernel().await?.id, true),
            };

            let url = websocket_url(&self.options.base_url, &kernel_id);
            let stream = match connect_async(url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    if owned {
                        self.shutdown_kernel(&kernel_id).await;
                    }
                    return Err(err.into());
                }
            };
            info!(%url, "kernel websocket connected");

            let (outgoing, rx) = mpsc::unbounded_channel();
            self.connected.store(true, Ordering::SeqCst);
            let task = tokio::spawn(pump_socket(
                stream,
                rx,
                self.listeners.clone(),
                self.active.clone(),
                self.connected.clone(),
            ));
            *slot = Some(Connection { kernel_id, owned, outgoing, task });
            self.listeners.emit(KernelEvent::Status(KernelStatus::Idle));
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let connection = self.connection.lock().await.take();
            self.connected.store(false, Ordering::SeqCst);
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
            let Some(connection) = connection else {
                return;
            };
            let _ = connection.outgoing.send(Message::Close(None));
            // give the socket task a moment to flush the close frame
            tokio::time::sleep(Duration::from_millis(50)).await;
            if connection.owned {
                self.shutdown_kernel(&connection.kernel_id).await;
            }
            info!(kernel_id = %connection.kernel_id, "kernel disconnected");
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn execute<'a>(&'a self, session_id: &'a str, code: &'a str) -> BoxFuture<'a, KernelResult<()>> {
        Box::pin(async move {
            let kernel_id = self.kernel_id().await?;
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(session_id.to_string());
            self.send(json!({
                "type": "execute",
                "kernel_id": kernel_id,
                "code": code,
                "cell_id": session_id,
            }))
            .await
        })
    }

    fn interrupt(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            let kernel_id = self.kernel_id().await?;
            self.send(json!({ "type": "interrupt", "kernel_id": kernel_id })).await
        })
    }

    fn restart(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            let kernel_id = self.kernel_id().await?;
            self.listeners.emit(KernelEvent::Status(KernelStatus::Restarting));
            let info: KernelInfo = self
                .http
                .post(self.api_url(&format!("/{kernel_id}/restart")))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            info!(kernel_id = %info.id, execution_count = info.execution_count, "remote kernel restarted");
            self.listeners.emit(KernelEvent::Status(info.status.unwrap_or(KernelStatus::Idle)));
            Ok(())
        })
    }

    fn subscribe(&self) -> Subscription {
        self.listeners.subscribe()
    }
}

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn pump_socket(
    stream: Socket,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    listeners: Listeners,
    active: Arc<Mutex<Option<String>>>,
    connected: Arc<AtomicBool>,
) {
    let (mut sink, mut source) = stream.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, Message::Close(_));
                if let Err(err) = sink.send(msg).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(err) = sink.send(Message::text(json!({ "type": "ping" }).to_string())).await {
                    warn!(error = %err, "websocket ping failed");
                    break;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => match parse_server_message(text.as_str()) {
                    Ok(message) => {
                        for event in to_events(message, &active) {
                            listeners.emit(event);
                        }
                    }
                    Err(err) => warn!(error = %err, "undecodable kernel message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("kernel websocket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket receive failed");
                    break;
                }
            },
        }
    }

    let was_connected = connected.swap(false, Ordering::SeqCst);
    let in_flight = active.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(session_id) = in_flight {
        listeners.emit(KernelEvent::ExecutionError { session_id, message: "kernel connection lost".to_string() });
    }
    if was_connected {
        listeners.emit(KernelEvent::Status(KernelStatus::Dead));
    }
}
