//! Execution-control capability: the seam between a playground session and
//! whatever actually runs the code.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, Settings};
use crate::execution::ExecutionResult;

pub mod listeners;
pub mod local;
pub mod remote;

#[cfg(test)]
pub mod fake;

pub use listeners::{Listeners, Subscription};

/// Kernel lifecycle status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    Starting,
    Idle,
    Busy,
    Restarting,
    Dead,
}

/// Asynchronous notification from a backend. Execution events are scoped by
/// the session id passed to [`ExecutionControl::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum KernelEvent {
    Output { session_id: String, result: ExecutionResult },
    ExecutionStart { session_id: String },
    ExecutionComplete { session_id: String },
    ExecutionError { session_id: String, message: String },
    Status(KernelStatus),
}

impl KernelEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Output { session_id, .. }
            | Self::ExecutionStart { session_id }
            | Self::ExecutionComplete { session_id }
            | Self::ExecutionError { session_id, .. } => Some(session_id),
            Self::Status(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("connection not available")]
    NotConnected,
    #[error("failed to start interpreter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("kernel i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("kernel api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid kernel message: {0}")]
    Protocol(String),
    #[error("kernel process exited")]
    ProcessExited,
}

impl From<tokio_tungstenite::tungstenite::Error> for KernelError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        Self::Protocol(error.to_string())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Operations a code-execution backend exposes to a session.
///
/// Methods take `&self`; backends keep their connection state behind
/// interior mutability so one instance can be shared with background tasks.
/// Completion of a run is never signalled by `execute` returning: it arrives
/// later as a [`KernelEvent`] on every [`Subscription`].
pub trait ExecutionControl: Send + Sync {
    /// Human readable backend label, shown in the playground header.
    fn name(&self) -> String;

    fn connect(&self) -> BoxFuture<'_, KernelResult<()>>;

    /// Release the connection. Calling it again is a no-op.
    fn disconnect(&self) -> BoxFuture<'_, ()>;

    fn is_connected(&self) -> bool;

    fn execute<'a>(&'a self, session_id: &'a str, code: &'a str) -> BoxFuture<'a, KernelResult<()>>;

    /// Best-effort request to stop the running execution.
    fn interrupt(&self) -> BoxFuture<'_, KernelResult<()>>;

    fn restart(&self) -> BoxFuture<'_, KernelResult<()>>;

    fn subscribe(&self) -> Subscription;
}

/// Build the backend selected by the resolved settings.
pub fn from_settings(settings: &Settings) -> KernelResult<Arc<dyn ExecutionControl>> {
    let kernel: Arc<dyn ExecutionControl> = match settings.backend {
        BackendKind::Local => Arc::new(local::LocalKernel::new(&settings.python)),
        BackendKind::Remote => Arc::new(remote::RemoteKernel::new(remote::RemoteOptions {
            base_url: settings.url.clone(),
            kernel_id: settings.kernel_id.clone(),
            kernel_name: settings.kernel_name.clone(),
            request_timeout: settings.request_timeout,
        })?),
    };
    Ok(kernel)
}
