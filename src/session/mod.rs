//! Execution session tracker.
//!
//! Owns the code buffer, the output list and the timing state of one
//! playground session, and mediates between user intents (run, stop,
//! restart, clear) and an [`ExecutionControl`] backend. All mutation happens
//! through `&mut self`; backend notifications arrive on a [`Subscription`]
//! and are applied with [`ExecutionSession::handle_event`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::execution::format::millis;
use crate::execution::ExecutionResult;
use crate::kernel::{ExecutionControl, KernelEvent, KernelResult, KernelStatus, Subscription};

mod ticker;

pub use ticker::Ticker;

/// Session id every playground run is tagged with.
pub const SESSION_ID: &str = "playground";

/// Timing state of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running { started_at: Instant },
    Completed { duration: Duration },
    Failed { duration: Duration, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Executing,
    Restarting,
    Error(String),
}

impl ConnectionState {
    pub fn label(&self) -> &str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Restarting => "restarting",
            Self::Error(_) => "error",
        }
    }
}

pub struct ExecutionSession {
    kernel: Arc<dyn ExecutionControl>,
    subscription: Subscription,
    code: String,
    outputs: Vec<ExecutionResult>,
    state: SessionState,
    connection: ConnectionState,
    kernel_status: Option<KernelStatus>,
    ticks: Option<(Duration, mpsc::UnboundedSender<()>)>,
    ticker: Option<Ticker>,
}

impl ExecutionSession {
    /// Subscribe to `kernel` and start with an empty session.
    pub fn attach(kernel: Arc<dyn ExecutionControl>) -> Self {
        let subscription = kernel.subscribe();
        let connection = if kernel.is_connected() {
            ConnectionState::Ready
        } else {
            ConnectionState::Disconnected
        };
        Self {
            kernel,
            subscription,
            code: String::new(),
            outputs: Vec::new(),
            state: SessionState::Idle,
            connection,
            kernel_status: None,
            ticks: None,
            ticker: None,
        }
    }

    /// Emit `()` on `ticks` every `period` while a run is in progress.
    pub fn with_ticker(mut self, period: Duration, ticks: mpsc::UnboundedSender<()>) -> Self {
        self.ticks = Some((period, ticks));
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn kernel_name(&self) -> String {
        self.kernel.name()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut String {
        &mut self.code
    }

    pub fn outputs(&self) -> &[ExecutionResult] {
        &self.outputs
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn kernel_status(&self) -> Option<KernelStatus> {
        self.kernel_status
    }

    pub fn is_executing(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    #[cfg(test)]
    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Duration of the last finished run, if one finished since the last clear.
    pub fn completion_duration(&self) -> Option<Duration> {
        match &self.state {
            SessionState::Completed { duration } | SessionState::Failed { duration, .. } => Some(*duration),
            _ => None,
        }
    }

    /// Time since the running execution started.
    pub fn elapsed(&self) -> Option<Duration> {
        match self.state {
            SessionState::Running { started_at } => Some(started_at.elapsed()),
            _ => None,
        }
    }

    pub async fn connect(&mut self) -> KernelResult<()> {
        self.connection = ConnectionState::Connecting;
        match self.kernel.connect().await {
            Ok(()) => {
                info!(kernel = %self.kernel.name(), "kernel connected");
                self.connection = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => {
                warn!(kernel = %self.kernel.name(), error = %err, "kernel connection failed");
                self.connection = ConnectionState::Error(err.to_string());
                Err(err)
            }
        }
    }

    /// Run `code`. Outputs and timing arrive later through [`handle_event`].
    ///
    /// Without a connection a single error result is recorded and the
    /// backend is not called. A failure of the `execute` request itself is
    /// logged and otherwise ignored.
    ///
    /// [`handle_event`]: ExecutionSession::handle_event
    pub async fn run(&mut self, code: &str) {
        // settle the previous run before its leftovers could land in this one
        let settled = self.pump();
        if settled > 0 {
            trace!(settled, "applied queued events from the previous run");
        }
        self.set_state(SessionState::Idle);
        if !self.kernel.is_connected() {
            warn!("run requested without an active kernel connection");
            self.outputs = vec![ExecutionResult::error("ConnectionError", "connection not available")];
            return;
        }

        self.outputs.clear();
        self.connection = ConnectionState::Executing;
        debug!(bytes = code.len(), "submitting code");
        if let Err(err) = self.kernel.execute(SESSION_ID, code).await {
            error!(error = %err, "execute request failed");
            if !self.is_executing() && self.connection == ConnectionState::Executing {
                self.connection = ConnectionState::Ready;
            }
        }
    }

    /// Run the current code buffer.
    pub async fn run_buffer(&mut self) {
        let code = self.code.clone();
        self.run(&code).await;
    }

    /// Ask the backend to interrupt. Outputs are left alone; the backend
    /// reports completion through the usual events.
    pub async fn stop(&mut self) -> KernelResult<()> {
        info!("interrupt requested");
        self.kernel.interrupt().await
    }

    pub async fn restart(&mut self) -> KernelResult<()> {
        self.outputs.clear();
        self.connection = ConnectionState::Restarting;
        info!("kernel restart requested");
        match self.kernel.restart().await {
            Ok(()) => {
                if self.is_executing() {
                    self.set_state(SessionState::Idle);
                }
                self.connection = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "kernel restart failed");
                self.connection = ConnectionState::Error(err.to_string());
                Err(err)
            }
        }
    }

    /// Empty the outputs and forget the last completion time. A run in
    /// progress keeps running.
    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
        if matches!(self.state, SessionState::Completed { .. } | SessionState::Failed { .. }) {
            self.set_state(SessionState::Idle);
        }
    }

    /// Apply one backend notification.
    pub fn handle_event(&mut self, event: KernelEvent) {
        if let Some(session_id) = event.session_id() {
            if session_id != SESSION_ID {
                trace!(session_id, "ignoring event for another session");
                return;
            }
        }

        match event {
            KernelEvent::Output { result, .. } => {
                trace!(kind = result.kind(), "output received");
                self.outputs.push(result);
            }
            KernelEvent::ExecutionStart { .. } => {
                self.connection = ConnectionState::Executing;
                self.set_state(SessionState::Running { started_at: Instant::now() });
            }
            KernelEvent::ExecutionComplete { .. } => {
                let duration = self.finish();
                debug!(duration_ms = millis(duration), "execution complete");
                self.set_state(SessionState::Completed { duration });
            }
            KernelEvent::ExecutionError { message, .. } => {
                let duration = self.finish();
                warn!(%message, "execution failed");
                self.outputs.push(ExecutionResult::error("ExecutionError", message.clone()));
                self.set_state(SessionState::Failed { duration, message });
            }
            KernelEvent::Status(status) => self.apply_status(status),
        }
    }

    /// Apply every event already queued, without waiting. Returns how many
    /// were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.subscription.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next backend notification.
    pub async fn next_event(&mut self) -> Option<KernelEvent> {
        self.subscription.recv().await
    }

    /// Release the backend connection.
    pub async fn shutdown(&mut self) {
        self.ticker = None;
        self.kernel.disconnect().await;
        self.connection = ConnectionState::Disconnected;
        info!("session closed");
    }

    fn finish(&mut self) -> Duration {
        if self.connection == ConnectionState::Executing {
            self.connection = ConnectionState::Ready;
        }
        match self.state {
            SessionState::Running { started_at } => Instant::now().saturating_duration_since(started_at),
            _ => Duration::ZERO,
        }
    }

    fn apply_status(&mut self, status: KernelStatus) {
        self.kernel_status = Some(status);
        match status {
            KernelStatus::Dead => {
                self.connection = ConnectionState::Error("kernel died".to_string());
            }
            KernelStatus::Restarting => self.connection = ConnectionState::Restarting,
            KernelStatus::Starting => self.connection = ConnectionState::Connecting,
            KernelStatus::Idle if !self.is_executing() => {
                if matches!(self.connection, ConnectionState::Connecting | ConnectionState::Restarting) {
                    self.connection = ConnectionState::Ready;
                }
            }
            KernelStatus::Idle | KernelStatus::Busy => {}
        }
    }

    fn set_state(&mut self, state: SessionState) {
        let running = matches!(state, SessionState::Running { .. });
        self.state = state;
        if !running {
            self.ticker = None;
        } else if self.ticker.is_none() {
            if let Some((period, ticks)) = &self.ticks {
                self.ticker = Some(Ticker::spawn(*period, ticks.clone()));
            }
        }
    }
}
