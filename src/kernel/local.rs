//! Local backend: a Python interpreter subprocess driven over stdin/stdout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ExecutionControl, KernelError, KernelEvent, KernelResult, KernelStatus, Listeners, Subscription};
use crate::execution::ExecutionResult;
use crate::process::{python, ProcessHandle};

/// Request id → session id of executions the interpreter has not finished.
type Pending = Arc<Mutex<HashMap<u64, String>>>;

/// Session of the oldest unfinished request.
fn current_session(pending: &Pending) -> Option<String> {
    let pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.iter().min_by_key(|(id, _)| **id).map(|(_, session_id)| session_id.clone())
}

/// One line written by the bootstrap loop.
#[derive(Debug, PartialEq)]
enum InterpreterReply {
    /// The bootstrap installed its interrupt handler and reads requests.
    Ready,
    Output { id: u64, result: ExecutionResult },
    Done { id: u64, ok: bool, message: Option<String> },
}

fn decode_reply(line: &str) -> KernelResult<InterpreterReply> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("ready").and_then(Value::as_bool) == Some(true) {
        return Ok(InterpreterReply::Ready);
    }
    let id = value
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| KernelError::Protocol("reply without request id".into()))?;

    if value.get("output_type").is_some() {
        let result = serde_json::from_value(value)?;
        return Ok(InterpreterReply::Output { id, result });
    }
    match value.get("status").and_then(Value::as_str) {
        Some(status) => Ok(InterpreterReply::Done {
            id,
            ok: status == "ok",
            message: value.get("message").and_then(Value::as_str).map(str::to_string),
        }),
        None => Err(KernelError::Protocol(format!("unrecognised reply: {line}"))),
    }
}

struct Interpreter {
    child: Child,
    stdin: ChildStdin,
    reader: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl Interpreter {
    /// Stop reading replies first so a deliberate kill is not reported as a crash.
    async fn shutdown(&mut self) {
        self.reader.abort();
        let _ = (&mut self.reader).await;
        self.stderr_task.abort();
        if let Err(err) = self.child.kill().await {
            debug!(error = %err, "interpreter already gone");
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.reader.abort();
        self.stderr_task.abort();
    }
}

pub struct LocalKernel {
    python: String,
    listeners: Listeners,
    interpreter: tokio::sync::Mutex<Option<Interpreter>>,
    connected: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    pending: Pending,
    next_request: AtomicU64,
}

impl LocalKernel {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
            listeners: Listeners::new(),
            interpreter: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request: AtomicU64::new(1),
        }
    }

    fn spawn(&self) -> KernelResult<Interpreter> {
        let ProcessHandle { child, stdin, stdout, stderr } =
            python::start_python(&self.python, python::BOOTSTRAP)?;
        info!(python = %self.python, pid = ?child.id(), "interpreter started");

        self.connected.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        let reader = tokio::spawn(read_replies(
            stdout,
            self.listeners.clone(),
            self.pending.clone(),
            self.connected.clone(),
            self.ready.clone(),
        ));
        let stderr_task = tokio::spawn(forward_stderr(stderr, self.listeners.clone(), self.pending.clone()));
        Ok(Interpreter { child, stdin, reader, stderr_task })
    }

    /// Fail every unfinished execution with `reason`.
    fn fail_pending(&self, reason: &str) {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain().map(|(_, session_id)| session_id).collect()
        };
        for session_id in drained {
            self.listeners.emit(KernelEvent::ExecutionError { session_id, message: reason.to_string() });
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Raise `KeyboardInterrupt` inside the running code; the bootstrap loop
    /// reports it as an error output and keeps the namespace.
    #[cfg(unix)]
    async fn interrupt_running(&self) -> KernelResult<()> {
        // SIGINT before the handler is installed would kill the interpreter
        if !self.ready.load(Ordering::SeqCst) {
            debug!("interpreter still starting, interrupt skipped");
            return Ok(());
        }
        let pid = {
            let slot = self.interpreter.lock().await;
            slot.as_ref().and_then(|i| i.child.id())
        };
        match pid {
            Some(pid) => python::send_interrupt(pid),
            None => Err(KernelError::NotConnected),
        }
    }

    #[cfg(not(unix))]
    async fn interrupt_running(&self) -> KernelResult<()> {
        self.respawn("execution interrupted").await
    }

    /// Replace the interpreter with a fresh one. Namespace state is lost.
    async fn respawn(&self, reason: &str) -> KernelResult<()> {
        let mut slot = self.interpreter.lock().await;
        self.listeners.emit(KernelEvent::Status(KernelStatus::Restarting));
        if let Some(mut old) = slot.take() {
            old.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.fail_pending(reason);

        match self.spawn() {
            Ok(fresh) => {
                *slot = Some(fresh);
                self.listeners.emit(KernelEvent::Status(KernelStatus::Idle));
                Ok(())
            }
            Err(err) => {
                self.listeners.emit(KernelEvent::Status(KernelStatus::Dead));
                Err(err)
            }
        }
    }
}

impl ExecutionControl for LocalKernel {
    fn name(&self) -> String {
        format!("local {}", self.python)
    }

    fn connect(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            let mut slot = self.interpreter.lock().await;
            if slot.is_some() && self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(mut stale) = slot.take() {
                stale.shutdown().await;
            }
            self.listeners.emit(KernelEvent::Status(KernelStatus::Starting));
            *slot = Some(self.spawn()?);
            self.listeners.emit(KernelEvent::Status(KernelStatus::Idle));
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut slot = self.interpreter.lock().await;
            if let Some(mut interpreter) = slot.take() {
                interpreter.shutdown().await;
                info!("interpreter stopped");
            }
            self.connected.store(false, Ordering::SeqCst);
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn execute<'a>(&'a self, session_id: &'a str, code: &'a str) -> BoxFuture<'a, KernelResult<()>> {
        Box::pin(async move {
            let mut slot = self.interpreter.lock().await;
            let interpreter = slot.as_mut().ok_or(KernelError::NotConnected)?;

            let id = self.next_request.fetch_add(1, Ordering::Relaxed);
            let mut request = serde_json::to_string(&json!({ "id": id, "code": code }))?;
            request.push('\n');

            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, session_id.to_string());
            // announced before writing so no output can overtake the start
            self.listeners.emit(KernelEvent::ExecutionStart { session_id: session_id.to_string() });
            self.listeners.emit(KernelEvent::Status(KernelStatus::Busy));

            let written = async {
                interpreter.stdin.write_all(request.as_bytes()).await?;
                interpreter.stdin.flush().await
            }
            .await;
            if let Err(err) = written {
                self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
                self.listeners.emit(KernelEvent::ExecutionError {
                    session_id: session_id.to_string(),
                    message: format!("failed to send code to interpreter: {err}"),
                });
                return Err(err.into());
            }
            debug!(request = id, "code sent to interpreter");
            Ok(())
        })
    }

    fn interrupt(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            if !self.has_pending() {
                debug!("nothing to interrupt");
                return Ok(());
            }
            self.interrupt_running().await
        })
    }

    fn restart(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move { self.respawn("kernel restarted").await })
    }

    fn subscribe(&self) -> Subscription {
        self.listeners.subscribe()
    }
}

async fn read_replies(
    stdout: ChildStdout,
    listeners: Listeners,
    pending: Pending,
    connected: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_reply(&line) {
                Ok(InterpreterReply::Ready) => {
                    debug!("interpreter ready");
                    ready.store(true, Ordering::SeqCst);
                }
                Ok(InterpreterReply::Output { id, result }) => {
                    let session_id = pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&id)
                        .cloned();
                    match session_id {
                        Some(session_id) => listeners.emit(KernelEvent::Output { session_id, result }),
                        None => debug!(request = id, "output for unknown request dropped"),
                    }
                }
                Ok(InterpreterReply::Done { id, ok, message }) => {
                    let session_id = pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
                    if !ok {
                        debug!(request = id, message = message.as_deref().unwrap_or(""), "execution raised");
                    }
                    if let Some(session_id) = session_id {
                        listeners.emit(KernelEvent::ExecutionComplete { session_id });
                    }
                    listeners.emit(KernelEvent::Status(KernelStatus::Idle));
                }
                // raw writes to fd 1 (subprocesses, C extensions) bypass the bootstrap
                Err(err) => match current_session(&pending) {
                    Some(session_id) => listeners.emit(KernelEvent::Output {
                        session_id,
                        result: ExecutionResult::stdout(format!("{line}\n")),
                    }),
                    None => warn!(error = %err, "unreadable interpreter reply"),
                },
            },
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "interpreter stdout failed");
                break;
            }
        }
    }

    warn!("interpreter exited");
    connected.store(false, Ordering::SeqCst);
    ready.store(false, Ordering::SeqCst);
    let drained: Vec<String> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, session_id)| session_id)
        .collect();
    for session_id in drained {
        listeners.emit(KernelEvent::ExecutionError {
            session_id,
            message: KernelError::ProcessExited.to_string(),
        });
    }
    listeners.emit(KernelEvent::Status(KernelStatus::Dead));
}

async fn forward_stderr(stderr: ChildStderr, listeners: Listeners, pending: Pending) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match current_session(&pending) {
            Some(session_id) => listeners.emit(KernelEvent::Output {
                session_id,
                result: ExecutionResult::stderr(format!("{line}\n")),
            }),
            None => warn!(target: "nbplay::interpreter", "{line}"),
        }
    }
}
