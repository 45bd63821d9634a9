//! One-shot handler: run code once, print outputs as they arrive, then the
//! duration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::execution::format::{format_output, millis};
use crate::kernel::ExecutionControl;
use crate::printer::OutputPrinter;
use crate::session::{ExecutionSession, SessionState};

pub async fn run(kernel: Arc<dyn ExecutionControl>, code: &str, settings: &Settings) -> Result<()> {
    let printer = OutputPrinter::new(&settings.color, settings.use_color);
    let mut session = ExecutionSession::attach(kernel);
    session.connect().await?;

    let outcome = execute(&mut session, code, &printer, settings.request_timeout).await;
    session.shutdown().await;
    outcome
}

async fn execute(
    session: &mut ExecutionSession,
    code: &str,
    printer: &OutputPrinter,
    timeout: Duration,
) -> Result<()> {
    session.run(code).await;
    let mut printed = print_new(session, printer, 0);
    // a run that was rejected up front never starts
    if !session.is_executing() && session.outputs().iter().any(|r| r.is_error()) {
        bail!("{}", first_error(session));
    }

    let waited = tokio::time::timeout(timeout, async {
        loop {
            let Some(event) = session.next_event().await else {
                break;
            };
            debug!(?event, "kernel event");
            session.handle_event(event);
            printed = print_new(session, printer, printed);
            if matches!(session.state(), SessionState::Completed { .. } | SessionState::Failed { .. }) {
                break;
            }
        }
    })
    .await;

    if waited.is_err() {
        warn!(timeout_secs = timeout.as_secs(), "no completion from kernel");
        let _ = session.stop().await;
        bail!("execution did not complete within {}s", timeout.as_secs());
    }

    let duration = millis(session.completion_duration().unwrap_or_default());
    match session.state().clone() {
        SessionState::Completed { .. } => {
            let failed = session.outputs().iter().any(|r| r.is_error());
            printer.print_duration(duration, failed);
            if failed {
                bail!("{}", first_error(session));
            }
            Ok(())
        }
        SessionState::Failed { message, .. } => {
            printer.print_duration(duration, true);
            Err(anyhow!(message))
        }
        _ => bail!("kernel closed the connection before the run finished"),
    }
}

fn print_new(session: &ExecutionSession, printer: &OutputPrinter, printed: usize) -> usize {
    let outputs = session.outputs();
    for result in outputs.iter().skip(printed) {
        printer.print(result);
    }
    outputs.len()
}

fn first_error(session: &ExecutionSession) -> String {
    session
        .outputs()
        .iter()
        .find(|r| r.is_error())
        .map(|r| format_output(r).lines().next().unwrap_or_default().to_string())
        .unwrap_or_else(|| "execution failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionResult;
    use crate::kernel::fake::FakeKernel;
    use crate::kernel::KernelEvent;
    use crate::session::SESSION_ID;

    fn printer() -> OutputPrinter {
        OutputPrinter::new("cyan", false)
    }

    #[tokio::test]
    async fn test_completed_run_succeeds() {
        let kernel = FakeKernel::connected();
        let mut session = ExecutionSession::attach(kernel.clone());
        let driver = {
            let kernel = kernel.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                kernel.emit(KernelEvent::ExecutionStart { session_id: SESSION_ID.into() });
                kernel.emit(KernelEvent::Output { session_id: SESSION_ID.into(), result: ExecutionResult::stdout("hi\n") });
                kernel.emit(KernelEvent::ExecutionComplete { session_id: SESSION_ID.into() });
            })
        };
        execute(&mut session, "print('hi')", &printer(), Duration::from_secs(5)).await.unwrap();
        driver.await.unwrap();
        assert_eq!(session.outputs(), &[ExecutionResult::stdout("hi\n")]);
    }

    fn drive(kernel: Arc<FakeKernel>, events: Vec<KernelEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            for event in events {
                kernel.emit(event);
            }
        })
    }

    #[tokio::test]
    async fn test_error_output_fails_the_run() {
        let kernel = FakeKernel::connected();
        let mut session = ExecutionSession::attach(kernel.clone());
        let driver = drive(
            kernel.clone(),
            vec![
                KernelEvent::ExecutionStart { session_id: SESSION_ID.into() },
                KernelEvent::Output { session_id: SESSION_ID.into(), result: ExecutionResult::error("NameError", "x") },
                KernelEvent::ExecutionComplete { session_id: SESSION_ID.into() },
            ],
        );
        let err = execute(&mut session, "x", &printer(), Duration::from_secs(5)).await.unwrap_err();
        driver.await.unwrap();
        assert_eq!(err.to_string(), "NameError: x");
    }

    #[tokio::test]
    async fn test_execution_error_is_reported() {
        let kernel = FakeKernel::connected();
        let mut session = ExecutionSession::attach(kernel.clone());
        let driver = drive(
            kernel.clone(),
            vec![KernelEvent::ExecutionError { session_id: SESSION_ID.into(), message: "kernel died".into() }],
        );
        let err = execute(&mut session, "1", &printer(), Duration::from_secs(5)).await.unwrap_err();
        driver.await.unwrap();
        assert_eq!(err.to_string(), "kernel died");
    }

    #[tokio::test]
    async fn test_stale_completion_does_not_end_the_next_run() {
        let kernel = FakeKernel::connected();
        let mut session = ExecutionSession::attach(kernel.clone());
        // leftovers of an earlier run nobody consumed
        kernel.emit(KernelEvent::Output { session_id: SESSION_ID.into(), result: ExecutionResult::stdout("old\n") });
        kernel.emit(KernelEvent::ExecutionComplete { session_id: SESSION_ID.into() });

        let driver = drive(
            kernel.clone(),
            vec![
                KernelEvent::ExecutionStart { session_id: SESSION_ID.into() },
                KernelEvent::Output { session_id: SESSION_ID.into(), result: ExecutionResult::stdout("new\n") },
                KernelEvent::ExecutionComplete { session_id: SESSION_ID.into() },
            ],
        );
        execute(&mut session, "print('new')", &printer(), Duration::from_secs(5)).await.unwrap();
        driver.await.unwrap();
        assert_eq!(session.outputs(), &[ExecutionResult::stdout("new\n")]);
    }

    #[tokio::test]
    async fn test_disconnected_run_fails_fast() {
        let kernel = FakeKernel::new();
        let mut session = ExecutionSession::attach(kernel.clone());
        let err = execute(&mut session, "1", &printer(), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.to_string(), "ConnectionError: connection not available");
        assert!(kernel.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_completion_times_out() {
        let kernel = FakeKernel::connected();
        let mut session = ExecutionSession::attach(kernel.clone());
        let err = execute(&mut session, "1", &printer(), Duration::from_secs(2)).await.unwrap_err();
        assert!(err.to_string().contains("did not complete"));
    }
}
