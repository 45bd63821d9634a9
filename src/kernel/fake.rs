//! Scripted backend for session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::{ExecutionControl, KernelError, KernelEvent, KernelResult, Listeners, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    Execute { session_id: String, code: String },
    Interrupt,
    Restart,
}

#[derive(Debug, Default)]
pub struct FakeKernel {
    listeners: Listeners,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_execute: AtomicBool,
    fail_restart: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl FakeKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected() -> Arc<Self> {
        let fake = Self::default();
        fake.connected.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn emit(&self, event: KernelEvent) {
        self.listeners.emit(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_execute(&self) {
        self.fail_execute.store(true, Ordering::SeqCst);
    }

    pub fn fail_restart(&self) {
        self.fail_restart.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ExecutionControl for FakeKernel {
    fn name(&self) -> String {
        "fake".to_string()
    }

    fn connect(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            self.record(Call::Connect);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(KernelError::ProcessExited);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(Call::Disconnect);
            self.connected.store(false, Ordering::SeqCst);
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn execute<'a>(&'a self, session_id: &'a str, code: &'a str) -> BoxFuture<'a, KernelResult<()>> {
        Box::pin(async move {
            self.record(Call::Execute { session_id: session_id.to_string(), code: code.to_string() });
            if self.fail_execute.load(Ordering::SeqCst) {
                return Err(KernelError::Protocol("scripted failure".into()));
            }
            Ok(())
        })
    }

    fn interrupt(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            self.record(Call::Interrupt);
            Ok(())
        })
    }

    fn restart(&self) -> BoxFuture<'_, KernelResult<()>> {
        Box::pin(async move {
            self.record(Call::Restart);
            if self.fail_restart.load(Ordering::SeqCst) {
                return Err(KernelError::ProcessExited);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> Subscription {
        self.listeners.subscribe()
    }
}
