//! Fan-out of kernel events to registered subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use super::KernelEvent;

#[derive(Debug, Default)]
struct ListenerTable {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<KernelEvent>>,
}

/// Registry shared between a backend and its background tasks.
#[derive(Debug, Clone, Default)]
pub struct Listeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener. It stays registered until the returned
    /// subscription is dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table.senders.insert(id, tx);
        Subscription { id, rx, table: Arc::downgrade(&self.table) }
    }

    /// Deliver an event to every live subscription, in registration order
    /// per subscriber. Closed receivers are pruned.
    pub fn emit(&self, event: KernelEvent) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).senders.len()
    }
}

/// Receiving end of a listener registration. Dropping it deregisters.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<KernelEvent>,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<KernelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<KernelEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().unwrap_or_else(PoisonError::into_inner).senders.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscription_sees_events_in_order() {
        let listeners = Listeners::new();
        let mut a = listeners.subscribe();
        let mut b = listeners.subscribe();

        listeners.emit(KernelEvent::ExecutionStart { session_id: "s".into() });
        listeners.emit(KernelEvent::ExecutionComplete { session_id: "s".into() });

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.try_recv(), Some(KernelEvent::ExecutionStart { session_id: "s".into() }));
            assert_eq!(sub.try_recv(), Some(KernelEvent::ExecutionComplete { session_id: "s".into() }));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let listeners = Listeners::new();
        let sub = listeners.subscribe();
        let _other = listeners.subscribe();
        assert_eq!(listeners.len(), 2);
        drop(sub);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let listeners = Listeners::new();
        let sub = listeners.subscribe();
        drop(listeners);
        drop(sub);
    }
}
