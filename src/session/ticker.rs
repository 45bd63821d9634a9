//! Periodic refresh signal for the live elapsed-time display.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sends `()` on `ticks` every `period` until dropped.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn spawn(period: Duration, ticks: mpsc::UnboundedSender<()>) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticks.send(()).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticker = Ticker::spawn(Duration::from_millis(100), tx);

        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.recv().await, Some(()));

        drop(ticker);
        // the task owned the only sender; once aborted the channel closes
        while rx.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_receiver_goes_away() {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticker = Ticker::spawn(Duration::from_millis(100), tx);
        drop(rx);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(ticker.handle.is_finished());
    }
}
