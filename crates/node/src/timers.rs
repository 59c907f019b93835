//! Round timer for the production runner.

use bedrock_types::TimeoutMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Entries on the timeout inbox: peer timeout messages and local round-timer
/// fires share one queue, so the engine observes them in arrival order.
#[derive(Debug, Clone)]
pub enum TimeoutEntry {
    /// A peer's timeout message, delivered by the transport.
    Peer(TimeoutMessage),
    /// Our own round timer expired for the given (height, round).
    Timer { height: u64, round: u64 },
}

/// One-shot round timer.
///
/// Arming replaces any previously armed timer. The fired event carries the
/// (height, round) it was armed for; the engine drops firings for rounds it
/// has already left, so a late abort is harmless.
pub struct RoundTimer {
    handle: Option<JoinHandle<()>>,
    tx: mpsc::Sender<TimeoutEntry>,
}

impl RoundTimer {
    /// Create a timer that delivers fires into the timeout inbox.
    pub fn new(tx: mpsc::Sender<TimeoutEntry>) -> Self {
        RoundTimer { handle: None, tx }
    }

    /// Arm the timer for a (height, round), cancelling the previous one.
    pub fn arm(&mut self, height: u64, round: u64, duration: Duration) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        let tx = self.tx.clone();
        self.handle = Some(tokio::spawn(async move {
            trace!(height, round, ?duration, "round timer armed");
            tokio::time::sleep(duration).await;
            // Non-blocking: the inbox drop policy applies to timers too; a
            // stale fire would be dropped by the engine anyway.
            if tx.try_send(TimeoutEntry::Timer { height, round }).is_err() {
                debug!(height, round, "timeout inbox full, dropping timer fire");
            }
        }));
        debug!(height, round, ?duration, "round timer set");
    }

    /// Cancel an armed timer.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("round timer cancelled");
        }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires_with_its_location() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RoundTimer::new(tx);

        timer.arm(3, 1, Duration::from_millis(10));
        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(fired, TimeoutEntry::Timer { height: 3, round: 1 }));
    }

    #[tokio::test]
    async fn rearming_cancels_the_previous_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RoundTimer::new(tx);

        timer.arm(3, 0, Duration::from_millis(100));
        timer.arm(3, 1, Duration::from_millis(10));

        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        // Only the replacement fires.
        assert!(matches!(fired, TimeoutEntry::Timer { round: 1, .. }));
        let extra = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(extra.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = RoundTimer::new(tx);

        timer.arm(1, 0, Duration::from_millis(20));
        timer.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "timer should have been cancelled");
    }
}
