use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use super::lock::lock_mutex;

/// One-shot cancellation signal shared by every worker.
///
/// Nothing is ever sent on the channel: triggering drops the only sender, so
/// every cloned receiver becomes ready at once and stays ready. Workers put
/// `receiver()` into their `select!` next to their queue or timer.
pub struct ShutdownSignal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn trigger(&self) -> bool {
        lock_mutex(&self.tx, "shutdown.trigger").take().is_some()
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn receiver(&self) -> Receiver<()> {
        self.rx.clone()
    }

    /// Sleeps up to `duration`; returns `true` if the signal fired meanwhile.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(duration),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
