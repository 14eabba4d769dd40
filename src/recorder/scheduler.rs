// src/recorder/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, never, select, tick};

use super::consolidate::ConsolidationEngine;

/// Request side of the consolidation signal.
///
/// The channel holds a single token: requests made while one is already
/// pending collapse into it, so a burst of triggers costs one pass.
#[derive(Debug, Clone)]
pub struct ConsolidationTrigger {
    tx: Sender<()>,
}

impl ConsolidationTrigger {
    pub fn channel() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Returns `false` when a request was already pending (or nobody listens).
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }
}

fn cancelled(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

/// Consolidation thread body: one pass per coalesced request or timer tick,
/// until `shutdown` disconnects. The final forced pass is the caller's job.
pub fn run_consolidation_loop(
    engine: Arc<ConsolidationEngine>,
    requests: Receiver<()>,
    interval: Duration,
    shutdown: Receiver<()>,
) {
    let ticker = tick(interval);
    let mut requests = requests;

    log::info!(
        "[scheduler] consolidation loop started (interval {:?})",
        interval
    );

    loop {
        let reason = select! {
            recv(shutdown) -> _ => break,
            recv(requests) -> msg => match msg {
                Ok(()) => "count",
                Err(_) => {
                    requests = never();
                    continue;
                }
            },
            recv(ticker) -> _ => "timer",
        };

        // both may be ready at once; cancellation wins
        if cancelled(&shutdown) {
            break;
        }

        log::debug!("[scheduler] pass requested by {}", reason);
        let report = engine.run_pass(false);
        if report.videos_created() > 0 || report.failed_chunks > 0 {
            log::info!("[scheduler] {}", report.summary());
        }
    }

    log::info!("[scheduler] consolidation loop stopped");
}
