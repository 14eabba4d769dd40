use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use super::FrameSubmission;
use crate::core::error::SubmitError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bounded hand-off between transport callers and the persistence worker.
///
/// `push` never blocks: a full queue is reported straight back to the caller.
/// Capacity is enforced by the channel itself, no outer lock.
pub struct IngestQueue {
    tx: Sender<FrameSubmission>,
    rx: Receiver<FrameSubmission>,
    capacity: usize,
    closed: AtomicBool,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: FrameSubmission) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubmitError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
        }
    }

    /// Consumer side handle for the worker's `select!`.
    pub fn receiver(&self) -> Receiver<FrameSubmission> {
        self.rx.clone()
    }

    pub fn try_pop(&self) -> Option<FrameSubmission> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stops accepting submissions. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Discards whatever is still buffered and returns how many were dropped.
    pub fn release(&self) -> usize {
        self.close();
        let mut dropped = 0;
        while self.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
