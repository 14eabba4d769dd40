// src/recorder/persist.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver, select};

use super::scheduler::ConsolidationTrigger;
use crate::core::error::{FrameError, FrameResult};
use crate::core::logging::{ComponentLogger, LogContext};
use crate::ingest::{FrameSubmission, FrameValidator, check_submission};
use crate::metrics::MetricsRecorder;
use crate::store::{CameraRegistry, FrameName, FrameStore};

/// Single consumer of the ingest queue: validates, writes and counts frames.
#[derive(Clone)]
pub struct PersistWorker {
    instance: String,
    store: FrameStore,
    registry: Arc<CameraRegistry>,
    validator: FrameValidator,
    metrics: Arc<dyn MetricsRecorder>,
    trigger: ConsolidationTrigger,
    threshold: u64,
}

impl ComponentLogger for PersistWorker {
    fn log_context(&self) -> LogContext {
        LogContext::new("persist", &self.instance)
    }
}

impl PersistWorker {
    pub fn new(
        instance: &str,
        store: FrameStore,
        registry: Arc<CameraRegistry>,
        validator: FrameValidator,
        metrics: Arc<dyn MetricsRecorder>,
        trigger: ConsolidationTrigger,
        threshold: u64,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            store,
            registry,
            validator,
            metrics,
            trigger,
            threshold,
        }
    }

    pub fn request_consolidation(&self) -> bool {
        self.trigger.request()
    }

    /// Writes one frame and returns its final path.
    ///
    /// The file is written under a dot-prefixed temporary name and renamed,
    /// so a concurrent directory scan never sees a partial frame.
    pub fn persist(&self, frame: &FrameSubmission) -> FrameResult<PathBuf> {
        check_submission(&frame.camera_id, &frame.payload)?;
        let prepared = self.validator.prepare(&frame.payload)?;

        let dir = self
            .store
            .ensure_camera_dir(&frame.camera_id)
            .map_err(|e| FrameError::io("create", self.store.camera_dir(&frame.camera_id), e))?;

        let file_name = FrameName::new(frame.sequence, &frame.timestamp).file_name();
        let path = dir.join(&file_name);
        let tmp = dir.join(format!(".{}.tmp", file_name));

        fs::write(&tmp, &prepared.bytes).map_err(|e| FrameError::io("write", &tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(FrameError::io("rename", &path, e));
        }

        Ok(path)
    }

    /// Persists one frame and keeps counters and the count trigger up to date.
    /// Failures are logged and counted; they never stop the worker.
    pub fn handle(&self, frame: FrameSubmission) {
        let started = Instant::now();

        match self.persist(&frame) {
            Ok(path) => {
                let count = self
                    .registry
                    .record_persisted(&frame.camera_id, frame.timestamp);
                self.metrics
                    .frame_persisted(&frame.camera_id, started.elapsed());
                log::trace!("[persist] {} -> {}", frame.camera_id, path.display());

                if self.threshold > 0 && count % self.threshold == 0 {
                    if self.trigger.request() {
                        self.info(&format!(
                            "{} reached {} frames, consolidation requested",
                            frame.camera_id, count
                        ));
                    } else {
                        log::trace!("[persist] consolidation already pending");
                    }
                }
            }
            Err(e) => {
                self.metrics.frame_failed(&frame.camera_id);
                let ctx = self.log_context().with_camera(&frame.camera_id);
                log::warn!(
                    "{}",
                    ctx.format("WARN", &format!("frame seq={} dropped: {}", frame.sequence, e))
                );
            }
        }
    }

    /// Worker thread body. On cancellation everything already queued is
    /// still written before returning.
    pub fn run(self, queue: Receiver<FrameSubmission>, shutdown: Receiver<()>) {
        self.info("persistence worker started");
        let mut handled: u64 = 0;

        loop {
            select! {
                recv(queue) -> msg => match msg {
                    Ok(frame) => {
                        self.handle(frame);
                        handled += 1;
                    }
                    Err(_) => break,
                },
                recv(shutdown) -> _ => {
                    let mut drained = 0;
                    while let Ok(frame) = queue.try_recv() {
                        self.handle(frame);
                        drained += 1;
                    }
                    handled += drained;
                    if drained > 0 {
                        self.info(&format!("drained {} queued frames", drained));
                    }
                    break;
                }
            }
        }

        self.info(&format!("persistence worker stopped after {} frames", handled));
    }
}
