//! Lifecycle of the ingestion pipeline.
//!
//! Three threads run while the pipeline is started: the persistence worker
//! (sole consumer of the ingest queue), the consolidation scheduler and the
//! retention sweeper. `stop` closes the queue, cancels the workers, waits
//! for them up to `shutdown_timeout`, then runs one forced consolidation
//! pass on the calling thread.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use serde::Serialize;

use crate::core::error::SubmitError;
use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::shutdown::ShutdownSignal;
use crate::ingest::{FrameSubmission, FrameValidator, IngestQueue, check_submission};
use crate::metrics::MetricsRecorder;
use crate::recorder::{
    ConsolidationEngine, ConsolidationPolicy, ConsolidationTrigger, FsRetention, PassReport,
    PersistWorker, PipelineConfig, VideoEncoder, run_consolidation_loop, run_retention_loop,
};
use crate::store::{CameraRegistry, CameraState, FrameStore};

const JOIN_POLL: Duration = Duration::from_millis(10);
const DROP_WARN_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Running,
    Stopped,
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

enum State {
    Idle,
    Running(Vec<Worker>),
    Stopped,
}

/// A camera directory with its frame count, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraDirectory {
    pub camera_id: String,
    pub path: PathBuf,
    pub frames_on_disk: usize,
    pub state: Option<CameraState>,
}

pub struct Pipeline {
    name: String,
    config: PipelineConfig,
    store: FrameStore,
    queue: Arc<IngestQueue>,
    registry: Arc<CameraRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
    engine: Arc<ConsolidationEngine>,
    persister: PersistWorker,
    trigger_rx: Receiver<()>,
    shutdown: ShutdownSignal,
    state: Mutex<State>,
    dropped: AtomicU64,
}

impl ComponentLogger for Pipeline {
    fn log_context(&self) -> LogContext {
        LogContext::new("pipeline", &self.name)
    }
}

impl Pipeline {
    pub fn new(
        name: &str,
        config: PipelineConfig,
        encoder: Arc<dyn VideoEncoder>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid pipeline configuration")?;

        let store = FrameStore::open(&config.output_dir)
            .with_context(|| format!("cannot open output dir {}", config.output_dir.display()))?;
        let registry = Arc::new(CameraRegistry::new());
        let queue = Arc::new(IngestQueue::new(config.queue_capacity));
        let (trigger, trigger_rx) = ConsolidationTrigger::channel();

        let engine = Arc::new(ConsolidationEngine::new(
            name,
            store.clone(),
            registry.clone(),
            encoder,
            metrics.clone(),
            ConsolidationPolicy::from_config(&config),
        ));

        let persister = PersistWorker::new(
            name,
            store.clone(),
            registry.clone(),
            FrameValidator::new(config.reencode_quality),
            metrics.clone(),
            trigger,
            config.consolidation_threshold,
        );

        Ok(Self {
            name: name.to_string(),
            config,
            store,
            queue,
            registry,
            metrics,
            engine,
            persister,
            trigger_rx,
            shutdown: ShutdownSignal::new(),
            state: Mutex::new(State::Idle),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn state(&self) -> LifecycleState {
        match *lock_mutex(&self.state, "pipeline.state") {
            State::Idle => LifecycleState::Idle,
            State::Running(_) => LifecycleState::Running,
            State::Stopped => LifecycleState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Starts the workers. Calling it on a running pipeline does nothing; a
    /// stopped pipeline cannot be restarted.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut state = lock_mutex(&self.state, "pipeline.start");
        match *state {
            State::Running(_) => return Ok(()),
            State::Stopped => anyhow::bail!("pipeline '{}' was stopped and cannot restart", self.name),
            State::Idle => {}
        }

        let recovered = self.recover_cameras();
        if recovered > 0 {
            self.info(&format!("recovered {} camera directories from disk", recovered));
        }

        let mut workers = Vec::with_capacity(3);
        let spawned = self.spawn_workers(&mut workers);
        if let Err(e) = spawned {
            // whatever did start must not outlive a failed start
            self.shutdown.trigger();
            self.queue.close();
            for worker in workers {
                let _ = worker.handle.join();
            }
            *state = State::Stopped;
            return Err(e);
        }

        *state = State::Running(workers);
        self.info(&format!(
            "started: output={} queue={} batch={} interval={:?}",
            self.store.root().display(),
            self.queue.capacity(),
            self.config.max_frames_per_batch,
            self.config.consolidation_interval
        ));
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Vec<Worker>) -> anyhow::Result<()> {
        let persister = self.persister.clone();
        let queue_rx = self.queue.receiver();
        let shutdown = self.shutdown.receiver();
        workers.push(self.spawn("persist", move || persister.run(queue_rx, shutdown))?);

        let engine = self.engine.clone();
        let requests = self.trigger_rx.clone();
        let interval = self.config.consolidation_interval;
        let shutdown = self.shutdown.receiver();
        workers.push(self.spawn("consolidate", move || {
            run_consolidation_loop(engine, requests, interval, shutdown)
        })?);

        let retention = Box::new(FsRetention::new(
            self.store.clone(),
            self.config.retention_window,
            self.metrics.clone(),
        ));
        let interval = self.config.retention_interval;
        let shutdown = self.shutdown.receiver();
        workers.push(self.spawn("retention", move || {
            run_retention_loop(retention, interval, shutdown)
        })?);

        Ok(())
    }

    fn spawn<F>(&self, role: &'static str, body: F) -> anyhow::Result<Worker>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.name, role))
            .spawn(body)
            .with_context(|| format!("failed to spawn {} thread", role))?;
        Ok(Worker { name: role, handle })
    }

    /// Camera directories left from an earlier run take part in
    /// consolidation right away.
    fn recover_cameras(&self) -> usize {
        match self.store.camera_ids() {
            Ok(ids) => ids
                .iter()
                .filter(|id| self.registry.mark_active(id))
                .count(),
            Err(e) => {
                self.warn(&format!("cannot scan {}: {}", self.store.root().display(), e));
                0
            }
        }
    }

    pub fn submit(
        &self,
        camera_id: &str,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Result<(), SubmitError> {
        self.submit_frame(FrameSubmission::new(camera_id, payload, timestamp, sequence))
    }

    /// Non-blocking hand-off into the ingest queue.
    pub fn submit_frame(&self, frame: FrameSubmission) -> Result<(), SubmitError> {
        if let Err(e) = check_submission(&frame.camera_id, &frame.payload) {
            self.metrics.submission_rejected(&frame.camera_id);
            return Err(e);
        }

        let camera_id = frame.camera_id.clone();
        match self.queue.push(frame) {
            Ok(()) => {
                self.registry.mark_active(&camera_id);
                self.metrics.submission_accepted(&camera_id);
                Ok(())
            }
            Err(e @ SubmitError::QueueFull { .. }) => {
                self.metrics.submission_dropped(&camera_id);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_WARN_EVERY == 1 {
                    self.warn(&format!(
                        "ingest queue full, dropping frames ({} dropped so far, last from {})",
                        dropped, camera_id
                    ));
                }
                Err(e)
            }
            Err(e) => {
                self.metrics.submission_rejected(&camera_id);
                Err(e)
            }
        }
    }

    /// Asks the scheduler for a pass; returns `false` if one is already pending.
    pub fn request_consolidation(&self) -> bool {
        self.persister.request_consolidation()
    }

    /// Runs a pass on the calling thread, serialized with scheduled passes.
    pub fn run_consolidation_now(&self, forced: bool) -> PassReport {
        self.engine.run_pass(forced)
    }

    /// Camera directories under the output root with their pending frame count.
    pub fn frame_directories(&self) -> anyhow::Result<Vec<CameraDirectory>> {
        let ids = self
            .store
            .camera_ids()
            .with_context(|| format!("cannot list {}", self.store.root().display()))?;

        let mut dirs = Vec::with_capacity(ids.len());
        for camera_id in ids {
            let frames_on_disk = self
                .store
                .list_frames(&camera_id)
                .with_context(|| format!("cannot list frames of {}", camera_id))?
                .len();
            dirs.push(CameraDirectory {
                path: self.store.camera_dir(&camera_id),
                state: self.registry.get(&camera_id),
                camera_id,
                frames_on_disk,
            });
        }
        Ok(dirs)
    }

    /// Stops the pipeline. Safe to call any number of times from any thread;
    /// only the first call does the work.
    pub fn stop(&self) -> PassReport {
        let workers = {
            let mut state = lock_mutex(&self.state, "pipeline.stop");
            match mem::replace(&mut *state, State::Stopped) {
                State::Running(workers) => workers,
                State::Idle => Vec::new(),
                State::Stopped => return PassReport::default(),
            }
        };

        self.info("stopping");
        self.queue.close();
        self.shutdown.trigger();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut persist_done = true;
        for worker in workers {
            if !self.join_until(worker, deadline) {
                persist_done = false;
            }
        }

        // nothing consumed the queue if the pipeline never started
        if persist_done {
            let mut late = 0;
            while let Some(frame) = self.queue.try_pop() {
                self.persister.handle(frame);
                late += 1;
            }
            if late > 0 {
                self.info(&format!("persisted {} frames left in the queue", late));
            }
        }

        let report = self.engine.run_pass(true);
        self.info(&format!("final {}", report.summary()));

        let lost = self.queue.release();
        if lost > 0 {
            self.warn(&format!("{} queued frames discarded at shutdown", lost));
        }

        self.info("stopped");
        report
    }

    /// Joins `worker` unless it is still busy at `deadline`. Returns `false`
    /// only when a persistence worker is left running.
    fn join_until(&self, worker: Worker, deadline: Instant) -> bool {
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        if !worker.handle.is_finished() {
            self.metrics.shutdown_timed_out();
            self.warn(&format!(
                "{} worker did not finish within {:?}, leaving it detached",
                worker.name, self.config.shutdown_timeout
            ));
            return worker.name != "persist";
        }

        if worker.handle.join().is_err() {
            self.error(&format!("{} worker panicked", worker.name));
        }
        true
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_running() {
            self.warn("dropped while running, stopping");
            self.stop();
        }
    }
}
