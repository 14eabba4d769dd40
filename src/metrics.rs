//! Counters for the ingestion and consolidation pipeline.
//!
//! The pipeline only talks to `MetricsRecorder`; exporting the numbers is the
//! job of whoever holds the concrete recorder (see `monitoring`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::timestamp::{utc_from_ns, utc_ns_now};

pub trait MetricsRecorder: Send + Sync {
    fn submission_accepted(&self, _camera_id: &str) {}
    fn submission_dropped(&self, _camera_id: &str) {}
    fn submission_rejected(&self, _camera_id: &str) {}
    fn frame_persisted(&self, _camera_id: &str, _elapsed: Duration) {}
    fn frame_failed(&self, _camera_id: &str) {}
    fn consolidation_pass(&self, _forced: bool) {}
    fn video_created(&self, _camera_id: &str, _frames: usize) {}
    fn chunk_failed(&self, _camera_id: &str) {}
    fn scan_failed(&self, _camera_id: &str) {}
    fn frames_disposed(&self, _camera_id: &str, _count: usize) {}
    fn frames_expired(&self, _count: usize) {}
    fn shutdown_timed_out(&self) {}
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    submissions_accepted: AtomicU64,
    submissions_dropped: AtomicU64,
    submissions_rejected: AtomicU64,
    frames_persisted: AtomicU64,
    frame_errors: AtomicU64,
    consolidation_passes: AtomicU64,
    videos_created: AtomicU64,
    frames_consolidated: AtomicU64,
    chunk_failures: AtomicU64,
    scan_errors: AtomicU64,
    frames_disposed: AtomicU64,
    frames_expired: AtomicU64,
    shutdown_timeouts: AtomicU64,
    processing_ns_sum: AtomicU64,
    last_frame_ns: AtomicU64,
    last_video_ns: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub submissions_accepted: u64,
    pub submissions_dropped: u64,
    pub submissions_rejected: u64,
    pub frames_persisted: u64,
    pub frame_errors: u64,
    pub consolidation_passes: u64,
    pub videos_created: u64,
    pub frames_consolidated: u64,
    pub chunk_failures: u64,
    pub scan_errors: u64,
    pub frames_disposed: u64,
    pub frames_expired: u64,
    pub shutdown_timeouts: u64,
    pub average_processing_ms: f64,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_video_at: Option<DateTime<Utc>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let persisted = self.frames_persisted.load(Ordering::Relaxed);
        let processing_ns = self.processing_ns_sum.load(Ordering::Relaxed);
        let average_processing_ms = if persisted > 0 {
            processing_ns as f64 / persisted as f64 / 1_000_000.0
        } else {
            0.0
        };

        MetricsSnapshot {
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_dropped: self.submissions_dropped.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
            frames_persisted: persisted,
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            consolidation_passes: self.consolidation_passes.load(Ordering::Relaxed),
            videos_created: self.videos_created.load(Ordering::Relaxed),
            frames_consolidated: self.frames_consolidated.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
            frames_disposed: self.frames_disposed.load(Ordering::Relaxed),
            frames_expired: self.frames_expired.load(Ordering::Relaxed),
            shutdown_timeouts: self.shutdown_timeouts.load(Ordering::Relaxed),
            average_processing_ms,
            last_frame_at: utc_from_ns(self.last_frame_ns.load(Ordering::Relaxed)),
            last_video_at: utc_from_ns(self.last_video_ns.load(Ordering::Relaxed)),
        }
    }
}

impl MetricsRecorder for PipelineMetrics {
    fn submission_accepted(&self, _camera_id: &str) {
        self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn submission_dropped(&self, _camera_id: &str) {
        self.submissions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn submission_rejected(&self, _camera_id: &str) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn frame_persisted(&self, _camera_id: &str, elapsed: Duration) {
        self.frames_persisted.fetch_add(1, Ordering::Relaxed);
        self.processing_ns_sum
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.last_frame_ns.store(utc_ns_now(), Ordering::Relaxed);
    }

    fn frame_failed(&self, _camera_id: &str) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn consolidation_pass(&self, _forced: bool) {
        self.consolidation_passes.fetch_add(1, Ordering::Relaxed);
    }

    fn video_created(&self, _camera_id: &str, frames: usize) {
        self.videos_created.fetch_add(1, Ordering::Relaxed);
        self.frames_consolidated
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.last_video_ns.store(utc_ns_now(), Ordering::Relaxed);
    }

    fn chunk_failed(&self, _camera_id: &str) {
        self.chunk_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn scan_failed(&self, _camera_id: &str) {
        self.scan_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn frames_disposed(&self, _camera_id: &str, count: usize) {
        self.frames_disposed.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn frames_expired(&self, count: usize) {
        self.frames_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn shutdown_timed_out(&self) {
        self.shutdown_timeouts.fetch_add(1, Ordering::Relaxed);
    }
}
