// src/recorder/retention_fs.rs
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, select, tick};

use super::RetentionPolicy;
use crate::metrics::MetricsRecorder;
use crate::store::{FrameName, FrameStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Deletes frame files whose modification time is older than the window.
///
/// Only names that parse as frames inside camera directories are touched;
/// the videos directory is never entered.
pub struct FsRetention {
    store: FrameStore,
    window: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl FsRetention {
    pub fn new(store: FrameStore, window: Duration, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            store,
            window,
            metrics,
        }
    }

    fn sweep_camera(&self, camera_id: &str, cutoff: SystemTime, report: &mut SweepReport) {
        let dir = self.store.camera_dir(camera_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                report.errors += 1;
                log::warn!("[retention] cannot read {}: {}", dir.display(), err);
                return;
            }
        };

        for entry in entries {
            let Some(entry) = counted_entry(entry, &dir, report) else {
                continue;
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if FrameName::parse(name).is_none() {
                continue;
            }
            report.scanned += 1;

            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    report.errors += 1;
                    log::warn!("[retention] no mtime for {}: {}", path.display(), err);
                    continue;
                }
            };

            if modified >= cutoff {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    report.removed += 1;
                    log::debug!("[retention] removed {}", path.display());
                }
                Err(err) => {
                    report.errors += 1;
                    log::warn!("[retention] failed {}: {}", path.display(), err);
                }
            }
        }
    }
}

/// Unwraps one directory entry; an unreadable entry counts as a sweep error.
fn counted_entry<T>(entry: io::Result<T>, dir: &Path, report: &mut SweepReport) -> Option<T> {
    match entry {
        Ok(entry) => Some(entry),
        Err(err) => {
            report.errors += 1;
            log::warn!("[retention] cannot read entry in {}: {}", dir.display(), err);
            None
        }
    }
}

impl RetentionPolicy for FsRetention {
    fn sweep(&mut self, now: SystemTime) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub(self.window) else {
            return Ok(report);
        };

        for camera_id in self.store.camera_ids()? {
            self.sweep_camera(&camera_id, cutoff, &mut report);
        }

        if report.removed > 0 {
            self.metrics.frames_expired(report.removed);
        }
        Ok(report)
    }
}

/// Retention thread body: one sweep per `interval` until `shutdown`
/// disconnects. A failed sweep is logged and retried on the next tick.
pub fn run_retention_loop(
    mut policy: Box<dyn RetentionPolicy>,
    interval: Duration,
    shutdown: Receiver<()>,
) {
    let ticker = tick(interval);
    log::info!("[retention] sweeper started (interval {:?})", interval);

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => match policy.sweep(SystemTime::now()) {
                Ok(report) if report.removed > 0 || report.errors > 0 => {
                    log::info!(
                        "[retention] removed {} of {} frames ({} errors)",
                        report.removed,
                        report.scanned,
                        report.errors
                    );
                }
                Ok(_) => {}
                Err(err) => log::error!("[retention] sweep failed: {:#}", err),
            },
        }
    }

    log::info!("[retention] sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PipelineMetrics;
    use std::fs::File;
    use std::path::Path;

    fn write_aged(path: &Path, age: Duration) {
        fs::write(path, b"jpeg").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn removes_only_expired_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FrameStore::open(tmp.path()).unwrap();
        let cam = store.ensure_camera_dir("cam-1").unwrap();
        let videos = store.ensure_videos_dir().unwrap();

        let old = cam.join("frame_0000000001_20240101_000000.000.jpg");
        let fresh = cam.join("frame_0000000002_20240101_000001.000.jpg");
        let stray = cam.join("notes.txt");
        let video = videos.join("cam-1_20240101_000000.000.mp4");
        write_aged(&old, Duration::from_secs(7200));
        write_aged(&fresh, Duration::from_secs(10));
        write_aged(&stray, Duration::from_secs(7200));
        write_aged(&video, Duration::from_secs(7200));

        let metrics = Arc::new(PipelineMetrics::new());
        let mut retention = FsRetention::new(store, Duration::from_secs(3600), metrics.clone());
        let report = retention.sweep(SystemTime::now()).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.scanned, 2);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(stray.exists());
        assert!(video.exists());
        assert_eq!(metrics.snapshot().frames_expired, 1);
    }

    #[test]
    fn unreadable_entries_are_counted_as_errors() {
        let mut report = SweepReport::default();
        let dir = Path::new("/frames/cam-1");

        assert_eq!(counted_entry(Ok(7), dir, &mut report), Some(7));
        let failed: io::Result<u8> = Err(io::Error::other("stale handle"));
        assert_eq!(counted_entry(failed, dir, &mut report), None);

        assert_eq!(report.errors, 1);
        assert_eq!(report.removed, 0);
    }

    #[test]
    fn window_larger_than_clock_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FrameStore::open(tmp.path()).unwrap();
        let mut retention = FsRetention::new(
            store,
            Duration::from_secs(3600),
            Arc::new(crate::metrics::NoopMetrics),
        );
        let report = retention.sweep(SystemTime::UNIX_EPOCH).unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
