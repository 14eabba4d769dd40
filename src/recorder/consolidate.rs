//! Consolidation: frames on disk become videos.
//!
//! A pass walks every active camera, sorts its frames by parsed sequence,
//! cuts them into chunks of at most `max_frames_per_batch` and hands each
//! chunk to the encoder through a playlist file. A failing chunk only fails
//! itself; its frames stay on disk for the next pass. What happens to the
//! frames of a successful chunk depends on the configured `FrameDisposition`.

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::config::{FrameDisposition, PipelineConfig};
use super::encoder::VideoEncoder;
use super::playlist::render_playlist;
use crate::core::error::{ChunkError, EncoderError};
use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::metrics::MetricsRecorder;
use crate::store::{CameraRegistry, FrameStore, StoredFrame, VideoName};

const PLAYLIST_EXTENSION: &str = "ffconcat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationPolicy {
    pub max_frames_per_batch: usize,
    pub min_batch_frames: usize,
    pub frame_rate: u32,
    pub disposition: FrameDisposition,
    pub lenient_encoder_success: bool,
}

impl ConsolidationPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_frames_per_batch: cfg.max_frames_per_batch,
            min_batch_frames: cfg.min_batch_frames,
            frame_rate: cfg.frame_rate,
            disposition: cfg.disposition(),
            lenient_encoder_success: cfg.lenient_encoder_success,
        }
    }
}

/// Splits `total` frames into consecutive chunks of at most `max_per_chunk`
/// (0 = no limit). A trailing chunk shorter than `min_chunk` is left out.
pub fn plan_chunks(total: usize, max_per_chunk: usize, min_chunk: usize) -> Vec<Range<usize>> {
    let size = if max_per_chunk == 0 { total } else { max_per_chunk };
    let min_chunk = min_chunk.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + size).min(total);
        if end - start < min_chunk {
            break;
        }
        chunks.push(start..end);
        start = end;
    }
    chunks
}

#[derive(Debug, Clone, Default)]
pub struct CameraReport {
    pub camera_id: String,
    pub frames_found: usize,
    pub videos: Vec<PathBuf>,
    pub failed_chunks: usize,
    pub frames_disposed: usize,
    pub frames_renumbered: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub forced: bool,
    pub cameras: Vec<CameraReport>,
    pub failed_chunks: usize,
    pub scan_errors: usize,
    pub elapsed_ms: u128,
}

impl PassReport {
    pub fn videos_created(&self) -> usize {
        self.cameras.iter().map(|c| c.videos.len()).sum()
    }

    pub fn videos(&self) -> impl Iterator<Item = &Path> {
        self.cameras
            .iter()
            .flat_map(|c| c.videos.iter().map(PathBuf::as_path))
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraReport> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }

    pub fn summary(&self) -> String {
        format!(
            "pass{}: {} cameras, {} videos, {} failed chunks, {} scan errors in {}ms",
            if self.forced { " (forced)" } else { "" },
            self.cameras.len(),
            self.videos_created(),
            self.failed_chunks,
            self.scan_errors,
            self.elapsed_ms
        )
    }
}

pub struct ConsolidationEngine {
    instance: String,
    store: FrameStore,
    registry: Arc<CameraRegistry>,
    encoder: Arc<dyn VideoEncoder>,
    metrics: Arc<dyn MetricsRecorder>,
    policy: ConsolidationPolicy,
    // passes never overlap, whoever starts them
    pass_lock: Mutex<()>,
}

impl ComponentLogger for ConsolidationEngine {
    fn log_context(&self) -> LogContext {
        LogContext::new("consolidate", &self.instance)
    }
}

impl ConsolidationEngine {
    pub fn new(
        instance: &str,
        store: FrameStore,
        registry: Arc<CameraRegistry>,
        encoder: Arc<dyn VideoEncoder>,
        metrics: Arc<dyn MetricsRecorder>,
        policy: ConsolidationPolicy,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            store,
            registry,
            encoder,
            metrics,
            policy,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ConsolidationPolicy {
        &self.policy
    }

    /// One pass over every active camera. A forced pass ignores
    /// `min_batch_frames` so nothing is left behind at shutdown.
    pub fn run_pass(&self, forced: bool) -> PassReport {
        let _pass = lock_mutex(&self.pass_lock, "consolidate.pass");
        let started = Instant::now();
        let consolidated_at = Utc::now();
        self.metrics.consolidation_pass(forced);

        let mut report = PassReport {
            forced,
            ..PassReport::default()
        };

        for camera_id in self.registry.active_cameras() {
            match self.consolidate_camera(&camera_id, &consolidated_at, forced) {
                Ok(camera) => {
                    report.failed_chunks += camera.failed_chunks;
                    report.cameras.push(camera);
                }
                Err(e) => {
                    report.scan_errors += 1;
                    self.metrics.scan_failed(&camera_id);
                    self.camera_log(&camera_id)
                        .error(&format!("cannot list frames: {}", e));
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        self.debug(&report.summary());
        report
    }

    fn camera_log(&self, camera_id: &str) -> CameraLog {
        CameraLog(self.log_context().with_camera(camera_id))
    }

    fn consolidate_camera(
        &self,
        camera_id: &str,
        consolidated_at: &DateTime<Utc>,
        forced: bool,
    ) -> io::Result<CameraReport> {
        let log = self.camera_log(camera_id);
        let mut frames = self.store.list_frames(camera_id)?;

        if let Some(watermark) = self.watermark(camera_id, &log) {
            frames.retain(|f| f.name.sequence > watermark);
        }

        let mut report = CameraReport {
            camera_id: camera_id.to_string(),
            frames_found: frames.len(),
            ..CameraReport::default()
        };

        let min_chunk = if forced {
            1
        } else {
            self.policy.min_batch_frames
        };
        let chunks = plan_chunks(frames.len(), self.policy.max_frames_per_batch, min_chunk);
        if chunks.is_empty() {
            report.skipped = true;
            if !frames.is_empty() {
                log.debug(&format!(
                    "{} frames pending, below minimum of {}",
                    frames.len(),
                    min_chunk
                ));
            }
            return Ok(report);
        }

        let numbered = chunks.len() > 1;
        let consumed_end = chunks.last().map_or(0, |c| c.end);
        let mut contiguous_through: Option<u64> = None;
        let mut all_succeeded = true;

        for (index, range) in chunks.into_iter().enumerate() {
            let chunk = &frames[range];
            let name = VideoName::new(camera_id, consolidated_at, numbered.then_some(index + 1));

            match self.encode_chunk(chunk, &name, &log) {
                Ok(video) => {
                    log.info(&format!(
                        "{} frames (seq {}..={}) -> {}",
                        chunk.len(),
                        chunk[0].name.sequence,
                        chunk[chunk.len() - 1].name.sequence,
                        video.display()
                    ));
                    self.registry.record_video(camera_id);
                    self.metrics.video_created(camera_id, chunk.len());
                    report.videos.push(video);

                    if all_succeeded {
                        contiguous_through = chunk.last().map(|f| f.name.sequence);
                    }
                    if self.policy.disposition == FrameDisposition::Delete {
                        report.frames_disposed += self.delete_frames(chunk, &log);
                    }
                }
                Err(e) => {
                    all_succeeded = false;
                    report.failed_chunks += 1;
                    self.metrics.chunk_failed(camera_id);
                    log.error(&format!(
                        "chunk {} ({} frames) failed, frames kept: {}",
                        name.file_name(),
                        chunk.len(),
                        e
                    ));
                }
            }
        }

        if report.frames_disposed > 0 {
            self.metrics
                .frames_disposed(camera_id, report.frames_disposed);
        }

        match self.policy.disposition {
            FrameDisposition::Delete => {}
            FrameDisposition::Keep => {
                if let Some(through) = contiguous_through {
                    self.advance_watermark(camera_id, through, &log);
                }
            }
            FrameDisposition::Renumber => {
                if let Some(through) = contiguous_through {
                    self.advance_watermark(camera_id, through, &log);
                    if all_succeeded {
                        report.frames_renumbered =
                            self.renumber(&frames[consumed_end..], through, &log);
                    }
                }
            }
        }

        Ok(report)
    }

    /// The camera's consolidated-through sequence. After a restart the
    /// registry is empty, so the value kept in the camera directory seeds it.
    fn watermark(&self, camera_id: &str, log: &CameraLog) -> Option<u64> {
        if let Some(through) = self.registry.consolidated_through(camera_id) {
            return Some(through);
        }
        if self.policy.disposition == FrameDisposition::Delete {
            return None;
        }
        match self.store.load_watermark(camera_id) {
            Ok(Some(through)) => {
                self.registry.advance_consolidated(camera_id, through);
                log.debug(&format!("resuming after seq {}", through));
                Some(through)
            }
            Ok(None) => None,
            Err(e) => {
                log.warn(&format!("ignoring unreadable watermark: {}", e));
                None
            }
        }
    }

    fn advance_watermark(&self, camera_id: &str, through: u64, log: &CameraLog) {
        self.registry.advance_consolidated(camera_id, through);
        let current = self
            .registry
            .consolidated_through(camera_id)
            .unwrap_or(through);
        if let Err(e) = self.store.save_watermark(camera_id, current) {
            log.warn(&format!("cannot save watermark {}: {}", current, e));
        }
    }

    fn encode_chunk(
        &self,
        chunk: &[StoredFrame],
        name: &VideoName,
        log: &CameraLog,
    ) -> Result<PathBuf, ChunkError> {
        let videos_dir = self
            .store
            .ensure_videos_dir()
            .map_err(|e| ChunkError::io("create", self.store.videos_dir(), e))?;
        let output = available_output(&videos_dir, &name.file_name());
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.file_name());
        let playlist = videos_dir.join(format!(".{}.{}", file_name, PLAYLIST_EXTENSION));

        let paths: Vec<&Path> = chunk.iter().map(|f| f.path.as_path()).collect();
        let text = render_playlist(&paths, self.policy.frame_rate)?;
        fs::write(&playlist, text).map_err(|e| ChunkError::io("write playlist", &playlist, e))?;

        let result = self.encoder.encode(&playlist, &output);

        if let Err(e) = fs::remove_file(&playlist) {
            log.debug(&format!("playlist {} not removed: {}", playlist.display(), e));
        }

        let produced = fs::metadata(&output).map(|m| m.len() > 0).unwrap_or(false);
        match result {
            Ok(()) if produced => Ok(output),
            Ok(()) => {
                remove_if_exists(&output);
                Err(ChunkError::EmptyOutput(output))
            }
            Err(EncoderError::Exit { status, stderr })
                if produced && self.policy.lenient_encoder_success =>
            {
                log.warn(&format!(
                    "{} exited with {} but produced {}, accepting: {}",
                    self.encoder.name(),
                    status,
                    output.display(),
                    stderr
                ));
                Ok(output)
            }
            Err(e) => {
                remove_if_exists(&output);
                Err(e.into())
            }
        }
    }

    fn delete_frames(&self, chunk: &[StoredFrame], log: &CameraLog) -> usize {
        let mut removed = 0;
        for frame in chunk {
            match fs::remove_file(&frame.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log.warn(&format!(
                    "cannot remove consolidated frame {}: {}",
                    frame.path.display(),
                    e
                )),
            }
        }
        removed
    }

    /// Renames the unconsumed frames to `through + 1, through + 2, ...`.
    ///
    /// Targets are never above the current sequence, and frames are walked
    /// in ascending order, so a rename never lands on a frame still waiting.
    fn renumber(&self, remaining: &[StoredFrame], through: u64, log: &CameraLog) -> usize {
        let mut renamed = 0;
        for (offset, frame) in remaining.iter().enumerate() {
            let sequence = through + 1 + offset as u64;
            if sequence == frame.name.sequence {
                continue;
            }
            let target = frame.path.with_file_name(frame.name.with_sequence(sequence).file_name());
            if target.exists() {
                log.warn(&format!(
                    "renumber target {} exists, leaving {}",
                    target.display(),
                    frame.path.display()
                ));
                continue;
            }
            match fs::rename(&frame.path, &target) {
                Ok(()) => renamed += 1,
                Err(e) => log.warn(&format!(
                    "cannot renumber {}: {}",
                    frame.path.display(),
                    e
                )),
            }
        }
        if renamed > 0 {
            log.debug(&format!("renumbered {} pending frames from {}", renamed, through + 1));
        }
        renamed
    }
}

/// `dir/file_name`, or `<stem>-N.<ext>` with the lowest free `N` when an
/// earlier video already owns that name. Existing videos are never replaced.
fn available_output(dir: &Path, file_name: &str) -> PathBuf {
    let first = dir.join(file_name);
    if !first.exists() {
        return first;
    }
    let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    (1u32..)
        .map(|n| {
            if ext.is_empty() {
                dir.join(format!("{}-{}", stem, n))
            } else {
                dir.join(format!("{}-{}.{}", stem, n, ext))
            }
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("[consolidate] cannot remove {}: {}", path.display(), e);
        }
    }
}

struct CameraLog(LogContext);

impl ComponentLogger for CameraLog {
    fn log_context(&self) -> LogContext {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_planning() {
        assert_eq!(plan_chunks(0, 30, 1), Vec::<Range<usize>>::new());
        assert_eq!(plan_chunks(60, 30, 1), vec![0..30, 30..60]);
        assert_eq!(plan_chunks(65, 30, 1), vec![0..30, 30..60, 60..65]);
        assert_eq!(plan_chunks(65, 30, 10), vec![0..30, 30..60]);
        assert_eq!(plan_chunks(7, 0, 1), vec![0..7]);
        assert_eq!(plan_chunks(7, 0, 8), Vec::<Range<usize>>::new());
        assert_eq!(plan_chunks(3, 30, 0), vec![0..3]);
    }

    #[test]
    fn existing_video_names_are_not_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let name = "cam-1_20240501_120000.000.mp4";

        assert_eq!(available_output(dir, name), dir.join(name));

        fs::write(dir.join(name), b"earlier").unwrap();
        let second = available_output(dir, name);
        assert_eq!(second, dir.join("cam-1_20240501_120000.000-1.mp4"));

        fs::write(&second, b"also earlier").unwrap();
        assert_eq!(
            available_output(dir, name),
            dir.join("cam-1_20240501_120000.000-2.mp4")
        );
        assert_eq!(fs::read(dir.join(name)).unwrap(), b"earlier");
    }

    #[test]
    fn report_summary_counts_videos() {
        let report = PassReport {
            forced: true,
            cameras: vec![
                CameraReport {
                    camera_id: "a".into(),
                    videos: vec![PathBuf::from("/v/a.mp4"), PathBuf::from("/v/a2.mp4")],
                    ..CameraReport::default()
                },
                CameraReport {
                    camera_id: "b".into(),
                    failed_chunks: 1,
                    ..CameraReport::default()
                },
            ],
            failed_chunks: 1,
            ..PassReport::default()
        };
        assert_eq!(report.videos_created(), 2);
        assert_eq!(report.videos().count(), 2);
        assert!(report.summary().contains("(forced)"));
        assert_eq!(report.camera("b").map(|c| c.failed_chunks), Some(1));
    }
}
