//! Synthetic cameras for exercising the pipeline without real hardware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;

use crate::core::error::SubmitError;
use crate::core::shutdown::ShutdownSignal;
use crate::ingest::FrameSubmission;
use crate::ingest::validate::encode_jpeg;

const PATTERN_FRAMES: u64 = 150;
const STATS_INTERVAL: Duration = Duration::from_secs(5);
const SIM_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Gradient,
    Wave,
    Checkerboard,
    MovingCircle,
    Noise,
}

impl Pattern {
    const ALL: [Pattern; 5] = [
        Pattern::Gradient,
        Pattern::Wave,
        Pattern::Checkerboard,
        Pattern::MovingCircle,
        Pattern::Noise,
    ];

    /// Patterns rotate every `PATTERN_FRAMES` frames.
    pub fn for_frame(frame: u64) -> Self {
        Self::ALL[((frame / PATTERN_FRAMES) % Self::ALL.len() as u64) as usize]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub rejected: u64,
}

pub struct CameraSimulator {
    camera_id: String,
    width: u32,
    height: u32,
    fps: u32,
    base64: bool,
    frame_count: u64,
}

impl CameraSimulator {
    pub fn new(camera_id: &str, width: u32, height: u32, fps: u32, base64: bool) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
            base64,
            frame_count: 0,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn render(&self, frame: u64) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let mut rng = rand::thread_rng();
        // noise floor so consecutive frames never encode identically
        let mut px = |v: u8| v.saturating_add(rng.gen_range(0..4));

        match Pattern::for_frame(frame) {
            Pattern::Gradient => RgbImage::from_fn(w, h, |x, _| {
                let g = px((x * 255 / w) as u8);
                Rgb([g, g, g])
            }),
            Pattern::Wave => {
                let offset = frame as f64 * 0.1;
                let mid = f64::from(h) / 2.0;
                RgbImage::from_fn(w, h, |x, y| {
                    let pos = mid + (f64::from(x) * 0.05 + offset).sin() * 50.0;
                    if (f64::from(y) - pos).abs() < 2.0 {
                        Rgb([255, 255, 255])
                    } else {
                        Rgb([0, 0, px(0)])
                    }
                })
            }
            Pattern::Checkerboard => RgbImage::from_fn(w, h, |x, y| {
                if ((x / 40) + (y / 40)) % 2 == 0 {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([px(0), 0, 0])
                }
            }),
            Pattern::MovingCircle => {
                let t = frame as f64 * 0.05;
                let cx = f64::from(w) / 2.0 + t.cos() * 100.0;
                let cy = f64::from(h) / 2.0 + t.sin() * 100.0;
                RgbImage::from_fn(w, h, |x, y| {
                    let (dx, dy) = (f64::from(x) - cx, f64::from(y) - cy);
                    if (dx * dx + dy * dy).sqrt() < 50.0 {
                        Rgb([255, 255, 255])
                    } else {
                        Rgb([0, px(0), 0])
                    }
                })
            }
            Pattern::Noise => RgbImage::from_fn(w, h, |_, _| {
                let v = px(0).wrapping_mul(60);
                Rgb([v, v, v])
            }),
        }
    }

    /// Next frame as submitted payload (raw JPEG or base64 text).
    pub fn next_payload(&mut self) -> anyhow::Result<Vec<u8>> {
        let img = DynamicImage::ImageRgb8(self.render(self.frame_count));
        self.frame_count += 1;
        let jpeg = encode_jpeg(&img, SIM_QUALITY)?;
        Ok(if self.base64 {
            STANDARD.encode(jpeg).into_bytes()
        } else {
            jpeg
        })
    }

    pub fn next_submission(&mut self) -> anyhow::Result<FrameSubmission> {
        let sequence = self.frame_count;
        let payload = self.next_payload()?;
        Ok(FrameSubmission::new(
            self.camera_id.as_str(),
            payload,
            Utc::now(),
            sequence,
        ))
    }

    /// Generates frames at the configured rate into `submit` until `shutdown`
    /// fires. Rejections are counted, never retried.
    pub fn run<F>(mut self, submit: F, shutdown: Arc<ShutdownSignal>) -> SimulatorStats
    where
        F: Fn(FrameSubmission) -> Result<(), SubmitError>,
    {
        let interval = Duration::from_secs(1) / self.fps;
        let mut stats = SimulatorStats::default();
        let mut last_report = Instant::now();
        log::info!(
            "[simulator] {} started ({}x{} @ {} fps)",
            self.camera_id,
            self.width,
            self.height,
            self.fps
        );

        loop {
            let started = Instant::now();
            match self.next_submission() {
                Ok(frame) => match submit(frame) {
                    Ok(()) => stats.sent += 1,
                    Err(SubmitError::QueueFull { .. }) => stats.dropped += 1,
                    Err(SubmitError::Closed) => break,
                    Err(e) => {
                        stats.rejected += 1;
                        log::warn!("[simulator] {} frame rejected: {}", self.camera_id, e);
                    }
                },
                Err(e) => log::error!("[simulator] {} cannot render frame: {:#}", self.camera_id, e),
            }

            if last_report.elapsed() >= STATS_INTERVAL {
                log::info!(
                    "[simulator] {} sent={} dropped={} pattern={:?}",
                    self.camera_id,
                    stats.sent,
                    stats.dropped,
                    Pattern::for_frame(self.frame_count)
                );
                last_report = Instant::now();
            }

            if shutdown.wait_timeout(interval.saturating_sub(started.elapsed())) {
                break;
            }
        }

        log::info!(
            "[simulator] {} stopped: sent={} dropped={} rejected={}",
            self.camera_id,
            stats.sent,
            stats.dropped,
            stats.rejected
        );
        stats
    }
}
