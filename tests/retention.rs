use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;

use cctv_archiver::recorder::PipelineConfig;
use cctv_archiver::store::FrameName;
use cctv_archiver::testing::{MockEncoder, jpeg_fixture};
use cctv_archiver::{Pipeline, PipelineMetrics};

fn write_aged(path: &Path, bytes: &[u8], age: Duration) {
    fs::write(path, bytes).expect("write");
    File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now() - age))
        .expect("set mtime");
}

#[test]
fn sweeper_expires_old_frames_and_spares_videos() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let cam = tmp.path().join("cam-1");
    let videos = tmp.path().join("videos");
    fs::create_dir_all(&cam)?;
    fs::create_dir_all(&videos)?;

    let jpeg = jpeg_fixture(8, 8, 5);
    let old = cam.join(FrameName::new(1, &Utc::now()).file_name());
    let fresh = cam.join(FrameName::new(2, &Utc::now()).file_name());
    let video = videos.join("cam-1_20240101_000000.000.mp4");
    write_aged(&old, &jpeg, Duration::from_secs(2 * 3600));
    write_aged(&fresh, &jpeg, Duration::ZERO);
    write_aged(&video, b"video", Duration::from_secs(48 * 3600));

    let cfg = PipelineConfig {
        consolidation_threshold: 0,
        consolidation_interval: Duration::from_secs(3600),
        retention_window: Duration::from_secs(3600),
        retention_interval: Duration::from_millis(50),
        ..PipelineConfig::default().with_output_dir(tmp.path())
    };
    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Pipeline::new("retention", cfg, Arc::new(MockEncoder::new()), metrics.clone())?;
    pipeline.start()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while old.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(!old.exists(), "expired frame should be swept");
    assert!(fresh.exists());
    assert!(video.exists(), "videos are never swept");
    assert_eq!(metrics.snapshot().frames_expired, 1);

    pipeline.stop();
    assert!(video.exists());
    Ok(())
}
