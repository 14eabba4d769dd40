use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use cctv_archiver::metrics::PipelineMetrics;
use cctv_archiver::recorder::{ConsolidationEngine, ConsolidationPolicy, FrameDisposition};
use cctv_archiver::store::{CameraRegistry, FrameName, FrameStore};
use cctv_archiver::testing::{MockBehavior, MockEncoder, jpeg_fixture};

struct Harness {
    _tmp: tempfile::TempDir,
    store: FrameStore,
    registry: Arc<CameraRegistry>,
    encoder: Arc<MockEncoder>,
    metrics: Arc<PipelineMetrics>,
    engine: ConsolidationEngine,
}

fn policy() -> ConsolidationPolicy {
    ConsolidationPolicy {
        max_frames_per_batch: 30,
        min_batch_frames: 1,
        frame_rate: 30,
        disposition: FrameDisposition::Delete,
        lenient_encoder_success: true,
    }
}

fn harness(policy: ConsolidationPolicy) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = FrameStore::open(tmp.path()).expect("open store");
    let registry = Arc::new(CameraRegistry::new());
    let encoder = Arc::new(MockEncoder::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let engine = ConsolidationEngine::new(
        "test",
        store.clone(),
        registry.clone(),
        encoder.clone(),
        metrics.clone(),
        policy,
    );
    Harness {
        _tmp: tmp,
        store,
        registry,
        encoder,
        metrics,
        engine,
    }
}

impl Harness {
    fn write_frames(&self, camera_id: &str, sequences: impl IntoIterator<Item = u64>) {
        let dir = self.store.ensure_camera_dir(camera_id).expect("camera dir");
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let jpeg = jpeg_fixture(8, 8, 3);
        for seq in sequences {
            fs::write(dir.join(FrameName::new(seq, &ts).file_name()), &jpeg).expect("write frame");
        }
        self.registry.mark_active(camera_id);
    }

    /// A second engine over the same directory with an empty registry, the
    /// way the pipeline comes back up after a restart.
    fn restarted(&self, policy: ConsolidationPolicy) -> (Arc<CameraRegistry>, ConsolidationEngine) {
        let registry = Arc::new(CameraRegistry::new());
        for camera_id in self.store.camera_ids().expect("camera ids") {
            registry.mark_active(&camera_id);
        }
        let engine = ConsolidationEngine::new(
            "restarted",
            self.store.clone(),
            registry.clone(),
            self.encoder.clone(),
            self.metrics.clone(),
            policy,
        );
        (registry, engine)
    }

    fn sequences_on_disk(&self, camera_id: &str) -> Vec<u64> {
        self.store
            .list_frames(camera_id)
            .expect("list frames")
            .iter()
            .map(|f| f.name.sequence)
            .collect()
    }

    fn videos_on_disk(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.store.videos_dir())
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn sequences(frames: &[PathBuf]) -> Vec<u64> {
    frames
        .iter()
        .map(|p| {
            let name = p.file_name().unwrap().to_str().unwrap();
            FrameName::parse(name).expect("frame name").sequence
        })
        .collect()
}

#[test]
fn frames_are_encoded_in_numeric_order() {
    let h = harness(policy());
    h.write_frames("cam-1", [100, 9, 11, 10]);

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 1);
    let calls = h.encoder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(sequences(&calls[0].frames), vec![9, 10, 11, 100]);
    assert!(h.sequences_on_disk("cam-1").is_empty());
}

#[test]
fn two_full_batches_make_two_numbered_videos() {
    let h = harness(policy());
    h.write_frames("cam-1", 0..60);

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 2);
    let calls = h.encoder.calls();
    assert_eq!(sequences(&calls[0].frames), (0..30).collect::<Vec<_>>());
    assert_eq!(sequences(&calls[1].frames), (30..60).collect::<Vec<_>>());

    let videos = h.videos_on_disk();
    assert_eq!(videos.len(), 2, "only videos remain in {:?}", videos);
    assert!(videos[0].starts_with("cam-1_") && videos[0].ends_with("_part01.mp4"));
    assert!(videos[1].ends_with("_part02.mp4"));
    assert!(h.sequences_on_disk("cam-1").is_empty());
    assert_eq!(h.metrics.snapshot().frames_disposed, 60);
    assert_eq!(h.registry.get("cam-1").map(|s| s.videos_created), Some(2));
}

#[test]
fn failing_camera_does_not_affect_others() {
    let h = harness(policy());
    h.write_frames("cam-a", 0..5);
    h.write_frames("cam-b", 0..5);
    h.encoder.set_behavior("cam-a", MockBehavior::Fail);

    let report = h.engine.run_pass(false);

    assert_eq!(report.failed_chunks, 1);
    assert_eq!(report.camera("cam-b").map(|c| c.videos.len()), Some(1));
    assert_eq!(h.sequences_on_disk("cam-a"), vec![0, 1, 2, 3, 4]);
    assert!(h.sequences_on_disk("cam-b").is_empty());
    assert!(h.videos_on_disk().iter().all(|v| v.starts_with("cam-b_")));
    assert_eq!(h.metrics.snapshot().chunk_failures, 1);

    // the next pass retries the failed frames
    h.encoder.set_behavior("cam-a", MockBehavior::Succeed);
    let retry = h.engine.run_pass(false);
    assert_eq!(retry.videos_created(), 1);
    assert!(h.sequences_on_disk("cam-a").is_empty());
}

#[test]
fn every_failed_chunk_is_counted() {
    let h = harness(ConsolidationPolicy {
        max_frames_per_batch: 3,
        ..policy()
    });
    h.write_frames("cam-1", 0..6);
    h.encoder.set_behavior("cam-1", MockBehavior::Fail);

    let report = h.engine.run_pass(false);

    assert_eq!(report.failed_chunks, 2);
    assert_eq!(h.encoder.calls_for("cam-1").len(), 2);
    assert_eq!(h.sequences_on_disk("cam-1").len(), 6);
    assert!(h.videos_on_disk().is_empty());
}

#[test]
fn lenient_policy_accepts_output_of_failed_exit() {
    let h = harness(policy());
    h.write_frames("cam-1", 0..4);
    h.encoder.set_behavior("cam-1", MockBehavior::FailWithOutput);

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 1);
    assert_eq!(report.failed_chunks, 0);
    assert!(h.sequences_on_disk("cam-1").is_empty());
}

#[test]
fn strict_policy_rejects_output_of_failed_exit() {
    let h = harness(ConsolidationPolicy {
        lenient_encoder_success: false,
        ..policy()
    });
    h.write_frames("cam-1", 0..4);
    h.encoder.set_behavior("cam-1", MockBehavior::FailWithOutput);

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 0);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(h.sequences_on_disk("cam-1").len(), 4);
    assert!(h.videos_on_disk().is_empty(), "partial output must be removed");
}

#[test]
fn missing_output_is_a_failure_even_on_success() {
    let h = harness(policy());
    h.write_frames("cam-1", 0..4);
    h.encoder.set_behavior("cam-1", MockBehavior::SucceedWithoutOutput);

    let report = h.engine.run_pass(false);

    assert_eq!(report.failed_chunks, 1);
    assert_eq!(h.sequences_on_disk("cam-1").len(), 4);
}

#[test]
fn small_batches_wait_unless_forced() {
    let h = harness(ConsolidationPolicy {
        min_batch_frames: 10,
        ..policy()
    });
    h.write_frames("cam-1", 0..35);

    let report = h.engine.run_pass(false);
    assert_eq!(report.videos_created(), 1);
    assert_eq!(h.sequences_on_disk("cam-1"), (30..35).collect::<Vec<_>>());

    let report = h.engine.run_pass(false);
    assert_eq!(report.videos_created(), 0);
    assert!(report.camera("cam-1").map(|c| c.skipped).unwrap_or(false));

    let report = h.engine.run_pass(true);
    assert_eq!(report.videos_created(), 1);
    assert!(h.sequences_on_disk("cam-1").is_empty());
}

#[test]
fn unbounded_batch_makes_a_single_video() {
    let h = harness(ConsolidationPolicy {
        max_frames_per_batch: 0,
        ..policy()
    });
    h.write_frames("cam-1", 0..75);

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 1);
    assert_eq!(h.encoder.calls()[0].frames.len(), 75);
    let videos = h.videos_on_disk();
    assert!(!videos[0].contains("_part"));
}

#[test]
fn keep_disposition_never_reencodes_frames() {
    let h = harness(ConsolidationPolicy {
        disposition: FrameDisposition::Keep,
        ..policy()
    });
    h.write_frames("cam-1", 0..10);

    assert_eq!(h.engine.run_pass(false).videos_created(), 1);
    assert_eq!(h.sequences_on_disk("cam-1").len(), 10);
    assert_eq!(h.registry.consolidated_through("cam-1"), Some(9));

    assert_eq!(h.engine.run_pass(true).videos_created(), 0);

    h.write_frames("cam-1", 10..13);
    assert_eq!(h.engine.run_pass(false).videos_created(), 1);
    let calls = h.encoder.calls();
    assert_eq!(sequences(&calls[1].frames), vec![10, 11, 12]);
}

#[test]
fn kept_frames_are_not_encoded_again_after_restart() {
    let keep = ConsolidationPolicy {
        disposition: FrameDisposition::Keep,
        ..policy()
    };
    let h = harness(keep);
    h.write_frames("cam-1", 0..10);
    assert_eq!(h.engine.run_pass(false).videos_created(), 1);

    let (registry, engine) = h.restarted(keep);
    assert_eq!(engine.run_pass(true).videos_created(), 0);
    assert_eq!(h.encoder.calls().len(), 1);
    assert_eq!(registry.consolidated_through("cam-1"), Some(9));
    assert_eq!(h.sequences_on_disk("cam-1").len(), 10);

    h.write_frames("cam-1", 10..13);
    assert_eq!(engine.run_pass(false).videos_created(), 1);
    assert_eq!(sequences(&h.encoder.calls()[1].frames), vec![10, 11, 12]);
}

#[test]
fn delete_policy_ignores_a_leftover_watermark() {
    let h = harness(policy());
    h.store.save_watermark("cam-1", 100).expect("save watermark");
    h.write_frames("cam-1", 0..4);

    assert_eq!(h.engine.run_pass(false).videos_created(), 1);
    assert!(h.sequences_on_disk("cam-1").is_empty());
}

#[test]
fn renumber_compacts_unconsumed_frames() {
    let h = harness(ConsolidationPolicy {
        disposition: FrameDisposition::Renumber,
        min_batch_frames: 10,
        ..policy()
    });
    // 35 frames with gaps: 0, 2, 4, ..., 68
    h.write_frames("cam-1", (0..35).map(|i| i * 2));

    let report = h.engine.run_pass(false);

    assert_eq!(report.videos_created(), 1);
    assert_eq!(report.camera("cam-1").map(|c| c.frames_renumbered), Some(5));
    assert_eq!(h.registry.consolidated_through("cam-1"), Some(58));

    let on_disk = h.sequences_on_disk("cam-1");
    assert_eq!(on_disk.len(), 35);
    assert_eq!(&on_disk[30..], &[59, 60, 61, 62, 63]);

    let report = h.engine.run_pass(true);
    assert_eq!(report.videos_created(), 1);
    assert_eq!(
        sequences(&h.encoder.calls()[1].frames),
        vec![59, 60, 61, 62, 63]
    );
}

#[test]
fn renumber_skipped_after_failed_chunk() {
    let h = harness(ConsolidationPolicy {
        disposition: FrameDisposition::Renumber,
        max_frames_per_batch: 3,
        min_batch_frames: 3,
        ..policy()
    });
    h.write_frames("cam-1", [0, 5, 10, 15]);
    h.encoder.set_behavior("cam-1", MockBehavior::Fail);

    let report = h.engine.run_pass(false);

    assert_eq!(report.failed_chunks, 1);
    assert_eq!(h.registry.consolidated_through("cam-1"), None);
    assert_eq!(h.sequences_on_disk("cam-1"), vec![0, 5, 10, 15]);
}

#[test]
fn unreadable_camera_is_skipped() {
    let h = harness(policy());
    h.write_frames("cam-ok", 0..3);
    fs::write(h.store.root().join("broken"), b"not a directory").unwrap();
    h.registry.mark_active("broken");

    let report = h.engine.run_pass(false);

    assert_eq!(report.scan_errors, 1);
    assert_eq!(report.videos_created(), 1);
    assert_eq!(h.metrics.snapshot().scan_errors, 1);
}

#[test]
fn playlist_lists_absolute_frame_paths() {
    let h = harness(policy());
    h.write_frames("cam-1", 0..2);

    h.engine.run_pass(false);

    let call = &h.encoder.calls()[0];
    assert!(call.frames.iter().all(|p| p.is_absolute()));
    assert!(call.frames[0].starts_with(h.store.root()));
    assert!(call.output.starts_with(h.store.videos_dir()));
}
