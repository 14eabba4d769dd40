use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::lock::lock_mutex;

/// Per-camera counters. Copied out of the registry, never borrowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraState {
    pub frames_persisted: u64,
    pub last_persisted: Option<DateTime<Utc>>,
    pub active: bool,
    /// Highest sequence already consolidated while frames are kept on disk.
    pub consolidated_through: Option<u64>,
    pub videos_created: u64,
}

/// Typed registry of known cameras.
///
/// One mutex guards the whole map; no method holds it while calling out, so
/// there is no nested locking.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: Mutex<HashMap<String, CameraState>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns `true` if the camera was not active before.
    pub fn mark_active(&self, camera_id: &str) -> bool {
        let mut cameras = lock_mutex(&self.cameras, "registry.mark_active");
        if let Some(state) = cameras.get_mut(camera_id) {
            let newly = !state.active;
            state.active = true;
            return newly;
        }
        cameras.insert(
            camera_id.to_string(),
            CameraState {
                active: true,
                ..CameraState::default()
            },
        );
        true
    }

    /// Counts one persisted frame and returns the camera's new total.
    pub fn record_persisted(&self, camera_id: &str, timestamp: DateTime<Utc>) -> u64 {
        let mut cameras = lock_mutex(&self.cameras, "registry.record_persisted");
        let state = cameras.entry(camera_id.to_string()).or_default();
        state.active = true;
        state.frames_persisted += 1;
        state.last_persisted = Some(match state.last_persisted {
            Some(prev) if prev > timestamp => prev,
            _ => timestamp,
        });
        state.frames_persisted
    }

    pub fn record_video(&self, camera_id: &str) {
        let mut cameras = lock_mutex(&self.cameras, "registry.record_video");
        cameras.entry(camera_id.to_string()).or_default().videos_created += 1;
    }

    pub fn consolidated_through(&self, camera_id: &str) -> Option<u64> {
        let cameras = lock_mutex(&self.cameras, "registry.consolidated_through");
        cameras.get(camera_id).and_then(|s| s.consolidated_through)
    }

    /// Moves the watermark forward; it never goes back.
    pub fn advance_consolidated(&self, camera_id: &str, sequence: u64) {
        let mut cameras = lock_mutex(&self.cameras, "registry.advance_consolidated");
        let state = cameras.entry(camera_id.to_string()).or_default();
        state.consolidated_through = Some(match state.consolidated_through {
            Some(prev) if prev > sequence => prev,
            _ => sequence,
        });
    }

    /// Active camera ids, sorted for a stable scan order.
    pub fn active_cameras(&self) -> Vec<String> {
        let cameras = lock_mutex(&self.cameras, "registry.active_cameras");
        let mut ids: Vec<String> = cameras
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, camera_id: &str) -> Option<CameraState> {
        lock_mutex(&self.cameras, "registry.get").get(camera_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, CameraState)> {
        let cameras = lock_mutex(&self.cameras, "registry.snapshot");
        let mut all: Vec<(String, CameraState)> = cameras
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn total_persisted(&self) -> u64 {
        let cameras = lock_mutex(&self.cameras, "registry.total_persisted");
        cameras.values().map(|s| s.frames_persisted).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mark_active_is_idempotent() {
        let registry = CameraRegistry::new();
        assert!(registry.mark_active("cam-1"));
        assert!(!registry.mark_active("cam-1"));
        assert_eq!(registry.active_cameras(), vec!["cam-1"]);
    }

    #[test]
    fn persisted_counter_and_last_timestamp() {
        let registry = CameraRegistry::new();
        let t1 = DateTime::from_timestamp(1_000, 0).unwrap();
        let t2 = DateTime::from_timestamp(2_000, 0).unwrap();

        assert_eq!(registry.record_persisted("cam-1", t2), 1);
        assert_eq!(registry.record_persisted("cam-1", t1), 2);

        let state = registry.get("cam-1").unwrap();
        assert_eq!(state.frames_persisted, 2);
        assert_eq!(state.last_persisted, Some(t2));
        assert!(state.active);
    }

    #[test]
    fn watermark_only_moves_forward() {
        let registry = CameraRegistry::new();
        assert_eq!(registry.consolidated_through("cam-1"), None);
        registry.advance_consolidated("cam-1", 30);
        registry.advance_consolidated("cam-1", 10);
        assert_eq!(registry.consolidated_through("cam-1"), Some(30));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let registry = Arc::new(CameraRegistry::new());
        let now = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let camera = format!("cam-{}", i % 2);
                    for _ in 0..250 {
                        registry.record_persisted(&camera, now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.total_persisted(), 1_000);
        assert_eq!(registry.get("cam-0").unwrap().frames_persisted, 500);
    }
}
