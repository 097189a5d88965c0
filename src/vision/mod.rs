//! `Vision`: the camera boundary. Produces periodic face-detection samples
//! and single-shot still captures for the `look_and_see` tool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

/// One face-detection sample, in camera pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetection {
    pub human_count: u32,
    pub human_center_x: f32,
    pub human_center_y: f32,
}

/// Camera/vision boundary. `start`/`stop` bracket the detector's lifetime;
/// `detect` is polled by `FaceTracker` at `FACE_DETECTION_INTERVAL`.
#[async_trait]
pub trait Vision: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    /// Latest detection, or `None` if no human is currently in frame.
    async fn detect(&self) -> Result<Option<FaceDetection>>;

    /// Capture a still frame to disk, returning its path.
    async fn capture_image(&self, path: &str) -> Result<String>;

    /// Camera frame dimensions, known at boot.
    fn frame_size(&self) -> (u32, u32);
}

/// Dependency-free `Vision` used for tests and camera-less runs. Detections
/// are injected via `set_detection`/`clear_detection` to script test
/// scenarios (e.g. the face-track-then-recenter end-to-end case).
pub struct MockVision {
    width: u32,
    height: u32,
    detection: Mutex<Option<FaceDetection>>,
    capture_count: AtomicU32,
}

impl MockVision {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            detection: Mutex::new(None),
            capture_count: AtomicU32::new(0),
        }
    }

    pub fn set_detection(&self, detection: FaceDetection) {
        *self.detection.lock().unwrap() = Some(detection);
    }

    pub fn clear_detection(&self) {
        *self.detection.lock().unwrap() = None;
    }

    pub fn capture_count(&self) -> u32 {
        self.capture_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Vision for MockVision {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn detect(&self) -> Result<Option<FaceDetection>> {
        Ok(*self.detection.lock().unwrap())
    }

    async fn capture_image(&self, path: &str) -> Result<String> {
        self.capture_count.fetch_add(1, Ordering::Relaxed);
        Ok(path.to_string())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detect_reflects_injected_detection() {
        let vision = MockVision::new(640, 480);
        assert!(vision.detect().await.unwrap().is_none());

        vision.set_detection(FaceDetection {
            human_count: 1,
            human_center_x: 320.0,
            human_center_y: 240.0,
        });
        let detection = vision.detect().await.unwrap().unwrap();
        assert_eq!(detection.human_count, 1);

        vision.clear_detection();
        assert!(vision.detect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capture_image_increments_count() {
        let vision = MockVision::new(640, 480);
        vision.capture_image("/tmp/x.jpg").await.unwrap();
        vision.capture_image("/tmp/y.jpg").await.unwrap();
        assert_eq!(vision.capture_count(), 2);
    }
}
