//! `FaceTracker`: turns periodic face-detection samples into head-pose
//! adjustments, with a return-to-pose behavior when the subject is lost.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::Config;
use crate::head::HeadController;
use crate::state::pose::HeadPose;
use crate::state::{Event, StateStore};
use crate::vision::Vision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerPhase {
    Idle,
    Active,
    Recentering,
}

struct TrackerState {
    phase: TrackerPhase,
    return_pose: HeadPose,
    last_detection_at: Option<Instant>,
}

pub struct FaceTracker {
    cfg: Arc<Config>,
    head: Arc<HeadController>,
    vision: Arc<dyn Vision>,
    state_store: Arc<StateStore>,
    inner: Mutex<TrackerState>,
}

impl FaceTracker {
    pub fn new(
        cfg: Arc<Config>,
        head: Arc<HeadController>,
        vision: Arc<dyn Vision>,
        state_store: Arc<StateStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            head,
            vision,
            state_store,
            inner: Mutex::new(TrackerState {
                phase: TrackerPhase::Idle,
                return_pose: HeadPose::default(),
                last_detection_at: None,
            }),
        })
    }

    /// Control law: a step toward/away from the frame center, quantized by
    /// the configured dead-zones and step sizes.
    fn pose_step(cfg: &Config, cx: f32, cy: f32, frame_w: u32, frame_h: u32) -> (f32, f32) {
        let ex = cx - frame_w as f32 / 2.0;
        let ey = cy - frame_h as f32 / 2.0;

        let yaw_step = if ex.abs() <= 15.0 {
            0.0
        } else {
            -ex.signum() * 0.5 * (ex.abs() / 30.0).ceil()
        };

        let pitch_step = if ey.abs() <= 25.0 {
            0.0
        } else {
            -ey.signum() * 1.0 * (ey.abs() / 50.0).ceil()
        };

        let _ = cfg;
        (yaw_step, pitch_step)
    }

    /// Run the tracker loop at `FACE_TRACK_UPDATE_INTERVAL`. Runs for the
    /// lifetime of the orchestrator.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.face_track_update_interval);
        let mut last_detect_poll = Instant::now() - self.cfg.face_detection_interval;
        let mut cached_detection = None;

        loop {
            ticker.tick().await;

            if last_detect_poll.elapsed() >= self.cfg.face_detection_interval {
                cached_detection = match self.vision.detect().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("FaceTracker: vision detect failed: {e}");
                        None
                    }
                };
                last_detect_poll = Instant::now();
            }

            let now = Instant::now();
            let was_present = self.state_store.snapshot().await.face_present;
            let present = cached_detection.is_some();

            if present != was_present {
                self.state_store
                    .mutate(|s| {
                        s.face_present = present;
                        if present {
                            s.face_last_seen_at = Some(chrono::Utc::now());
                        }
                    })
                    .await;
                self.state_store
                    .publish_event(Event::new("face_presence_change", serde_json::json!({ "present": present })))
                    .await;
            }

            let mut inner = self.inner.lock().await;
            match cached_detection {
                Some(detection) => {
                    inner.last_detection_at = Some(now);
                    if inner.phase == TrackerPhase::Idle {
                        let current = self.head.current_pose().await;
                        inner.return_pose = current;
                    }
                    inner.phase = TrackerPhase::Active;

                    let (frame_w, frame_h) = self.vision.frame_size();
                    let (dy, dp) = Self::pose_step(
                        &self.cfg,
                        detection.human_center_x,
                        detection.human_center_y,
                        frame_w,
                        frame_h,
                    );
                    if dy != 0.0 || dp != 0.0 {
                        self.head.adjust_pose(dy, dp, 0.0).await;
                    }
                }
                None => {
                    let timed_out = inner
                        .last_detection_at
                        .map(|t| now.duration_since(t) >= self.cfg.face_track_recenter_timeout)
                        .unwrap_or(true);

                    if inner.phase == TrackerPhase::Active && timed_out {
                        inner.phase = TrackerPhase::Recentering;
                    }

                    if inner.phase == TrackerPhase::Recentering {
                        let current = self.head.current_pose().await;
                        let target = inner.return_pose;
                        let dy = step_toward(current.yaw, target.yaw, self.cfg.face_track_recenter_step_deg);
                        let dp = step_toward(current.pitch, target.pitch, self.cfg.face_track_recenter_step_deg);
                        let dr = step_toward(current.roll, target.roll, self.cfg.face_track_recenter_step_deg);

                        if dy != 0.0 || dp != 0.0 || dr != 0.0 {
                            self.head.adjust_pose(dy, dp, dr).await;
                        } else {
                            inner.phase = TrackerPhase::Idle;
                        }
                    }
                }
            }
        }
    }
}

/// Bounded step toward `target`, snapping when within 0.5 deg.
fn step_toward(current: f32, target: f32, max_step: f32) -> f32 {
    let delta = target - current;
    if delta.abs() <= 0.5 {
        0.0
    } else {
        delta.signum() * max_step.min(delta.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_step_is_zero_within_dead_zone() {
        let cfg = Config::from_env();
        let (dy, dp) = FaceTracker::pose_step(&cfg, 320.0, 240.0, 640, 480);
        assert_eq!((dy, dp), (0.0, 0.0));
    }

    #[test]
    fn pose_step_turns_toward_right_edge_detection() {
        let cfg = Config::from_env();
        let (dy, _dp) = FaceTracker::pose_step(&cfg, 640.0, 240.0, 640, 480);
        assert!(dy < 0.0, "expected a negative (rightward) yaw step, got {dy}");
    }

    #[test]
    fn step_toward_snaps_within_half_degree() {
        assert_eq!(step_toward(0.4, 0.0, 2.0), 0.0);
    }

    #[test]
    fn step_toward_bounds_to_max_step() {
        assert_eq!(step_toward(10.0, 0.0, 2.0), -2.0);
    }
}
