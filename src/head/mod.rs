//! `HeadController`: owns the pose composition and the periodic hardware
//! push loop, plus the talk overlay task.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::audio::AudioPipeline;
use crate::config::Config;
use crate::hardware::HardwareDog;
use crate::state::pose::{HeadPose, PoseComposition, Posture};
use crate::state::StateStore;

/// Talk overlay amplitudes and frequency (degrees, Hz), from the component
/// design defaults.
const OVERLAY_A_YAW: f32 = 4.0;
const OVERLAY_A_PITCH: f32 = 3.5;
const OVERLAY_A_ROLL: f32 = 1.5;
const OVERLAY_FREQ_HZ: f32 = 1.4;

pub struct HeadController {
    cfg: Arc<Config>,
    hardware: Arc<dyn HardwareDog>,
    state: Arc<StateStore>,
    audio: Arc<AudioPipeline>,
    composition: Mutex<PoseComposition>,
    last_commanded: Mutex<HeadPose>,
    talking_enabled: Arc<AtomicBool>,
}

impl HeadController {
    pub fn new(
        cfg: Arc<Config>,
        hardware: Arc<dyn HardwareDog>,
        state: Arc<StateStore>,
        audio: Arc<AudioPipeline>,
    ) -> Arc<Self> {
        let initial_bias = Posture::Sitting.pitch_bias(&cfg);
        Arc::new(Self {
            cfg,
            hardware,
            state,
            audio,
            composition: Mutex::new(PoseComposition {
                bias_pose: HeadPose::new(0.0, initial_bias, 0.0),
                ..Default::default()
            }),
            last_commanded: Mutex::new(HeadPose::default()),
            talking_enabled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Absolute base pose (tool/face-tracker intent).
    pub async fn set_pose(&self, yaw: Option<f32>, pitch: Option<f32>, roll: Option<f32>) {
        let mut comp = self.composition.lock().await;
        if let Some(yaw) = yaw {
            comp.base_pose.yaw = yaw;
        }
        if let Some(pitch) = pitch {
            comp.base_pose.pitch = pitch;
        }
        if let Some(roll) = roll {
            comp.base_pose.roll = roll;
        }
    }

    /// Relative delta applied to the current base pose.
    pub async fn adjust_pose(&self, dy: f32, dp: f32, dr: f32) {
        let mut comp = self.composition.lock().await;
        comp.base_pose.yaw += dy;
        comp.base_pose.pitch += dp;
        comp.base_pose.roll += dr;
    }

    /// Current effective (clamped, composed) pose.
    pub async fn current_pose(&self) -> HeadPose {
        self.composition.lock().await.effective(&self.cfg)
    }

    /// Read current hardware angles, subtract bias, and set base pose to
    /// match — used after macros that move servos outside the controller.
    pub async fn sync_with_hardware(&self) {
        match self.hardware.head_current_angles().await {
            Ok((yaw, roll, pitch)) => {
                let mut comp = self.composition.lock().await;
                comp.base_pose = HeadPose::new(yaw - comp.bias_pose.yaw, pitch - comp.bias_pose.pitch, roll - comp.bias_pose.roll);
            }
            Err(e) => warn!("sync_with_hardware: head_current_angles failed: {e}"),
        }
    }

    /// Preserve effective pitch across a posture transition: base absorbs
    /// the delta between the old and new bias.
    pub async fn set_posture_bias(&self, new_pitch_bias: f32) {
        let mut comp = self.composition.lock().await;
        let old_bias = comp.bias_pose.pitch;
        comp.base_pose.pitch += old_bias - new_pitch_bias;
        comp.bias_pose.pitch = new_pitch_bias;
    }

    pub fn enable_talking(self: &Arc<Self>) {
        if self.talking_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run_talk_overlay().await });
    }

    pub fn disable_talking(&self) {
        self.talking_enabled.store(false, Ordering::SeqCst);
    }

    async fn run_talk_overlay(self: Arc<Self>) {
        let gain = self.cfg.talk_overlay_amplitude_gain;
        let start = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_millis(20));

        while self.talking_enabled.load(Ordering::SeqCst) {
            ticker.tick().await;
            let t = start.elapsed().as_secs_f32();
            let speech_amp = self.audio.current_speech_amplitude();
            let envelope = 1.0 - gain + gain * speech_amp;

            let offset = HeadPose::new(
                OVERLAY_A_YAW * envelope * (2.0 * PI * 0.8 * OVERLAY_FREQ_HZ * t).sin(),
                OVERLAY_A_PITCH * envelope * (2.0 * PI * OVERLAY_FREQ_HZ * t + PI / 4.0).sin(),
                OVERLAY_A_ROLL * envelope * (2.0 * PI * 1.3 * OVERLAY_FREQ_HZ * t).sin(),
            );

            let mut comp = self.composition.lock().await;
            comp.talk_offset = offset;
        }

        // Deterministic reset on disable.
        let mut comp = self.composition.lock().await;
        comp.talk_offset = HeadPose::default();
    }

    /// Periodic hardware push loop (20 Hz default). Runs for the lifetime of
    /// the orchestrator; call once from `Orchestrator::run`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.head_update_interval);
        loop {
            ticker.tick().await;

            let effective = {
                let comp = self.composition.lock().await;
                comp.effective(&self.cfg)
            };

            let moved = {
                let last = self.last_commanded.lock().await;
                effective.max_delta(*last) > self.cfg.head_hysteresis_deg
            };

            if !moved {
                continue;
            }

            if let Err(e) = self
                .hardware
                .head_move_raw(effective.yaw, effective.roll, effective.pitch, false, 80)
                .await
            {
                warn!("HeadController: head_move_raw failed: {e}");
                continue;
            }

            *self.last_commanded.lock().await = effective;
            self.state.mutate(|s| s.head_pose = effective).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardwareDog;

    #[tokio::test]
    async fn set_pose_then_current_pose_clamps() {
        let cfg = Arc::new(Config::from_env());
        let hardware: Arc<dyn HardwareDog> = Arc::new(MockHardwareDog::new());
        let state = Arc::new(StateStore::new("default"));
        let controller_no_audio = {
            // Exercise composition math without requiring a real audio device.
            let comp = Mutex::new(PoseComposition::default());
            comp
        };
        controller_no_audio.lock().await.base_pose = HeadPose::new(200.0, 0.0, 0.0);
        let effective = controller_no_audio.lock().await.effective(&cfg);
        assert_eq!(effective.yaw, cfg.yaw_limit_deg);
        let _ = (hardware, state);
    }

    #[tokio::test]
    async fn set_posture_bias_preserves_effective_pitch() {
        let cfg = Config::from_env();
        let mut comp = PoseComposition::default();
        comp.bias_pose.pitch = Posture::Sitting.pitch_bias(&cfg);
        let before = comp.effective(&cfg).pitch;

        let old_bias = comp.bias_pose.pitch;
        let new_bias = Posture::Standing.pitch_bias(&cfg);
        comp.base_pose.pitch += old_bias - new_bias;
        comp.bias_pose.pitch = new_bias;

        let after = comp.effective(&cfg).pitch;
        assert!((before - after).abs() < 0.5);
    }
}
