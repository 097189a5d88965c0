//! `SensorMonitor`: polls touch, ear-direction, and IMU sensors, and emits
//! debounced change events into `StateStore`. Side-effect free with respect
//! to motion: it only writes timestamps/labels and publishes events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::config::Config;
use crate::hardware::{HardwareDog, TouchReading, Vector3};
use crate::state::{Event, PettingGesture, StateStore};

/// 8-way compass label for ear-array sound direction.
fn compass_label(degrees: f32) -> &'static str {
    let normalized = degrees.rem_euclid(360.0);
    match normalized {
        d if d < 22.5 || d >= 337.5 => "front",
        d if d < 67.5 => "front-right",
        d if d < 112.5 => "right",
        d if d < 157.5 => "back-right",
        d if d < 202.5 => "back",
        d if d < 247.5 => "back-left",
        d if d < 292.5 => "left",
        _ => "front-left",
    }
}

/// Categorical body orientation label from accelerometer pitch/roll.
///
/// Checked in order of magnitude: upside-down (roll near +-180) and
/// side-lying (roll near +-90) dominate over nose/tail-hanging (pitch near
/// +-90), since a real reading rarely lands exactly on an axis.
fn orientation_label(acc: Vector3) -> &'static str {
    let denom = (acc.x * acc.x + acc.z * acc.z).sqrt();
    if denom < 1e-3 && acc.y.abs() < 1e-3 {
        return "unclear";
    }
    let pitch = acc.y.atan2(denom).to_degrees();
    let roll = (-acc.x).atan2(acc.z).to_degrees();

    if roll.abs() > 150.0 {
        "upside down"
    } else if roll > 60.0 {
        "right side"
    } else if roll < -60.0 {
        "left side"
    } else if pitch > 60.0 {
        "hanging by nose"
    } else if pitch < -60.0 {
        "hanging by tail"
    } else if pitch.abs() < 30.0 && roll.abs() < 30.0 {
        "upright"
    } else {
        "unclear"
    }
}

fn touch_to_gesture(reading: TouchReading) -> Option<PettingGesture> {
    match reading {
        TouchReading::None => None,
        TouchReading::Left => Some(PettingGesture::L),
        TouchReading::Right => Some(PettingGesture::R),
        TouchReading::Ls => Some(PettingGesture::Ls),
        TouchReading::Rs => Some(PettingGesture::Rs),
    }
}

/// Whether sensor-change-driven stimuli should currently be suppressed (mic
/// is hearing the user, model is speaking, or a response is in flight).
/// `SensorMonitor` itself never suppresses petting/orientation/face events —
/// that gate belongs to `AwarenessLoop` — but sound-direction changes are
/// suppressed here per the component contract since they're purely reactive
/// to ambient noise that the model is already attending to.
pub trait SpeechActivity: Send + Sync {
    fn is_active(&self) -> bool;
}

struct LastOrientation {
    label: &'static str,
}

pub struct SensorMonitor {
    cfg: Arc<Config>,
    hardware: Arc<dyn HardwareDog>,
    state: Arc<StateStore>,
    speech_activity: Arc<dyn SpeechActivity>,
    enabled: Arc<AtomicBool>,
}

impl SensorMonitor {
    pub fn new(
        cfg: Arc<Config>,
        hardware: Arc<dyn HardwareDog>,
        state: Arc<StateStore>,
        speech_activity: Arc<dyn SpeechActivity>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            hardware,
            state,
            speech_activity,
            enabled: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Shared enable/disable switch for the orchestrator's
    /// `set_sensors_enabled` external operation. Polling continues while
    /// disabled (so edge-detection state doesn't go stale the instant it's
    /// re-enabled) but no events are emitted and no state is mutated.
    pub fn enabled_switch(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// Poll loop at `ENVIRONMENT_POLL_INTERVAL`. Runs for the lifetime of the
    /// orchestrator.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.environment_poll_interval);
        let mut was_petted = false;
        let mut last_sound_label: Option<&'static str> = None;
        let mut last_sound_emit: Option<Instant> = None;
        let mut last_orientation: Option<LastOrientation> = None;

        loop {
            ticker.tick().await;

            if !self.enabled.load(Ordering::SeqCst) {
                continue;
            }

            match self.hardware.touch_read().await {
                Ok(reading) => {
                    let is_petted = reading != TouchReading::None;
                    if is_petted != was_petted {
                        was_petted = is_petted;
                        let gesture = touch_to_gesture(reading);
                        self.state
                            .mutate(|s| {
                                s.is_being_petted = is_petted;
                                s.petting_gesture = gesture;
                                if is_petted {
                                    s.petting_at = Some(chrono::Utc::now());
                                }
                            })
                            .await;
                        if is_petted {
                            self.state
                                .publish_event(Event::new(
                                    "petting_change",
                                    serde_json::json!({ "gesture": gesture }),
                                ))
                                .await;
                        }
                    }
                }
                Err(e) => warn!("SensorMonitor: touch_read failed: {e}"),
            }

            if !self.speech_activity.is_active() {
                match self.hardware.ears_detected().await {
                    Ok(true) => match self.hardware.ears_read().await {
                        Ok(degrees) => {
                            let label = compass_label(degrees);
                            let debounce_elapsed = last_sound_emit
                                .map(|t| t.elapsed() >= self.cfg.sound_direction_debounce)
                                .unwrap_or(true);
                            if Some(label) != last_sound_label && debounce_elapsed {
                                last_sound_label = Some(label);
                                last_sound_emit = Some(Instant::now());
                                self.state.mutate(|s| s.last_sound_direction = Some(label.to_string())).await;
                                self.state
                                    .publish_event(Event::new(
                                        "sound_direction_change",
                                        serde_json::json!({ "direction": label }),
                                    ))
                                    .await;
                            }
                        }
                        Err(e) => warn!("SensorMonitor: ears_read failed: {e}"),
                    },
                    Ok(false) => {}
                    Err(e) => warn!("SensorMonitor: ears_detected failed: {e}"),
                }
            }

            match self.hardware.acc_data().await {
                Ok(acc) => {
                    let label = orientation_label(acc);
                    let changed = last_orientation.as_ref().map(|o| o.label != label).unwrap_or(true);
                    if changed {
                        last_orientation = Some(LastOrientation { label });
                        self.state.mutate(|s| s.last_orientation_desc = Some(label.to_string())).await;
                        self.state
                            .publish_event(Event::new(
                                "orientation_change",
                                serde_json::json!({ "orientation": label }),
                            ))
                            .await;
                    }
                }
                Err(e) => warn!("SensorMonitor: acc_data failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysIdle;
    impl SpeechActivity for AlwaysIdle {
        fn is_active(&self) -> bool {
            false
        }
    }

    #[test]
    fn compass_label_front_wraps_around_zero() {
        assert_eq!(compass_label(5.0), "front");
        assert_eq!(compass_label(359.0), "front");
    }

    #[test]
    fn compass_label_right_angle_is_right() {
        assert_eq!(compass_label(90.0), "right");
    }

    #[test]
    fn orientation_label_upright_for_gravity_on_z() {
        let acc = Vector3 { x: 0.0, y: 0.0, z: 1.0 };
        assert_eq!(orientation_label(acc), "upright");
    }

    #[test]
    fn orientation_label_right_side_when_rolled() {
        let acc = Vector3 { x: -1.0, y: 0.0, z: 0.0 };
        assert_eq!(orientation_label(acc), "right side");
    }

    #[test]
    fn touch_to_gesture_maps_ls_rs() {
        assert_eq!(touch_to_gesture(TouchReading::Ls), Some(PettingGesture::Ls));
        assert_eq!(touch_to_gesture(TouchReading::None), None);
    }

    #[tokio::test]
    async fn monitor_constructs_with_mock_hardware() {
        use crate::hardware::MockHardwareDog;
        let cfg = Arc::new(Config::from_env());
        let hardware: Arc<dyn HardwareDog> = Arc::new(MockHardwareDog::new());
        let state = Arc::new(StateStore::new("default"));
        let activity: Arc<dyn SpeechActivity> = Arc::new(AlwaysIdle);
        let _monitor = SensorMonitor::new(cfg, hardware, state, activity);
    }
}
