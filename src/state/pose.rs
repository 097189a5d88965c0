//! Head pose types: clamped angles and the three additive composition layers.

use crate::config::Config;

/// Yaw/pitch/roll triple in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl HeadPose {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Clamp each axis against the configured limits.
    pub fn clamp(self, cfg: &Config) -> Self {
        Self {
            yaw: self.yaw.clamp(-cfg.yaw_limit_deg, cfg.yaw_limit_deg),
            pitch: self.pitch.clamp(-cfg.pitch_limit_deg, cfg.pitch_limit_deg),
            roll: self.roll.clamp(-cfg.roll_limit_deg, cfg.roll_limit_deg),
        }
    }

    pub fn add(self, other: HeadPose) -> Self {
        Self {
            yaw: self.yaw + other.yaw,
            pitch: self.pitch + other.pitch,
            roll: self.roll + other.roll,
        }
    }

    /// Largest per-axis change relative to `other`, in degrees.
    pub fn max_delta(self, other: HeadPose) -> f32 {
        (self.yaw - other.yaw)
            .abs()
            .max((self.pitch - other.pitch).abs())
            .max((self.roll - other.roll).abs())
    }

    /// Human-readable direction label, mainly for status/awareness text.
    pub fn direction_label(self) -> String {
        let vertical = if self.pitch > 10.0 {
            Some("up")
        } else if self.pitch < -10.0 {
            Some("down")
        } else {
            None
        };
        let horizontal = if self.yaw > 10.0 {
            Some("right")
        } else if self.yaw < -10.0 {
            Some("left")
        } else {
            None
        };
        match (vertical, horizontal) {
            (Some(v), Some(h)) => format!("{v} and {h}"),
            (Some(v), None) => v.to_string(),
            (None, Some(h)) => h.to_string(),
            (None, None) => "straight ahead".to_string(),
        }
    }
}

/// The three additive pose layers HeadController composes on every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseComposition {
    /// Intent from tools/face tracker.
    pub base_pose: HeadPose,
    /// Posture-dependent offset (e.g. sitting adds -20 deg pitch).
    pub bias_pose: HeadPose,
    /// Time-varying overlay applied while talking.
    pub talk_offset: HeadPose,
}

impl PoseComposition {
    /// Effective pose: clamp(base + bias + talk).
    pub fn effective(&self, cfg: &Config) -> HeadPose {
        self.base_pose
            .add(self.bias_pose)
            .add(self.talk_offset)
            .clamp(cfg)
    }
}

/// Home posture of the dog; drives the pitch bias applied to the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Sitting,
    Standing,
}

impl Posture {
    /// Pitch bias (degrees) associated with this posture.
    pub fn pitch_bias(self, cfg: &Config) -> f32 {
        match self {
            Posture::Sitting => cfg.sitting_head_pitch_comp,
            Posture::Standing => cfg.standing_head_pitch_comp,
        }
    }
}

impl Default for Posture {
    fn default() -> Self {
        Posture::Sitting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> Config {
        let mut cfg = Config::from_env();
        cfg.yaw_limit_deg = 80.0;
        cfg.pitch_limit_deg = 35.0;
        cfg.roll_limit_deg = 35.0;
        cfg
    }

    #[test]
    fn clamp_restricts_each_axis_independently() {
        let cfg = test_cfg();
        let pose = HeadPose::new(200.0, -200.0, 50.0).clamp(&cfg);
        assert_eq!(pose.yaw, 80.0);
        assert_eq!(pose.pitch, -35.0);
        assert_eq!(pose.roll, 35.0);
    }

    #[test]
    fn posture_bias_absorbed_by_base_preserves_effective_pitch() {
        let cfg = test_cfg();
        let mut comp = PoseComposition::default();
        comp.bias_pose.pitch = Posture::Sitting.pitch_bias(&cfg);
        let before = comp.effective(&cfg);

        // Transition to standing: base absorbs the old bias so effective pitch
        // is unchanged until a new action explicitly moves the head.
        let old_bias = comp.bias_pose.pitch;
        let new_bias = Posture::Standing.pitch_bias(&cfg);
        comp.base_pose.pitch += old_bias - new_bias;
        comp.bias_pose.pitch = new_bias;

        let after = comp.effective(&cfg);
        assert!((before.pitch - after.pitch).abs() < 0.01);
    }

    #[test]
    fn direction_label_straight_ahead() {
        let pose = HeadPose::new(0.0, 0.0, 0.0);
        assert_eq!(pose.direction_label(), "straight ahead");
    }
}
