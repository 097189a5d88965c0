//! Environment-driven configuration.
//!
//! Every threshold and interval named in the component design is read once
//! at boot into a single `Config` and shared by `Arc` — no component reads
//! `std::env` directly after startup.

pub mod paths;

use std::time::Duration;

/// Parse an environment variable into `T`, falling back to `default` on
/// absence or parse failure.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: f64) -> Duration {
    Duration::from_secs_f64(env_or(key, default_secs))
}

#[derive(Debug, Clone)]
pub struct Config {
    // -- face tracking (§4.3) --
    pub face_track_update_interval: Duration,
    pub face_track_recenter_timeout: Duration,
    pub face_track_recenter_step_deg: f32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub face_detect_enabled: bool,
    pub face_detection_interval: Duration,

    // -- head pose / posture (§4.2) --
    pub yaw_limit_deg: f32,
    pub pitch_limit_deg: f32,
    pub roll_limit_deg: f32,
    pub head_update_interval: Duration,
    pub head_hysteresis_deg: f32,
    pub sitting_head_pitch_comp: f32,
    pub standing_head_pitch_comp: f32,
    pub talk_overlay_amplitude_gain: f32,

    // -- audio (§4.5) --
    pub model_sample_rate_override: Option<u32>,
    pub audio_input_rate_override: Option<u32>,
    pub audio_output_rate_override: Option<u32>,
    pub audio_chunk_size: usize,
    pub silence_threshold: f32,
    pub loud_sound_threshold: f32,
    pub barge_in_volume_threshold: f32,
    pub enable_barge_in: bool,
    pub disable_speaker: bool,
    pub speech_tail_duration: Duration,
    pub amplitude_ema_alpha: f32,

    // -- sensors / awareness (§4.4, §4.8) --
    pub environment_poll_interval: Duration,
    pub awareness_debounce: Duration,
    pub awareness_reminder_interval: Duration,
    pub sound_direction_debounce: Duration,

    // -- state broadcast (§4.1) --
    pub state_stream_interval: Duration,

    // -- model / networking (§4.6, §5) --
    pub model_url: String,
    pub model_name: String,
    pub model_auth_header: Option<String>,
    pub default_persona: String,
    pub reconnect_max_attempts: u32,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    pub startup_response_timeout: Duration,

    // -- misc --
    pub data_dir: std::path::PathBuf,
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults given in the component design (§6) wherever a variable is
    /// unset or fails to parse.
    pub fn from_env() -> Self {
        Self {
            face_track_update_interval: env_duration_secs("FACE_TRACK_UPDATE_INTERVAL", 0.05),
            face_track_recenter_timeout: env_duration_secs("FACE_TRACK_RECENTER_TIMEOUT", 2.0),
            face_track_recenter_step_deg: env_or("FACE_TRACK_RECENTER_STEP", 2.0),
            camera_width: env_or("CAMERA_WIDTH", 640),
            camera_height: env_or("CAMERA_HEIGHT", 480),
            face_detect_enabled: env_bool("FACE_DETECT_ENABLED", true),
            face_detection_interval: env_duration_secs("FACE_DETECTION_INTERVAL", 0.8),

            yaw_limit_deg: env_or("HEAD_YAW_LIMIT", 80.0),
            pitch_limit_deg: env_or("HEAD_PITCH_LIMIT", 35.0),
            roll_limit_deg: env_or("HEAD_ROLL_LIMIT", 35.0),
            head_update_interval: env_duration_secs("HEAD_UPDATE_INTERVAL", 0.05),
            head_hysteresis_deg: env_or("HEAD_HYSTERESIS_DEG", 0.4),
            sitting_head_pitch_comp: env_or("SITTING_HEAD_PITCH_COMP", -20.0),
            standing_head_pitch_comp: env_or("STANDING_HEAD_PITCH_COMP", 0.0),
            talk_overlay_amplitude_gain: env_or("TALK_OVERLAY_AMPLITUDE_GAIN", 0.0),

            model_sample_rate_override: std::env::var("MODEL_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse().ok()),
            audio_input_rate_override: std::env::var("AUDIO_INPUT_RATE")
                .ok()
                .and_then(|v| v.parse().ok()),
            audio_output_rate_override: std::env::var("AUDIO_OUTPUT_RATE")
                .ok()
                .and_then(|v| v.parse().ok()),
            audio_chunk_size: env_or("AUDIO_CHUNK_SIZE", 1024),
            silence_threshold: env_or("SILENCE_THRESHOLD", 25.0),
            loud_sound_threshold: env_or("LOUD_SOUND_THRESHOLD", 30.0),
            barge_in_volume_threshold: env_or("BARGE_IN_VOLUME_THRESHOLD", 50.0),
            enable_barge_in: env_bool("ENABLE_BARGE_IN", true),
            disable_speaker: env_bool("DISABLE_PIDOG_SPEAKER", false),
            speech_tail_duration: env_duration_secs("SPEECH_TAIL_DURATION", 0.5),
            amplitude_ema_alpha: env_or("AMPLITUDE_EMA_ALPHA", 0.15),

            environment_poll_interval: env_duration_secs("ENVIRONMENT_POLL_INTERVAL", 0.5),
            awareness_debounce: env_duration_secs("AWARENESS_DEBOUNCE", 5.0),
            awareness_reminder_interval: env_duration_secs("AWARENESS_REMINDER_INTERVAL", 15.0),
            sound_direction_debounce: env_duration_secs("SOUND_DIRECTION_DEBOUNCE", 2.0),

            state_stream_interval: env_duration_secs("K9_STATE_STREAM_INTERVAL", 1.0),

            model_url: std::env::var("MODEL_URL")
                .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime".to_string()),
            model_name: std::env::var("MODEL_NAME")
                .unwrap_or_else(|_| "gpt-4o-realtime-preview".to_string()),
            model_auth_header: std::env::var("MODEL_API_KEY").ok(),
            default_persona: std::env::var("DEFAULT_PERSONA")
                .unwrap_or_else(|_| "default".to_string()),
            reconnect_max_attempts: env_or("RECONNECT_MAX_ATTEMPTS", 3),
            reconnect_backoff_min: env_duration_secs("RECONNECT_BACKOFF_MIN", 1.0),
            reconnect_backoff_max: env_duration_secs("RECONNECT_BACKOFF_MAX", 8.0),
            startup_response_timeout: env_duration_secs("STARTUP_RESPONSE_TIMEOUT", 15.0),

            data_dir: paths::get_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing() {
        std::env::remove_var("K9_TEST_NONEXISTENT");
        let v: f32 = env_or("K9_TEST_NONEXISTENT", 42.0);
        assert_eq!(v, 42.0);
    }

    #[test]
    fn env_bool_parses_common_truthy_values() {
        std::env::set_var("K9_TEST_BOOL", "true");
        assert!(env_bool("K9_TEST_BOOL", false));
        std::env::set_var("K9_TEST_BOOL", "0");
        assert!(!env_bool("K9_TEST_BOOL", true));
        std::env::remove_var("K9_TEST_BOOL");
    }
}
