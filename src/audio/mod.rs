//! Audio capture, resampling, gating, and playback.
//!
//! `AudioPipeline` ties the pieces together: it owns the mic stream, the
//! speaker sink, and the two sample-rate decisions (model rate vs. device
//! rate) described in the component design.

pub mod capture;
pub mod gate;
pub mod playback;
pub mod resample;
pub mod ring_buffer;

use std::sync::Arc;

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use gate::TalkingMovementGate;
use playback::Playback;

/// Candidate model sample rates, preferring 24 kHz when both devices
/// support it.
const MODEL_RATE_CANDIDATES: [u32; 2] = [24_000, 16_000];

/// Probe the default input/output devices and pick the model rate: the
/// configured override if set, else 24 kHz if both devices advertise
/// support for it, else 16 kHz.
fn resolve_model_rate(cfg: &Config) -> u32 {
    if let Some(rate) = cfg.model_sample_rate_override {
        return rate;
    }

    let host = cpal::default_host();
    let input_supports_24k = host
        .default_input_device()
        .and_then(|d| d.supported_input_configs().ok())
        .map(|mut configs| {
            configs.any(|c| c.min_sample_rate().0 <= 24_000 && c.max_sample_rate().0 >= 24_000)
        })
        .unwrap_or(false);
    let output_supports_24k = host
        .default_output_device()
        .and_then(|d| d.supported_output_configs().ok())
        .map(|mut configs| {
            configs.any(|c| c.min_sample_rate().0 <= 24_000 && c.max_sample_rate().0 >= 24_000)
        })
        .unwrap_or(false);

    if input_supports_24k && output_supports_24k {
        MODEL_RATE_CANDIDATES[0]
    } else {
        warn!("24kHz not supported by both devices, falling back to 16kHz model rate");
        MODEL_RATE_CANDIDATES[1]
    }
}

fn resolve_speaker_rate(cfg: &Config) -> u32 {
    if let Some(rate) = cfg.audio_output_rate_override {
        return rate;
    }
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.default_output_config().ok())
        .map(|c| c.sample_rate().0)
        .unwrap_or(24_000)
}

/// Owns the mic and speaker I/O for the lifetime of the orchestrator.
pub struct AudioPipeline {
    pub model_rate: u32,
    pub talking_gate: TalkingMovementGate,
    playback: Arc<Playback>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    _capture: Option<capture::Capture>,
}

impl AudioPipeline {
    pub fn new(cfg: &Config) -> Result<Self> {
        let model_rate = resolve_model_rate(cfg);
        let speaker_rate = resolve_speaker_rate(cfg);
        let talking_gate = TalkingMovementGate::new();

        let playback = Arc::new(Playback::new(
            speaker_rate,
            cfg.amplitude_ema_alpha,
            talking_gate.clone(),
            cfg.disable_speaker,
        )?);

        let (tx, rx) = mpsc::channel(64);
        let capture = match capture::start_capture(cfg, model_rate, None, talking_gate.clone(), tx) {
            Ok(capture) => Some(capture),
            Err(e) => {
                warn!("Microphone capture failed to start: {e} — audio input disabled");
                None
            }
        };

        info!(model_rate, speaker_rate, "Audio pipeline ready");

        Ok(Self {
            model_rate,
            talking_gate,
            playback,
            outbound_rx: tokio::sync::Mutex::new(Some(rx)),
            _capture: capture,
        })
    }

    /// Take the outbound (mic -> model) channel receiver. Can only be taken
    /// once; `ModelSession` owns it for the lifetime of the connection.
    pub async fn take_outbound(&self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.outbound_rx.lock().await.take()
    }

    /// Enqueue model-rate PCM for playback at the given output volume.
    pub fn enqueue_playback(&self, samples: &[f32], volume: f32) {
        self.playback.enqueue(samples, self.model_rate, volume);
    }

    pub fn current_speech_amplitude(&self) -> f32 {
        self.playback.current_speech_amplitude()
    }

    /// Latest raw microphone input RMS volume, or 0.0 if capture failed to
    /// start. Used by the awareness loop for loud/quiet sound classification.
    pub fn current_input_volume(&self) -> f32 {
        self._capture.as_ref().map(|c| c.current_input_volume()).unwrap_or(0.0)
    }

    pub fn is_playback_idle(&self) -> bool {
        self.playback.is_idle()
    }

    /// Clear the outbound queue and stop talking-movement. Called on
    /// barge-in or before a new awareness stimulus.
    pub fn interrupt_playback(&self, reason: &str) {
        self.playback.interrupt_playback(reason);
    }

    /// Pause capture and flush playback. Called once during orchestrator
    /// shutdown, after `ModelSession`'s tasks have been torn down.
    pub fn shutdown(&self) {
        if let Some(capture) = &self._capture {
            capture.stop();
        }
        self.playback.interrupt_playback("shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_rate_respects_override() {
        let mut cfg = Config::from_env();
        cfg.model_sample_rate_override = Some(16_000);
        assert_eq!(resolve_model_rate(&cfg), 16_000);
    }
}
