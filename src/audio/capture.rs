//! Microphone capture via `cpal`.
//!
//! The cpal callback never awaits: it downmixes to mono and pushes raw
//! samples into a lock-free ring buffer. A separate async task drains the
//! buffer, applies the gating decision from `gate::SilenceGate` /
//! `gate::TalkingMovementGate`, resamples to the model's rate, and forwards
//! admitted chunks to `ModelSession` over an mpsc channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::gate::{SilenceGate, TalkingMovementGate};
use super::resample::{resample_fft, rms_volume, to_mono};
use super::ring_buffer::{audio_ring_buffer, AudioConsumer};
use crate::config::Config;

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

struct ResolvedDevice {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
    channels: u16,
}

fn resolve_device(device_name: Option<&str>) -> Result<ResolvedDevice> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .context("enumerate input devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("input device not found: {name}"))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow!("no default input device available"))?
    };

    let default_config = device.default_input_config().context("default input config")?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        native_rate,
        channels,
        "Selected microphone"
    );

    Ok(ResolvedDevice {
        device,
        stream_config: StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(native_rate),
            buffer_size: cpal::BufferSize::Default,
        },
        native_rate,
        channels,
    })
}

/// Wrapper to make `cpal::Stream` Send + Sync.
///
/// `cpal::Stream` is `!Send`/`!Sync` on some platforms due to internal raw
/// pointers, but we only hold it alive to keep the stream running and call
/// `pause()` on shutdown.
struct SendStream(Stream);

// SAFETY: the stream's audio callback runs on its own internal thread
// managed by cpal; `pause()` only touches platform handles that are safe to
// call from any thread, matching the same reasoning rodio's `OutputStream`
// wrapper relies on in `playback.rs`.
unsafe impl Send for SendStream {}
unsafe impl Sync for SendStream {}

/// Handle to a running capture stream and its async drain task.
pub struct Capture {
    stream: SendStream,
    pub native_rate: u32,
    drain_task: tokio::task::JoinHandle<()>,
    input_volume_bits: Arc<AtomicU32>,
}

impl Capture {
    /// Latest raw RMS volume of the microphone input, updated ~50 times a
    /// second by the drain task regardless of gating. Used by the awareness
    /// loop to classify ambient sound as loud/quiet.
    pub fn current_input_volume(&self) -> f32 {
        f32::from_bits(self.input_volume_bits.load(Ordering::Relaxed))
    }

    /// Pause the input stream. Called from `AudioPipeline::shutdown`.
    pub fn stop(&self) {
        if let Err(e) = self.stream.0.pause() {
            warn!("Capture: failed to pause input stream: {e}");
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.drain_task.abort();
    }
}

/// Start microphone capture and spawn the gating/resample task.
///
/// `outbound` receives admitted, model-rate-resampled mono f32 chunks.
pub fn start_capture(
    cfg: &Config,
    model_rate: u32,
    device_name: Option<&str>,
    talking_gate: TalkingMovementGate,
    outbound: mpsc::Sender<Vec<f32>>,
) -> Result<Capture> {
    let resolved = resolve_device(device_name)?;
    let native_rate = resolved.native_rate;
    let channels = resolved.channels;

    let (mut producer, consumer) = audio_ring_buffer(None);

    let stream = resolved
        .device
        .build_input_stream(
            &resolved.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    debug!(dropped = mono.len() - written, "Mic ring buffer full");
                }
            },
            move |err| error!("Audio input stream error: {err}"),
            None,
        )
        .context("build input stream")?;

    stream.play().context("start input stream")?;

    let input_volume_bits = Arc::new(AtomicU32::new(0));
    let drain_task = spawn_drain_task(
        cfg,
        consumer,
        native_rate,
        model_rate,
        talking_gate,
        outbound,
        input_volume_bits.clone(),
    );

    info!("Microphone capture started");

    Ok(Capture {
        stream: SendStream(stream),
        native_rate,
        drain_task,
        input_volume_bits,
    })
}

fn spawn_drain_task(
    cfg: &Config,
    mut consumer: AudioConsumer,
    native_rate: u32,
    model_rate: u32,
    talking_gate: TalkingMovementGate,
    outbound: mpsc::Sender<Vec<f32>>,
    input_volume_bits: Arc<AtomicU32>,
) -> tokio::task::JoinHandle<()> {
    let silence_threshold = cfg.silence_threshold;
    let speech_tail = cfg.speech_tail_duration;
    let loud_sound_threshold = cfg.loud_sound_threshold;
    let barge_in_threshold = cfg.barge_in_volume_threshold;
    let enable_barge_in = cfg.enable_barge_in;
    let chunk_samples = cfg.audio_chunk_size;
    let _ = loud_sound_threshold; // classified by SensorMonitor/AwarenessLoop, not here

    tokio::spawn(async move {
        let mut gate = SilenceGate::new(silence_threshold, speech_tail);
        let mut read_buf = vec![0.0f32; chunk_samples.max(256)];
        let mut dropped_since_log = 0u32;

        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;

            let n = consumer.pop_slice(&mut read_buf);
            if n == 0 {
                continue;
            }
            let chunk = &read_buf[..n];
            let volume = rms_volume(chunk);
            input_volume_bits.store(volume.to_bits(), Ordering::Relaxed);
            let now = Instant::now();

            let admitted = if talking_gate.is_speaking() {
                if !enable_barge_in {
                    false
                } else {
                    volume >= barge_in_threshold
                }
            } else {
                let (admit, _edge) = gate.admit(volume, now);
                admit
            };

            if !admitted {
                continue;
            }

            let resampled = match resample_fft(chunk, native_rate, model_rate) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Resample failed, dropping chunk: {e}");
                    continue;
                }
            };

            match outbound.try_send(resampled) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped_since_log += 1;
                    if dropped_since_log % 100 == 0 {
                        warn!(dropped = dropped_since_log, "Outbound audio queue full, dropping chunks");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_devices_does_not_panic() {
        let _ = list_devices();
    }
}
