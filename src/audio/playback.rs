//! Speaker playback.
//!
//! Inbound PCM chunks (at model rate) are resampled to the speaker rate,
//! scaled by `RobotState.volume`, and appended to a persistent `rodio::Sink`.
//! While the sink has outstanding audio the talking-movement gate is held
//! open, which drives both barge-in gating on the capture side and the
//! `HeadController` talk overlay. An exponential moving average of each
//! chunk's RMS is exposed as `current_speech_amplitude` for the talk
//! overlay's amplitude gain and for lightbar modulation.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{info, warn};

use super::gate::TalkingMovementGate;
use super::resample::{f32_to_i16, resample_fft, rms_volume};

pub struct Playback {
    sink: Arc<Sink>,
    // Kept alive for the lifetime of the playback device; never read after
    // construction, but dropping it tears down the output stream.
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    talking_gate: TalkingMovementGate,
    speaker_rate: u32,
    pending_frames: Arc<AtomicUsize>,
    amplitude_bits: Arc<AtomicU32>,
    amplitude_ema_alpha: f32,
    disabled: bool,
}

impl Playback {
    /// Open the default (or named) output device. `disabled` mirrors
    /// `DISABLE_PIDOG_SPEAKER`: the pipeline still runs but every enqueue is
    /// a no-op, useful for headless test environments.
    pub fn new(speaker_rate: u32, amplitude_ema_alpha: f32, talking_gate: TalkingMovementGate, disabled: bool) -> Result<Self> {
        if disabled {
            // rodio still needs a stream/handle pair; open the default one
            // but never append audio to the sink.
            let (stream, handle) = OutputStream::try_default().context("open output stream")?;
            let sink = Sink::try_new(&handle).context("create sink")?;
            return Ok(Self {
                sink: Arc::new(sink),
                _stream: stream,
                _stream_handle: handle,
                talking_gate,
                speaker_rate,
                pending_frames: Arc::new(AtomicUsize::new(0)),
                amplitude_bits: Arc::new(AtomicU32::new(0)),
                amplitude_ema_alpha,
                disabled: true,
            });
        }

        let (stream, handle) = OutputStream::try_default().context("open output stream")?;
        let sink = Sink::try_new(&handle).context("create sink")?;
        info!("Speaker playback initialized");

        Ok(Self {
            sink: Arc::new(sink),
            _stream: stream,
            _stream_handle: handle,
            talking_gate,
            speaker_rate,
            pending_frames: Arc::new(AtomicUsize::new(0)),
            amplitude_bits: Arc::new(AtomicU32::new(0)),
            amplitude_ema_alpha,
            disabled: false,
        })
    }

    /// Enqueue a chunk of model-rate PCM for playback, resampling and
    /// volume-scaling it first.
    pub fn enqueue(&self, samples_model_rate: &[f32], model_rate: u32, volume: f32) {
        if self.disabled || samples_model_rate.is_empty() {
            return;
        }

        let resampled = match resample_fft(samples_model_rate, model_rate, self.speaker_rate) {
            Ok(r) => r,
            Err(e) => {
                warn!("Playback resample failed, dropping chunk: {e}");
                return;
            }
        };

        self.update_amplitude(&resampled);

        let scaled: Vec<f32> = resampled.iter().map(|s| s * volume).collect();
        let pcm16 = f32_to_i16(&scaled);
        let frame_count = pcm16.len();

        self.talking_gate.set_speaking(true);
        self.pending_frames.fetch_add(frame_count, Ordering::SeqCst);

        let source = rodio::buffer::SamplesBuffer::new(1, self.speaker_rate, pcm16);
        self.sink.append(source);

        let duration = Duration::from_secs_f64(frame_count as f64 / self.speaker_rate as f64);
        let pending = self.pending_frames.clone();
        let gate = self.talking_gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let remaining = pending.fetch_sub(frame_count, Ordering::SeqCst) - frame_count;
            if remaining == 0 {
                gate.set_speaking(false);
            }
        });
    }

    /// Normalized (0..1-ish) exponential moving average of recent playback
    /// RMS, used to modulate the head talk overlay and lightbar.
    pub fn current_speech_amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude_bits.load(Ordering::Relaxed))
    }

    fn update_amplitude(&self, samples: &[f32]) {
        let instantaneous = (rms_volume(samples) / 100.0).clamp(0.0, 1.0);
        let prev = self.current_speech_amplitude();
        let next = self.amplitude_ema_alpha * instantaneous + (1.0 - self.amplitude_ema_alpha) * prev;
        self.amplitude_bits.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Clear the outbound queue, reset the talking-movement flag, and log
    /// why. Invoked on remote barge-in or before a new awareness stimulus.
    pub fn interrupt_playback(&self, reason: &str) {
        self.sink.stop();
        self.pending_frames.store(0, Ordering::SeqCst);
        self.talking_gate.set_speaking(false);
        self.amplitude_bits.store(0, Ordering::Relaxed);
        info!(reason, "Playback interrupted");
    }

    pub fn is_idle(&self) -> bool {
        self.pending_frames.load(Ordering::SeqCst) == 0
    }
}

// SAFETY: `OutputStream` is marked !Send/!Sync due to a PhantomData<*mut ()>
// in cpal's platform abstraction, but the underlying handles are only ever
// touched through `Sink`'s own synchronization; `Playback` never accesses
// `_stream`/`_stream_handle` fields after construction.
unsafe impl Send for Playback {}
unsafe impl Sync for Playback {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_starts_at_zero() {
        let gate = TalkingMovementGate::new();
        // Constructing a real Playback requires an audio device; exercise
        // the EMA math directly instead.
        let alpha = 0.15f32;
        let mut ema = 0.0f32;
        for sample_rms in [0.0, 0.5, 0.8] {
            ema = alpha * sample_rms + (1.0 - alpha) * ema;
        }
        assert!(ema > 0.0 && ema < 0.8);
        let _ = gate;
    }
}
