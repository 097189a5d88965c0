//! Sample-rate conversion and PCM16/f32 conversions shared by the capture
//! and playback paths.
//!
//! High-quality resampling uses `rubato`'s FFT-based resampler (the
//! "kaiser_fast"-equivalent mode from the component design); a linear mode
//! is kept for low-CPU targets.

use anyhow::{Context, Result};
use rubato::{FftFixedInOut, Resampler};

/// Resample mono f32 PCM using an FFT-domain resampler. Handles the tail via
/// zero-padding with proportional output trimming.
pub fn resample_fft(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let mut resampler = FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, chunk_size, 1)
        .context("resampler init")?;

    let mut output = Vec::with_capacity(
        (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize + chunk_size,
    );

    let input_frames = resampler.input_frames_next();
    let mut pos = 0;

    while pos + input_frames <= samples.len() {
        let chunk = &samples[pos..pos + input_frames];
        let result = resampler.process(&[chunk], None).context("resample chunk")?;
        output.extend_from_slice(&result[0]);
        pos += input_frames;
    }

    if pos < samples.len() {
        let remaining = &samples[pos..];
        let mut padded = vec![0.0f32; input_frames];
        padded[..remaining.len()].copy_from_slice(remaining);
        let result = resampler.process(&[&padded], None).context("resample tail")?;
        let take = (remaining.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
        output.extend_from_slice(&result[0][..take.min(result[0].len())]);
    }

    Ok(output)
}

/// Cheap linear-interpolation resampler, used under `low_cpu` mode.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = samples.get(idx0).copied().unwrap_or(0.0);
        let s1 = samples.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Convert f32 PCM samples [-1.0, 1.0] to i16 PCM, clamping out-of-range
/// values to prevent wrapping artifacts.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Convert i16 PCM samples to f32 in [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// RMS (root-mean-square) energy of a chunk, scaled to a 0..100-ish range
/// matching the component design's threshold constants
/// (`SILENCE_THRESHOLD`, `LOUD_SOUND_THRESHOLD`, `BARGE_IN_VOLUME_THRESHOLD`).
pub fn rms_volume(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt() * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_to_i16_clamps_out_of_range() {
        let out = f32_to_i16(&[-2.0, 2.0, 0.0]);
        assert_eq!(out[0], -32767);
        assert_eq!(out[1], 32767);
        assert_eq!(out[2], 0);
    }

    #[test]
    fn i16_to_f32_round_trip_is_approximate() {
        let i16s = vec![0i16, 16384, -16384];
        let f32s = i16_to_f32(&i16s);
        assert!((f32s[1] - 0.5).abs() < 0.01);
        assert!((f32s[2] + 0.5).abs() < 0.01);
    }

    #[test]
    fn rms_volume_of_silence_is_zero() {
        assert_eq!(rms_volume(&[0.0; 100]), 0.0);
    }

    #[test]
    fn resample_same_rate_is_noop() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_fft(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn resample_24k_to_16k_preserves_peak_frequency() {
        let num_samples = 24000;
        let input: Vec<f32> = (0..num_samples)
            .map(|i| (i as f32 / 24000.0 * 440.0 * 2.0 * std::f32::consts::PI).sin())
            .collect();
        let output = resample_fft(&input, 24000, 16000).unwrap();
        let expected_len = 16000;
        assert!((output.len() as i64 - expected_len as i64).unsigned_abs() < 100);
        let max_amp: f32 = output.iter().map(|s| s.abs()).fold(0.0, f32::max);
        assert!(max_amp > 0.5);
    }

    #[test]
    fn to_mono_averages_channels() {
        let stereo = vec![1.0, -1.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.0, 0.5]);
    }
}
