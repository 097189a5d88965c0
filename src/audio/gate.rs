//! Capture gating: the talking-movement flag and the silence/speech-tail
//! decision described in the `AudioPipeline` component design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag set while the robot is audibly speaking (a non-empty
/// playback buffer). Read by the capture path to decide on barge-in, and by
/// `HeadController` to start/stop the talk overlay.
#[derive(Debug, Clone)]
pub struct TalkingMovementGate {
    speaking: Arc<AtomicBool>,
}

impl TalkingMovementGate {
    pub fn new() -> Self {
        Self {
            speaking: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

impl Default for TalkingMovementGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the smart-silence gating decision for the capture path: forward a
/// chunk if its RMS volume is above `silence_threshold`, or if it is within
/// `speech_tail_duration` of the last speech-level chunk.
pub struct SilenceGate {
    silence_threshold: f32,
    speech_tail: Duration,
    last_speech_at: Option<Instant>,
    speech_active: bool,
}

impl SilenceGate {
    pub fn new(silence_threshold: f32, speech_tail: Duration) -> Self {
        Self {
            silence_threshold,
            speech_tail,
            last_speech_at: None,
            speech_active: false,
        }
    }

    /// Decide whether `volume` (an RMS reading) should be forwarded
    /// upstream, and update internal edge-tracking state. Returns the
    /// decision plus `Some(true/false)` if a speech_active edge fired.
    pub fn admit(&mut self, volume: f32, now: Instant) -> (bool, Option<bool>) {
        let is_speech_level = volume >= self.silence_threshold;
        if is_speech_level {
            self.last_speech_at = Some(now);
        }

        let within_tail = self
            .last_speech_at
            .map(|t| now.duration_since(t) <= self.speech_tail)
            .unwrap_or(false);

        let admit = is_speech_level || within_tail;

        let mut edge = None;
        if admit != self.speech_active {
            self.speech_active = admit;
            edge = Some(admit);
        }

        (admit, edge)
    }

    pub fn speech_active(&self) -> bool {
        self.speech_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talking_movement_gate_clone_shares_state() {
        let gate1 = TalkingMovementGate::new();
        let gate2 = gate1.clone();
        gate1.set_speaking(true);
        assert!(gate2.is_speaking());
    }

    #[test]
    fn silence_gate_admits_loud_chunk() {
        let mut gate = SilenceGate::new(25.0, Duration::from_millis(500));
        let (admit, edge) = gate.admit(30.0, Instant::now());
        assert!(admit);
        assert_eq!(edge, Some(true));
    }

    #[test]
    fn silence_gate_admits_quiet_chunk_within_tail() {
        let mut gate = SilenceGate::new(25.0, Duration::from_millis(500));
        let t0 = Instant::now();
        gate.admit(30.0, t0);
        let (admit, edge) = gate.admit(5.0, t0 + Duration::from_millis(200));
        assert!(admit);
        assert_eq!(edge, None);
    }

    #[test]
    fn silence_gate_drops_quiet_chunk_after_tail_expires() {
        let mut gate = SilenceGate::new(25.0, Duration::from_millis(500));
        let t0 = Instant::now();
        gate.admit(30.0, t0);
        let (admit, edge) = gate.admit(5.0, t0 + Duration::from_millis(800));
        assert!(!admit);
        assert_eq!(edge, Some(false));
    }
}
