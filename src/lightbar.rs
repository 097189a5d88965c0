//! Lightbar status reflection (supplement, SPEC_FULL.md §4.12): maps
//! `LightMode` to a `rgb_set_mode` push whenever the mode changes on a
//! `StateStore` broadcast tick. The one "1-bit status panel" surface §7
//! keeps: breath=idle, boom=active, bark-pattern=speaking.
//!
//! Grounded in `lightbar_controller.py`, trimmed to the talking/active/idle
//! indicator.

use std::sync::Arc;

use tracing::warn;

use crate::hardware::{HardwareDog, LightStyle, RgbColor};
use crate::state::{LightMode, StateStore};

fn style_for(mode: LightMode) -> (LightStyle, RgbColor, f32, f32) {
    match mode {
        LightMode::Idle => (LightStyle::Breath, RgbColor(0, 80, 160), 0.5, 0.4),
        LightMode::Active => (LightStyle::Boom, RgbColor(255, 180, 0), 1.5, 0.8),
        LightMode::Speaking => (LightStyle::BarkPattern, RgbColor(0, 220, 120), 2.0, 0.9),
        LightMode::Error => (LightStyle::Solid, RgbColor(220, 0, 0), 0.0, 1.0),
    }
}

/// Reflect `RobotState.light_mode` onto the lightbar for the lifetime of the
/// orchestrator. Pushes only on change, not on every heartbeat tick.
pub async fn run(hardware: Arc<dyn HardwareDog>, state: Arc<StateStore>) {
    let mut rx = state.subscribe();
    let mut last_mode = None;

    loop {
        let snapshot = match rx.recv().await {
            Ok(s) => s,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        if Some(snapshot.light_mode) == last_mode {
            continue;
        }
        last_mode = Some(snapshot.light_mode);

        let (style, color, breaths_per_second, brightness) = style_for(snapshot.light_mode);
        if let Err(e) = hardware.rgb_set_mode(style, color, breaths_per_second, brightness).await {
            warn!("lightbar: rgb_set_mode failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_uses_breath_style() {
        let (style, _, _, _) = style_for(LightMode::Idle);
        assert_eq!(style, LightStyle::Breath);
    }

    #[test]
    fn speaking_uses_bark_pattern() {
        let (style, _, _, _) = style_for(LightMode::Speaking);
        assert_eq!(style, LightStyle::BarkPattern);
    }

    #[test]
    fn active_uses_boom_style() {
        let (style, _, _, _) = style_for(LightMode::Active);
        assert_eq!(style, LightStyle::Boom);
    }
}
