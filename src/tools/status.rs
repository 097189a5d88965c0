//! `get_system_status` composition (supplement, SPEC_FULL.md §4.11):
//! `RobotState` fields, host battery/distance reads, process uptime, and the
//! active persona name folded into one human-readable block.
//!
//! Grounded in `status_reporter.py`.

use std::time::Instant;

use sysinfo::System;

use crate::hardware::HardwareDog;
use crate::state::RobotState;

/// Build the multi-line status report returned by the `get_system_status`
/// tool and used for the orchestrator's own diagnostics.
pub async fn build_status(hardware: &dyn HardwareDog, state: &RobotState, started_at: Instant) -> String {
    let battery = match hardware.get_battery_voltage().await {
        Ok(v) => format!("{v:.2} V"),
        Err(_) => "unknown".to_string(),
    };
    let distance = match hardware.distance().await {
        Ok(d) => format!("{d:.1} cm"),
        Err(_) => "unknown".to_string(),
    };
    let uptime = started_at.elapsed().as_secs();

    let mut sys = System::new();
    sys.refresh_memory();
    let mem_used_mb = sys.used_memory() / (1024 * 1024);
    let mem_total_mb = sys.total_memory() / (1024 * 1024);

    format!(
        "Persona: {persona}\n\
         Posture: {posture:?}\n\
         Goal: {goal}\n\
         Volume: {volume:.1}\n\
         Face present: {face}\n\
         Being petted: {petted}\n\
         Last sound direction: {sound}\n\
         Last orientation: {orientation}\n\
         Battery: {battery}\n\
         Distance: {distance}\n\
         Host memory: {mem_used_mb} MB / {mem_total_mb} MB\n\
         Uptime: {uptime}s",
        persona = state.active_persona,
        posture = state.posture,
        goal = state.goal,
        volume = state.volume,
        face = state.face_present,
        petted = state.is_being_petted,
        sound = state.last_sound_direction.as_deref().unwrap_or("none"),
        orientation = state.last_orientation_desc.as_deref().unwrap_or("unknown"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardwareDog;
    use crate::state::StateStore;

    #[tokio::test]
    async fn build_status_includes_persona_and_goal() {
        let hardware = MockHardwareDog::new();
        let store = StateStore::new("default");
        store.mutate(|s| s.goal = "explore".to_string()).await;
        let snapshot = store.snapshot().await;
        let report = build_status(&hardware, &snapshot, Instant::now()).await;
        assert!(report.contains("Persona: default"));
        assert!(report.contains("Goal: explore"));
        assert!(report.contains("Battery:"));
    }
}
