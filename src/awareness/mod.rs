//! `AwarenessLoop`: fuses sensor-change events, face presence, and an idle
//! timer into unsolicited stimuli for the remote model, per the suppression
//! gate and debounce policy of the component design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audio::AudioPipeline;
use crate::config::Config;
use crate::model::session::ModelSession;
use crate::sensors::SpeechActivity;
use crate::state::{Event, StateStore};
use crate::vision::Vision;

/// Bounded wait for the photo-triggered response to settle before the idle
/// reminder's own awareness prompt fires (Open Question #2, SPEC_FULL.md §9).
const PHOTO_RESPONSE_SETTLE: Duration = Duration::from_millis(2000);

/// Window over which same-tick stimulus fragments are concatenated before
/// being sent as one awareness goal update.
const COALESCE_WINDOW: Duration = Duration::from_millis(100);

pub struct AwarenessLoop {
    cfg: Arc<Config>,
    state: Arc<StateStore>,
    session: Arc<ModelSession>,
    audio: Arc<AudioPipeline>,
    vision: Arc<dyn Vision>,
    speech_activity: Arc<dyn SpeechActivity>,
    enabled: Arc<AtomicBool>,
}

impl AwarenessLoop {
    pub fn new(
        cfg: Arc<Config>,
        state: Arc<StateStore>,
        session: Arc<ModelSession>,
        audio: Arc<AudioPipeline>,
        vision: Arc<dyn Vision>,
        speech_activity: Arc<dyn SpeechActivity>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            state,
            session,
            audio,
            vision,
            speech_activity,
            enabled: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Shared enable/disable switch for the orchestrator's
    /// `set_awareness_enabled` external operation.
    pub fn enabled_switch(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// The composite predicate that blocks awareness from interrupting: any
    /// in-flight speech, listening, acting, or sound-playing activity.
    async fn is_suppressed(&self) -> bool {
        if self.speech_activity.is_active() {
            return true;
        }
        let snapshot = self.state.snapshot().await;
        snapshot.is_taking_action || snapshot.is_playing_sound
    }

    /// Turn one bus event into a stimulus fragment, or `None` if it doesn't
    /// warrant one (e.g. a face-lost edge, or a quiet sound already handled
    /// out of band).
    async fn stimulus_for_event(&self, event: &Event) -> Option<String> {
        match event.kind.as_str() {
            "petting_change" => {
                let gesture: Option<crate::state::PettingGesture> =
                    serde_json::from_value(event.payload.get("gesture")?.clone()).ok()?;
                let mut text = "You are being petted! You must say and do something in reaction.".to_string();
                if let Some(g) = gesture {
                    text.push(' ');
                    text.push_str(g.reaction_clause());
                }
                Some(text)
            }
            "sound_direction_change" => {
                let direction = event.payload.get("direction")?.as_str()?;
                let volume = self.audio.current_input_volume();
                if volume > self.cfg.loud_sound_threshold {
                    Some(format!("A loud sound came from your {direction}. Look and respond."))
                } else {
                    if let Err(e) = self
                        .session
                        .send_text_message(&format!("A quiet sound came from your {direction}."))
                        .await
                    {
                        warn!("AwarenessLoop: failed to send quiet-sound notice: {e}");
                    }
                    None
                }
            }
            "face_presence_change" => {
                let present = event.payload.get("present")?.as_bool()?;
                if !present {
                    return None;
                }
                let pose_description = self.state.snapshot().await.head_pose.direction_label();
                Some(format!("A face is detected! You are looking {pose_description}. React."))
            }
            "orientation_change" => {
                let orientation = event.payload.get("orientation")?.as_str()?;
                Some(format!("{orientation}. React."))
            }
            _ => None,
        }
    }

    /// Fire the idle reminder: an inline photo capture+response, then,
    /// serialized after a bounded settle wait, an awareness prompt carrying
    /// the persona's default motivation.
    async fn fire_idle_reminder(&self) {
        let path = self.cfg.data_dir.join("idle_reminder.jpg");
        let path_str = path.to_string_lossy().to_string();

        match self.vision.capture_image(&path_str).await {
            Ok(captured_path) => {
                if let Err(e) = self
                    .session
                    .send_user_image("Take a look around and see what's interesting.", &captured_path)
                    .await
                {
                    warn!("AwarenessLoop: idle reminder photo request failed: {e}");
                }
                tokio::time::sleep(PHOTO_RESPONSE_SETTLE).await;
            }
            Err(e) => warn!("AwarenessLoop: idle reminder camera capture failed: {e}"),
        }

        let motivation = self.session.active_persona_default_motivation().await;
        self.state.mutate(|s| s.goal = motivation).await;
        if let Err(e) = self.session.send_awareness().await {
            warn!("AwarenessLoop: idle reminder awareness request failed: {e}");
        }
    }

    /// Run the loop for the lifetime of the orchestrator: listens to the bus
    /// for sensor-change events (coalescing same-tick fragments, debounced
    /// by `awareness_debounce` between forced firings), and fires the idle
    /// reminder on `awareness_reminder_interval` inactivity.
    pub async fn run(self: Arc<Self>) {
        let mut events = self.state.subscribe_events();
        let mut idle_ticker = tokio::time::interval(self.cfg.awareness_reminder_interval);
        idle_ticker.reset();
        let mut pending: Vec<String> = Vec::new();
        let mut last_activity_reset = tokio::time::Instant::now();
        let mut last_fired: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                recv = events.recv() => {
                    let event = match recv {
                        Ok(e) => e,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    };

                    if !self.enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    if self.is_suppressed().await {
                        idle_ticker.reset();
                        last_activity_reset = tokio::time::Instant::now();
                        continue;
                    }

                    if let Some(fragment) = self.stimulus_for_event(&event).await {
                        let debounced = last_fired
                            .map(|t| t.elapsed() < self.cfg.awareness_debounce)
                            .unwrap_or(false);
                        if debounced {
                            idle_ticker.reset();
                            last_activity_reset = tokio::time::Instant::now();
                            continue;
                        }

                        pending.push(fragment);
                        let deadline = tokio::time::Instant::now() + COALESCE_WINDOW;
                        loop {
                            tokio::select! {
                                recv = events.recv() => {
                                    let Ok(more) = recv else { break };
                                    if let Some(fragment) = self.stimulus_for_event(&more).await {
                                        pending.push(fragment);
                                    }
                                }
                                _ = tokio::time::sleep_until(deadline) => break,
                            }
                        }

                        let message = pending.join(" ");
                        pending.clear();
                        self.state.mutate(|s| s.goal = message.clone()).await;
                        if let Err(e) = self.session.send_awareness().await {
                            warn!("AwarenessLoop: send_awareness failed: {e}");
                        }
                        last_fired = Some(tokio::time::Instant::now());
                    }
                    idle_ticker.reset();
                    last_activity_reset = tokio::time::Instant::now();
                }
                _ = idle_ticker.tick() => {
                    if !self.enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    if self.is_suppressed().await {
                        continue;
                    }
                    if self.state.snapshot().await.active_persona.is_empty() {
                        continue;
                    }
                    if last_activity_reset.elapsed() < self.cfg.awareness_reminder_interval {
                        continue;
                    }
                    info!("AwarenessLoop: idle reminder firing");
                    self.fire_idle_reminder().await;
                    last_activity_reset = tokio::time::Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioPipeline;
    use crate::hardware::MockHardwareDog;
    use crate::head::HeadController;
    use crate::model::events::ToolCall;
    use crate::persona::PersonaRegistry;
    use crate::vision::MockVision;
    use tokio::sync::mpsc;

    struct AlwaysIdle;
    impl SpeechActivity for AlwaysIdle {
        fn is_active(&self) -> bool {
            false
        }
    }

    async fn test_loop() -> Arc<AwarenessLoop> {
        let cfg = Arc::new(Config::from_env());
        let hardware: Arc<dyn crate::hardware::HardwareDog> = Arc::new(MockHardwareDog::new());
        let vision: Arc<dyn Vision> = Arc::new(MockVision::new(640, 480));
        let state = Arc::new(StateStore::new("default"));
        let audio = Arc::new(AudioPipeline::new(&cfg).expect("audio pipeline in test env"));
        let head = HeadController::new(cfg.clone(), hardware.clone(), state.clone(), audio.clone());
        let (tool_tx, _tool_rx) = mpsc::channel::<ToolCall>(8);
        let registry = PersonaRegistry::with_defaults(vec![crate::persona::default_persona("default")]);
        let session = ModelSession::new(cfg.clone(), audio.clone(), head, state.clone(), registry, vec![], tool_tx)
            .await
            .expect("model session construction");
        let activity: Arc<dyn SpeechActivity> = Arc::new(AlwaysIdle);
        AwarenessLoop::new(cfg, state, session, audio, vision, activity)
    }

    #[tokio::test]
    async fn petting_event_includes_reaction_clause() {
        let awareness = test_loop().await;
        let event = Event::new(
            "petting_change",
            serde_json::json!({ "gesture": "ls" }),
        );
        let stimulus = awareness.stimulus_for_event(&event).await.unwrap();
        assert!(stimulus.contains("being petted"));
        assert!(stimulus.contains("front-to-back"));
    }

    #[tokio::test]
    async fn face_lost_edge_produces_no_stimulus() {
        let awareness = test_loop().await;
        let event = Event::new("face_presence_change", serde_json::json!({ "present": false }));
        assert!(awareness.stimulus_for_event(&event).await.is_none());
    }

    #[tokio::test]
    async fn quiet_sound_sends_notice_without_stimulus() {
        let awareness = test_loop().await;
        let event = Event::new("sound_direction_change", serde_json::json!({ "direction": "left" }));
        assert!(awareness.stimulus_for_event(&event).await.is_none());
    }

    #[tokio::test]
    async fn unknown_event_kind_is_ignored() {
        let awareness = test_loop().await;
        let event = Event::new("unrelated.tick", serde_json::json!({}));
        assert!(awareness.stimulus_for_event(&event).await.is_none());
    }
}
