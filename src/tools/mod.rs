//! `ToolDispatcher`: receives `ToolCall`s surfaced from `ModelSession` and
//! executes the nine tool handlers named in `session::build_tool_specs`.
//!
//! Every handler returns a string (success or failure alike) — errors are
//! always converted to text rather than propagated to the model-facing
//! boundary, per the component design's "errors never surface as protocol
//! failures" rule.

pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::actions::ActionLibrary;
use crate::config::Config;
use crate::hardware::HardwareDog;
use crate::model::events::ToolCall;
use crate::model::session::ModelSession;
use crate::persona::generator::generate_persona;
use crate::state::StateStore;
use crate::vision::Vision;

pub struct ToolDispatcher {
    cfg: Arc<Config>,
    hardware: Arc<dyn HardwareDog>,
    vision: Arc<dyn Vision>,
    actions: Arc<ActionLibrary>,
    state: Arc<StateStore>,
    session: tokio::sync::OnceCell<Arc<ModelSession>>,
    started_at: Instant,
    shutdown_requested: Arc<AtomicBool>,
}

impl ToolDispatcher {
    pub fn new(
        cfg: Arc<Config>,
        hardware: Arc<dyn HardwareDog>,
        vision: Arc<dyn Vision>,
        actions: Arc<ActionLibrary>,
        state: Arc<StateStore>,
        shutdown_requested: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            hardware,
            vision,
            actions,
            state,
            session: tokio::sync::OnceCell::new(),
            started_at: Instant::now(),
            shutdown_requested,
        })
    }

    /// Late-bind the session handle; `ModelSession` and `ToolDispatcher` are
    /// constructed in a cycle (the session needs a tool sender, the
    /// dispatcher needs a session to reply through), so the session is
    /// attached once after both exist.
    pub fn bind_session(&self, session: Arc<ModelSession>) {
        let _ = self.session.set(session);
    }

    /// Drain tool calls for the lifetime of the orchestrator.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ToolCall>) {
        while let Some(call) = rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move { this.handle_call(call).await });
        }
    }

    async fn handle_call(&self, call: ToolCall) {
        let Some(session) = self.session.get() else {
            warn!("ToolDispatcher: no session bound, dropping call to {}", call.name);
            return;
        };

        let result = self.dispatch(&call).await;
        if let Err(e) = session.send_tool_result(&call, &result).await {
            warn!("ToolDispatcher: failed to send result for {}: {e}", call.name);
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        match call.name.as_str() {
            "perform_action" => self.perform_action(call).await,
            "look_and_see" => self.look_and_see(call).await,
            "get_system_status" => self.get_system_status().await,
            "get_awareness_status" => self.get_awareness_status().await,
            "set_goal" => self.set_goal(call).await,
            "set_volume" => self.set_volume(call).await,
            "switch_persona" => self.switch_persona(call).await,
            "create_new_persona" => self.create_new_persona(call).await,
            "shut_down" => self.shut_down().await,
            other => format!("Unknown tool: {other}"),
        }
    }

    async fn perform_action(&self, call: &ToolCall) -> String {
        let Some(action_name) = call.arguments.get("action_name").and_then(|v| v.as_str()) else {
            return "Missing required argument: action_name".to_string();
        };
        self.state.mutate(|s| s.is_taking_action = true).await;
        let result = self.actions.perform(action_name).await;
        self.state.mutate(|s| s.is_taking_action = false).await;
        match result {
            Ok(()) => format!("Performed: {action_name}"),
            Err(e) => format!("Action failed: {e}"),
        }
    }

    async fn look_and_see(&self, call: &ToolCall) -> String {
        let question = call.arguments.get("question").and_then(|v| v.as_str()).unwrap_or("What do you see?");
        let path = self.cfg.data_dir.join("look_and_see.jpg");
        let path_str = path.to_string_lossy().to_string();

        match self.vision.capture_image(&path_str).await {
            Ok(captured_path) => {
                let Some(session) = self.session.get() else {
                    return "Cannot answer: session not ready".to_string();
                };
                match session.send_user_image(question, &captured_path).await {
                    Ok(msg) => msg,
                    Err(e) => format!("Failed to send captured image: {e}"),
                }
            }
            Err(e) => format!("Camera capture failed: {e}"),
        }
    }

    async fn get_system_status(&self) -> String {
        let snapshot = self.state.snapshot().await;
        status::build_status(self.hardware.as_ref(), &snapshot, self.started_at).await
    }

    async fn get_awareness_status(&self) -> String {
        let snapshot = self.state.snapshot().await;
        if snapshot.goal.is_empty() {
            "No specific goal set right now.".to_string()
        } else {
            snapshot.goal
        }
    }

    async fn set_goal(&self, call: &ToolCall) -> String {
        let Some(goal) = call.arguments.get("goal").and_then(|v| v.as_str()) else {
            return "Missing required argument: goal".to_string();
        };
        self.state.mutate(|s| s.goal = goal.to_string()).await;
        format!("Goal set: {goal}")
    }

    async fn set_volume(&self, call: &ToolCall) -> String {
        let Some(level) = call.arguments.get("volume_level").and_then(|v| v.as_f64()) else {
            return "Missing required argument: volume_level".to_string();
        };
        let clamped = (level as f32).clamp(0.0, 3.0);
        self.state.mutate(|s| s.volume = clamped).await;
        format!("Volume set to {clamped}")
    }

    async fn switch_persona(&self, call: &ToolCall) -> String {
        let Some(persona_name) = call.arguments.get("persona_name").and_then(|v| v.as_str()) else {
            return "Missing required argument: persona_name".to_string();
        };

        let Some(session) = self.session.get() else {
            return "Cannot switch persona: session not ready".to_string();
        };
        if !session.has_persona(persona_name).await {
            return format!("No persona named '{persona_name}' is registered");
        }
        match session.reconnect(persona_name, None).await {
            Ok(()) => format!("Switched to persona: {persona_name}"),
            Err(e) => format!("Persona switch failed: {e}"),
        }
    }

    async fn create_new_persona(&self, call: &ToolCall) -> String {
        let Some(description) = call.arguments.get("persona_description").and_then(|v| v.as_str()) else {
            return "Missing required argument: persona_description".to_string();
        };

        let persona = match generate_persona(&self.cfg, description).await {
            Ok(p) => p,
            Err(e) => return format!("Persona generation failed: {e}"),
        };

        let Some(session) = self.session.get() else {
            return "Cannot activate generated persona: session not ready".to_string();
        };
        let name = persona.name.clone();
        match session.reconnect(&name, Some(persona)).await {
            Ok(()) => format!("Created and switched to new persona: {name}"),
            Err(e) => format!("Generated persona '{name}' but failed to activate it: {e}"),
        }
    }

    async fn shut_down(&self) -> String {
        info!("ToolDispatcher: shut_down tool invoked by model");
        self.shutdown_requested.store(true, Ordering::SeqCst);
        "Shutting down.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioPipeline;
    use crate::hardware::MockHardwareDog;
    use crate::head::HeadController;
    use crate::persona::PersonaRegistry;
    use crate::vision::MockVision;
    use tokio::sync::mpsc;

    async fn test_dispatcher() -> Arc<ToolDispatcher> {
        let cfg = Arc::new(Config::from_env());
        let hardware: Arc<dyn HardwareDog> = Arc::new(MockHardwareDog::new());
        let vision: Arc<dyn Vision> = Arc::new(MockVision::new(640, 480));
        let state = Arc::new(StateStore::new("default"));
        let audio = Arc::new(AudioPipeline::new(&cfg).expect("audio pipeline in test env"));
        let head = HeadController::new(cfg.clone(), hardware.clone(), state.clone(), audio.clone());
        let actions = ActionLibrary::new(cfg.clone(), hardware.clone(), head.clone(), state.clone());
        let registry = PersonaRegistry::with_defaults(vec![crate::persona::default_persona("default")]);
        let (tool_tx, _tool_rx) = mpsc::channel(8);
        let session = ModelSession::new(cfg.clone(), audio, head, state.clone(), registry, vec![], tool_tx)
            .await
            .expect("model session construction");
        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = ToolDispatcher::new(cfg, hardware, vision, actions, state, shutdown);
        dispatcher.bind_session(session);
        dispatcher
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall { call_id: "call_1".to_string(), name: name.to_string(), arguments: args }
    }

    #[tokio::test]
    async fn set_goal_updates_state() {
        let dispatcher = test_dispatcher().await;
        let result = dispatcher.dispatch(&call("set_goal", serde_json::json!({ "goal": "explore" }))).await;
        assert!(result.contains("explore"));
        assert_eq!(dispatcher.state.snapshot().await.goal, "explore");
    }

    #[tokio::test]
    async fn set_volume_clamps_to_range() {
        let dispatcher = test_dispatcher().await;
        let result = dispatcher.dispatch(&call("set_volume", serde_json::json!({ "volume_level": 10.0 }))).await;
        assert!(result.contains('3'));
        assert_eq!(dispatcher.state.snapshot().await.volume, 3.0);
    }

    #[tokio::test]
    async fn unknown_tool_reports_as_such() {
        let dispatcher = test_dispatcher().await;
        let result = dispatcher.dispatch(&call("not_a_tool", serde_json::json!({}))).await;
        assert!(result.starts_with("Unknown tool"));
    }

    #[tokio::test]
    async fn shut_down_sets_flag() {
        let dispatcher = test_dispatcher().await;
        let result = dispatcher.dispatch(&call("shut_down", serde_json::json!({}))).await;
        assert!(result.contains("Shutting down"));
        assert!(dispatcher.shutdown_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn switch_persona_rejects_unknown_name() {
        let dispatcher = test_dispatcher().await;
        let result = dispatcher
            .dispatch(&call("switch_persona", serde_json::json!({ "persona_name": "nope" })))
            .await;
        assert!(result.contains("No persona named"));
    }
}
