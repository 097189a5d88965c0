//! `Orchestrator`: owns every component's lifetime, wires cross-references,
//! runs the connect/reconnect supervisor, exposes the external control API,
//! and performs the ordered, idempotent shutdown sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::actions::ActionLibrary;
use crate::audio::AudioPipeline;
use crate::awareness::AwarenessLoop;
use crate::config::Config;
use crate::face_tracker::FaceTracker;
use crate::hardware::HardwareDog;
use crate::head::HeadController;
use crate::model::session::ModelSession;
use crate::sensors::SensorMonitor;
use crate::state::{Event, StateStore};
use crate::tools::ToolDispatcher;
use crate::vision::Vision;

/// Named task handles for the component run loops, so shutdown can cancel
/// them in the spec's required order rather than a flat unordered set.
struct TaskHandles {
    awareness: JoinHandle<()>,
    sensors: JoinHandle<()>,
    face_tracker: JoinHandle<()>,
    head: JoinHandle<()>,
    tool_dispatcher: JoinHandle<()>,
    lightbar: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

pub struct Orchestrator {
    cfg: Arc<Config>,
    hardware: Arc<dyn HardwareDog>,
    state: Arc<StateStore>,
    audio: Arc<AudioPipeline>,
    head: Arc<HeadController>,
    face_tracker: Arc<FaceTracker>,
    sensors: Arc<SensorMonitor>,
    actions: Arc<ActionLibrary>,
    session: Arc<ModelSession>,
    tools: Arc<ToolDispatcher>,
    awareness: Arc<AwarenessLoop>,
    shutdown_requested: Arc<AtomicBool>,
    shutting_down: AtomicBool,
    handles: Mutex<Option<TaskHandles>>,
    tool_call_rx: Mutex<Option<tokio::sync::mpsc::Receiver<crate::model::events::ToolCall>>>,
}

impl Orchestrator {
    /// Wire every component together. `tool_call_rx` is the receiver half of
    /// the channel `session` was constructed with; the dispatcher is bound
    /// to the session after both exist, breaking the construction cycle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        hardware: Arc<dyn HardwareDog>,
        vision: Arc<dyn Vision>,
        state: Arc<StateStore>,
        audio: Arc<AudioPipeline>,
        head: Arc<HeadController>,
        face_tracker: Arc<FaceTracker>,
        sensors: Arc<SensorMonitor>,
        actions: Arc<ActionLibrary>,
        session: Arc<ModelSession>,
        tool_call_rx: tokio::sync::mpsc::Receiver<crate::model::events::ToolCall>,
        shutdown_requested: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let tools = ToolDispatcher::new(
            cfg.clone(),
            hardware.clone(),
            vision.clone(),
            actions.clone(),
            state.clone(),
            shutdown_requested.clone(),
        );
        tools.bind_session(session.clone());

        let activity = session.speech_activity();
        let awareness = AwarenessLoop::new(
            cfg.clone(),
            state.clone(),
            session.clone(),
            audio.clone(),
            vision,
            activity,
        );

        Arc::new(Self {
            cfg,
            hardware,
            state,
            audio,
            head,
            face_tracker,
            sensors,
            actions,
            session,
            tools,
            awareness,
            shutdown_requested,
            shutting_down: AtomicBool::new(false),
            handles: Mutex::new(None),
            tool_call_rx: Mutex::new(Some(tool_call_rx)),
        })
    }

    /// Wrap an external control operation with `command.<op>.queued|started|
    /// completed|failed` audit events on the state bus.
    async fn audited<F, Fut>(&self, op: &str, payload: serde_json::Value, f: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        self.state
            .publish_event(Event::new(format!("command.{op}.queued"), payload.clone()))
            .await;
        self.state
            .publish_event(Event::new(format!("command.{op}.started"), payload.clone()))
            .await;

        match f().await {
            Ok(message) => {
                self.state
                    .publish_event(
                        Event::new(format!("command.{op}.completed"), payload)
                            .with_metadata(serde_json::json!({ "result": message })),
                    )
                    .await;
                Ok(message)
            }
            Err(e) => {
                self.state
                    .publish_event(
                        Event::new(format!("command.{op}.failed"), payload)
                            .with_metadata(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    pub async fn enqueue_action(self: &Arc<Self>, action_names_csv: String) -> Result<String> {
        let csv = action_names_csv.clone();
        self.audited("enqueue_action", serde_json::json!({ "action_name": csv }), || async move {
            self.actions.perform(&action_names_csv).await?;
            Ok(format!("Performed: {action_names_csv}"))
        })
        .await
    }

    pub async fn send_custom_stimulus(self: &Arc<Self>, text: String) -> Result<String> {
        let message = text.clone();
        self.audited("send_custom_stimulus", serde_json::json!({ "text": text }), || async move {
            self.session.force_response(&message).await?;
            Ok("Stimulus sent".to_string())
        })
        .await
    }

    pub async fn set_awareness_enabled(self: &Arc<Self>, enabled: bool) -> Result<String> {
        self.audited("set_awareness_enabled", serde_json::json!({ "enabled": enabled }), || async move {
            self.awareness.enabled_switch().store(enabled, Ordering::SeqCst);
            Ok(format!("Awareness loop {}", if enabled { "enabled" } else { "disabled" }))
        })
        .await
    }

    pub async fn set_sensors_enabled(self: &Arc<Self>, enabled: bool) -> Result<String> {
        self.audited("set_sensors_enabled", serde_json::json!({ "enabled": enabled }), || async move {
            self.sensors.enabled_switch().store(enabled, Ordering::SeqCst);
            Ok(format!("Sensor monitor {}", if enabled { "enabled" } else { "disabled" }))
        })
        .await
    }

    pub async fn switch_persona(self: &Arc<Self>, persona_name: String) -> Result<String> {
        let name = persona_name.clone();
        self.audited("switch_persona", serde_json::json!({ "persona_name": persona_name }), || async move {
            self.session.reconnect(&name, None).await?;
            Ok(format!("Switched to persona: {name}"))
        })
        .await
    }

    pub async fn set_goal(self: &Arc<Self>, goal: String) -> Result<String> {
        let text = goal.clone();
        self.audited("set_goal", serde_json::json!({ "goal": goal }), || async move {
            self.state.mutate(|s| s.goal = text.clone()).await;
            Ok(format!("Goal set: {text}"))
        })
        .await
    }

    pub async fn instruct_response(self: &Arc<Self>, instructions: String) -> Result<String> {
        let text = instructions.clone();
        self.audited("instruct_response", serde_json::json!({ "instructions": instructions }), || async move {
            self.session.make_out_of_band_request(&text, "operator_instruction").await?;
            Ok("Instruction sent".to_string())
        })
        .await
    }

    pub async fn shutdown(self: &Arc<Self>) -> Result<String> {
        self.audited("shutdown", serde_json::json!({}), || async move {
            self.do_shutdown().await;
            Ok("Shutdown complete".to_string())
        })
        .await
    }

    /// Idempotent, strictly ordered cancellation: AwarenessLoop -> SensorMonitor
    /// -> FaceTracker -> ModelSession -> AudioPipeline -> HeadController.
    async fn do_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Orchestrator: shutdown already in progress, ignoring duplicate request");
            return;
        }

        let handles = self.handles.lock().await.take();
        if let Some(h) = handles {
            h.awareness.abort();
            h.sensors.abort();
            h.face_tracker.abort();
            self.session.close().await;
            self.audio.shutdown();
            h.head.abort();
            h.tool_dispatcher.abort();
            h.lightbar.abort();
            h.heartbeat.abort();
            h.supervisor.abort();
        }

        if let Err(e) = self.hardware.close().await {
            warn!("Orchestrator: hardware close failed during shutdown: {e}");
        }
        info!("Orchestrator: shutdown sequence complete");
    }

    /// Connect, wait for the initial response (bounded by
    /// `startup_response_timeout`) before enabling sensors, and then
    /// supervise reconnection with exponential backoff for the lifetime of
    /// the orchestrator.
    async fn run_connection_supervisor(self: Arc<Self>) {
        self.sensors.enabled_switch().store(false, Ordering::SeqCst);
        let mut first_connection = true;

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }

            let persona_name = self.state.snapshot().await.active_persona;
            let mut attempt = 0;
            loop {
                match self.session.connect().await {
                    Ok(()) => break,
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.cfg.reconnect_max_attempts {
                            error!("Orchestrator: exhausted {attempt} connect attempts: {e}");
                            return;
                        }
                        let backoff = self
                            .cfg
                            .reconnect_backoff_min
                            .mul_f32(2f32.powi(attempt as i32 - 1))
                            .min(self.cfg.reconnect_backoff_max);
                        warn!("Orchestrator: connect attempt {attempt} failed: {e}, retrying in {backoff:?}");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }

            if let Err(e) = self.session.update_session(&persona_name).await {
                warn!("Orchestrator: update_session failed after connect: {e}");
            }

            if first_connection {
                first_connection = false;
                tokio::time::sleep(self.cfg.startup_response_timeout).await;
                self.sensors.enabled_switch().store(true, Ordering::SeqCst);
                info!("Orchestrator: startup grace period elapsed, sensors enabled");
            }

            self.session.await_disconnect().await;

            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }
            warn!("Orchestrator: model session disconnected, reconnecting");
        }
    }

    /// Poll `shutdown_requested` (set by the `shut_down` tool) and run the
    /// shutdown sequence once it flips.
    async fn run_shutdown_watcher(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if self.shutdown_requested.load(Ordering::SeqCst) && !self.shutting_down.load(Ordering::SeqCst) {
                self.do_shutdown().await;
                break;
            }
        }
    }

    /// Spawn every component's run loop and block until shutdown.
    pub async fn run(self: Arc<Self>) {
        let tool_call_rx = self
            .tool_call_rx
            .lock()
            .await
            .take()
            .expect("Orchestrator::run called more than once");
        let handles = TaskHandles {
            awareness: tokio::spawn(self.awareness.clone().run()),
            sensors: tokio::spawn(self.sensors.clone().run()),
            face_tracker: tokio::spawn(self.face_tracker.clone().run()),
            head: tokio::spawn(self.head.clone().run()),
            tool_dispatcher: tokio::spawn(self.tools.clone().run(tool_call_rx)),
            lightbar: tokio::spawn(crate::lightbar::run(self.hardware.clone(), self.state.clone())),
            heartbeat: self.state.spawn_heartbeat(&self.cfg),
            supervisor: tokio::spawn(self.clone().run_connection_supervisor()),
        };
        *self.handles.lock().await = Some(handles);

        self.clone().run_shutdown_watcher().await;
    }
}
