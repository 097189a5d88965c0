//! `ModelSession`: the websocket connection to the remote speech-to-speech
//! model. Owns connect/reconnect, inbound event routing, outbound audio
//! streaming, and the single-flight `response.create` dedup queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::events::{
    ClientEvent, ConversationItem, ResponseCreateOptions, ServerEvent, SessionConfig, ToolCall,
    ToolParameter, ToolSpec, TurnDetection,
};
use crate::audio::resample::{f32_to_i16, i16_to_f32};
use crate::audio::AudioPipeline;
use crate::config::Config;
use crate::head::HeadController;
use crate::persona::{Persona, PersonaRegistry};
use crate::sensors::SpeechActivity;
use crate::state::{Event, StateStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;

/// Activity flags derived from inbound/outbound session traffic. Shared with
/// `SensorMonitor` so sound-direction changes are suppressed while the user
/// is speaking, the model is speaking, or a response is in flight — mirrors
/// the three-flag suppression the sensor poller already applies.
pub struct SessionFlags {
    pub user_speaking: AtomicBool,
    pub receiving_audio: AtomicBool,
    pub response_active: AtomicBool,
}

impl SessionFlags {
    fn new() -> Self {
        Self {
            user_speaking: AtomicBool::new(false),
            receiving_audio: AtomicBool::new(false),
            response_active: AtomicBool::new(false),
        }
    }

    fn reset(&self) {
        self.user_speaking.store(false, Ordering::SeqCst);
        self.receiving_audio.store(false, Ordering::SeqCst);
        self.response_active.store(false, Ordering::SeqCst);
    }
}

impl SpeechActivity for SessionFlags {
    fn is_active(&self) -> bool {
        self.user_speaking.load(Ordering::SeqCst)
            || self.receiving_audio.load(Ordering::SeqCst)
            || self.response_active.load(Ordering::SeqCst)
    }
}

/// Single-flight coalescing of buffered `response.create` requests. Only
/// used while `receiving_audio` is true, matching the remote's "don't
/// interrupt an in-progress turn" behavior.
#[derive(Default)]
struct DedupState {
    pending: Option<ResponseCreateOptions>,
    flushing: bool,
}

pub struct ModelSession {
    cfg: Arc<Config>,
    audio: Arc<AudioPipeline>,
    head: Arc<HeadController>,
    state: Arc<StateStore>,
    personas: Mutex<PersonaRegistry>,
    action_names: Vec<String>,
    flags: Arc<SessionFlags>,
    tool_tx: mpsc::Sender<ToolCall>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    dedup: Mutex<DedupState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    mic_rx: Mutex<mpsc::Receiver<Vec<f32>>>,
    disconnect_notify: Notify,
}

impl ModelSession {
    pub async fn new(
        cfg: Arc<Config>,
        audio: Arc<AudioPipeline>,
        head: Arc<HeadController>,
        state: Arc<StateStore>,
        personas: PersonaRegistry,
        action_names: Vec<String>,
        tool_tx: mpsc::Sender<ToolCall>,
    ) -> Result<Arc<Self>> {
        let mic_rx = audio
            .take_outbound()
            .await
            .ok_or_else(|| anyhow!("audio outbound channel already taken"))?;

        Ok(Arc::new(Self {
            cfg,
            audio,
            head,
            state,
            personas: Mutex::new(personas),
            action_names,
            flags: Arc::new(SessionFlags::new()),
            tool_tx,
            outbound_tx: Mutex::new(None),
            dedup: Mutex::new(DedupState::default()),
            tasks: Mutex::new(Vec::new()),
            mic_rx: Mutex::new(mic_rx),
            disconnect_notify: Notify::new(),
        }))
    }

    /// Shared handle to the session's activity flags, for `SensorMonitor`.
    pub fn speech_activity(&self) -> Arc<SessionFlags> {
        self.flags.clone()
    }

    /// Whether `name` is registered, without cloning the registry. The
    /// registry lives only here; callers (`ToolDispatcher`, `Orchestrator`)
    /// check through this rather than keeping their own copy.
    pub async fn has_persona(&self, name: &str) -> bool {
        self.personas.lock().await.get(name).is_some()
    }

    /// The active persona's `default_motivation`, for `AwarenessLoop`'s idle
    /// reminder. Falls back to a generic prompt if the persona is missing or
    /// has none set.
    pub async fn active_persona_default_motivation(&self) -> String {
        let active = self.state.snapshot().await.active_persona;
        let registry = self.personas.lock().await;
        registry
            .get(&active)
            .map(|p| p.default_motivation_or("Look around and see what's new."))
            .unwrap_or_else(|| "Look around and see what's new.".to_string())
    }

    /// Open the websocket, spawn the writer/receive/mic-forwarding tasks.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.close().await;

        let mut request = format!("{}?model={}", self.cfg.model_url, self.cfg.model_name)
            .into_client_request()
            .context("build websocket request")?;

        if let Some(auth) = &self.cfg.model_auth_header {
            request.headers_mut().insert(
                http::header::AUTHORIZATION,
                http::HeaderValue::from_str(&format!("Bearer {auth}")).context("invalid auth header")?,
            );
        }
        request
            .headers_mut()
            .insert("OpenAI-Beta", http::HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .context("websocket connect")?;
        let (mut write, read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound_tx.lock().await = Some(tx);

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    warn!("ModelSession: websocket send failed: {e}");
                    break;
                }
            }
        });

        let this = self.clone();
        let receive_task = tokio::spawn(async move { this.receive_loop(read).await });

        let this = self.clone();
        let mic_task = tokio::spawn(async move { this.forward_mic_audio().await });

        *self.tasks.lock().await = vec![writer_task, receive_task, mic_task];
        info!("ModelSession connected");
        Ok(())
    }

    /// Resolves once the receive loop has ended, for the orchestrator's
    /// reconnect supervisor.
    pub async fn await_disconnect(&self) {
        self.disconnect_notify.notified().await;
    }

    /// Abort in-flight tasks and drop the outbound sender. Idempotent.
    pub async fn close(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.outbound_tx.lock().await = None;
        self.flags.reset();
    }

    /// Close, pause briefly, reconnect, and re-run session configuration.
    /// `persona_obj`, when given, is merged into the registry before the
    /// name is resolved — used when a freshly generated persona should
    /// become active immediately. Falls back to the previously active
    /// persona, with a warning, if `persona_name` isn't registered.
    pub async fn reconnect(self: &Arc<Self>, persona_name: &str, persona_obj: Option<Persona>) -> Result<()> {
        self.close().await;
        self.audio.interrupt_playback("reconnect");
        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Some(persona) = persona_obj {
            self.personas.lock().await.upsert(persona);
        }

        let resolved_name = {
            let registry = self.personas.lock().await;
            if registry.get(persona_name).is_some() {
                persona_name.to_string()
            } else {
                warn!("reconnect: persona '{persona_name}' not registered, keeping previous persona");
                self.state.snapshot().await.active_persona
            }
        };

        self.connect().await?;
        self.update_session(&resolved_name).await
    }

    /// Build and send `session.update`, then immediately request an
    /// awareness response so the model starts from a grounded goal.
    pub async fn update_session(self: &Arc<Self>, persona_name: &str) -> Result<()> {
        let persona = {
            let registry = self.personas.lock().await;
            registry
                .get(persona_name)
                .cloned()
                .unwrap_or_else(|| crate::persona::default_persona(persona_name))
        };

        let instructions = self.build_instructions(&persona).await;
        let config = SessionConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions,
            voice: persona.voice.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(json!({ "model": "whisper-1" })),
            turn_detection: TurnDetection::default(),
            tools: build_tool_specs(),
            tool_choice: "auto".to_string(),
            temperature: 0.6,
        };

        self.send_event(&ClientEvent::SessionUpdate { session: config }).await?;

        let motivation = persona.default_motivation_or("Look around and greet whoever is nearby.");
        self.state.reset_for_new_persona(&persona.name, &motivation).await;

        self.send_awareness().await
    }

    async fn build_instructions(&self, persona: &Persona) -> String {
        let registry = self.personas.lock().await;
        let other_personas: Vec<String> = registry
            .names()
            .into_iter()
            .filter(|n| n != &persona.name)
            .collect();
        let actions = self.action_names.join(", ");

        let mut text = String::new();
        text.push_str(&persona.prompt);
        text.push_str("\n\nYou can perform physical actions by calling perform_action with one of: ");
        text.push_str(&actions);
        text.push_str(". Multiple actions may be combined by passing a comma-separated action_name.");
        if !other_personas.is_empty() {
            text.push_str("\n\nOther personas you may switch to via switch_persona: ");
            text.push_str(&other_personas.join(", "));
        }
        text
    }

    /// Interrupt playback, then request an awareness response: the remote
    /// model is forced to call `get_awareness_status` and respond with the
    /// current goal.
    pub async fn send_awareness(&self) -> Result<()> {
        self.audio.interrupt_playback("awareness");
        self.state.mutate(|s| s.last_awareness_event_at = Some(chrono::Utc::now())).await;
        self.request_response(ResponseCreateOptions {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            tool_choice: Some("required".to_string()),
            instructions: Some("get_awareness_status".to_string()),
            ..Default::default()
        })
        .await
    }

    /// Inject a user-role stimulus (petting, loud sound, face, orientation)
    /// and force a response. Interrupts any in-progress playback first.
    pub async fn force_response(&self, message: &str) -> Result<()> {
        self.audio.interrupt_playback("forced_stimulus");
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(message),
        })
        .await?;
        self.request_response(ResponseCreateOptions::default()).await
    }

    /// Inject an informational message without forcing a response (used for
    /// quiet ambient sound, which should not interrupt the conversation).
    pub async fn send_text_message(&self, text: &str) -> Result<()> {
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Attach a captured still image (as a data URL) to a user message and
    /// request a response.
    pub async fn send_user_image(&self, text: &str, image_path: &str) -> Result<String> {
        let bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("read captured image at {image_path}"))?;
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(bytes));

        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text_and_image(text, data_url),
        })
        .await?;
        self.request_response(ResponseCreateOptions::default()).await?;
        Ok(format!("Image captured and sent: {text}"))
    }

    /// A `response.create` whose output is detached from the conversation
    /// (`conversation: "none"`) — used for one-off out-of-band prompts that
    /// shouldn't appear in the visible transcript.
    pub async fn make_out_of_band_request(&self, request: &str, topic: &str) -> Result<()> {
        let opts = ResponseCreateOptions {
            modalities: Some(vec!["text".to_string()]),
            tool_choice: Some("none".to_string()),
            conversation: Some("none".to_string()),
            metadata: Some(json!({ "topic": topic })),
            input: Some(json!([{
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": request }],
            }])),
            instructions: None,
        };
        self.send_event(&ClientEvent::ResponseCreate { response: Some(opts) }).await
    }

    /// Send a tool's output back and resume the turn. `get_awareness_status`
    /// suppresses further tool calls on the follow-up (`tool_choice: "none"`)
    /// since its sole purpose is surfacing the current goal text.
    pub async fn send_tool_result(&self, call: &ToolCall, result: &str) -> Result<()> {
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call.call_id.clone(),
                output: result.to_string(),
            },
        })
        .await?;

        if call.name == "get_awareness_status" {
            self.request_response(ResponseCreateOptions {
                tool_choice: Some("none".to_string()),
                ..Default::default()
            })
            .await
        } else {
            self.request_response(ResponseCreateOptions::default()).await
        }
    }

    /// Send a `response.create`, or buffer it if a response is currently
    /// streaming. Buffered requests with identical `instructions` to one
    /// already pending are coalesced rather than queued twice; a single
    /// flush task drains the buffer once the in-progress response ends.
    async fn request_response(self: &Arc<Self>, opts: ResponseCreateOptions) -> Result<()> {
        if !self.flags.receiving_audio.load(Ordering::SeqCst) {
            return self.send_response_create(opts).await;
        }

        let mut dedup = self.dedup.lock().await;
        let is_duplicate = dedup
            .pending
            .as_ref()
            .map(|existing| existing.instructions == opts.instructions)
            .unwrap_or(false);
        if !is_duplicate {
            dedup.pending = Some(opts);
        }

        if !dedup.flushing {
            dedup.flushing = true;
            drop(dedup);
            self.spawn_flush_task();
        }
        Ok(())
    }

    fn spawn_flush_task(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if this.flags.receiving_audio.load(Ordering::SeqCst) {
                    continue;
                }
                let pending = {
                    let mut dedup = this.dedup.lock().await;
                    dedup.flushing = false;
                    dedup.pending.take()
                };
                if let Some(opts) = pending {
                    if let Err(e) = this.send_response_create(opts).await {
                        warn!("ModelSession: flushed response.create failed: {e}");
                    }
                }
                break;
            }
        });
    }

    async fn send_response_create(&self, opts: ResponseCreateOptions) -> Result<()> {
        let response = if opts.is_default() { None } else { Some(opts) };
        self.send_event(&ClientEvent::ResponseCreate { response }).await
    }

    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event).context("serialize client event")?;
        if matches!(event, ClientEvent::ResponseCreate { .. }) {
            self.flags.response_active.store(true, Ordering::SeqCst);
        }
        let guard = self.outbound_tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| anyhow!("model session not connected"))?;
        tx.send(Message::Text(text)).map_err(|_| anyhow!("websocket writer task has stopped"))?;
        Ok(())
    }

    /// Drains the mic's resampled-and-gated outbound channel for the
    /// lifetime of one connection. On reconnect the receiver is reused, not
    /// retaken, since `AudioPipeline::take_outbound` only yields it once.
    async fn forward_mic_audio(self: Arc<Self>) {
        let mut rx = self.mic_rx.lock().await;
        while let Some(chunk) = rx.recv().await {
            let pcm16 = f32_to_i16(&chunk);
            let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
            let encoded = BASE64.encode(bytes);
            if self.send_event(&ClientEvent::AudioAppend { audio: encoded }).await.is_err() {
                break;
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut read: WsRead) {
        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    warn!("ModelSession: websocket read error: {e}");
                    break;
                }
            };
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => {
                    info!("ModelSession: server closed the connection");
                    break;
                }
                _ => continue,
            };
            match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => self.handle_server_event(event).await,
                Err(e) => warn!("ModelSession: failed to parse server event: {e}"),
            }
        }
        self.flags.reset();
        self.disconnect_notify.notify_waiters();
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
                debug!("ModelSession: session acknowledged");
            }
            ServerEvent::ResponseAudioDelta { delta } => match BASE64.decode(delta) {
                Ok(bytes) => {
                    let pcm16: Vec<i16> = bytes
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]]))
                        .collect();
                    let samples = i16_to_f32(&pcm16);
                    let volume = self.state.snapshot().await.volume;
                    self.audio.enqueue_playback(&samples, volume);
                }
                Err(e) => warn!("ModelSession: failed to decode audio delta: {e}"),
            },
            ServerEvent::ResponseAudioDone {} => {
                self.flags.receiving_audio.store(false, Ordering::SeqCst);
                self.state.mutate(|s| s.is_talking_movement = false).await;
                self.head.disable_talking();
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta } => {
                trace!(delta, "ModelSession: transcript delta");
                if !self.flags.receiving_audio.swap(true, Ordering::SeqCst) {
                    self.state.mutate(|s| s.is_talking_movement = true).await;
                    self.head.enable_talking();
                }
            }
            ServerEvent::ResponseTextDelta { delta } => {
                trace!(delta, "ModelSession: text delta");
            }
            ServerEvent::ResponseDone { response } => {
                self.flags.response_active.store(false, Ordering::SeqCst);
                let topic = response
                    .get("metadata")
                    .and_then(|m| m.get("topic"))
                    .and_then(|t| t.as_str());
                if topic == Some("self_motivation") {
                    debug!("ModelSession: out-of-band self-motivation response completed");
                }
            }
            ServerEvent::ResponseFunctionCallArgumentsDone { call_id, name, arguments } => {
                let parsed = serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null);
                let call = ToolCall { call_id, name, arguments: parsed };
                if self.tool_tx.send(call).await.is_err() {
                    warn!("ModelSession: tool dispatcher channel closed");
                }
            }
            ServerEvent::InputAudioBufferSpeechStarted {} => {
                self.flags.user_speaking.store(true, Ordering::SeqCst);
                self.audio.interrupt_playback("barge_in");
                self.head.disable_talking();
                self.state.mutate(|s| s.is_talking_movement = false).await;
            }
            ServerEvent::InputAudioBufferSpeechStopped {} => {
                self.flags.user_speaking.store(false, Ordering::SeqCst);
            }
            ServerEvent::Error { error } => {
                warn!(?error, "ModelSession: server error event");
                self.state.publish_event(Event::new("model.error", error)).await;
            }
            ServerEvent::Other => {}
        }
    }
}

/// JSON-schema tool declarations sent in `session.update`. Names are the
/// contract with the model; see the dispatcher for the matching handlers.
fn build_tool_specs() -> Vec<ToolSpec> {
    let empty = ToolParameter {
        param_type: "object".to_string(),
        properties: json!({}),
        required: vec![],
    };

    vec![
        ToolSpec {
            tool_type: "function".to_string(),
            name: "perform_action".to_string(),
            description: "Perform one or more named physical actions, comma-separated to run in sequence.".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "action_name": { "type": "string" } }),
                required: vec!["action_name".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "look_and_see".to_string(),
            description: "Capture an image from the camera and answer a question about what's visible.".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "question": { "type": "string" } }),
                required: vec!["question".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "get_system_status".to_string(),
            description: "Get a human-readable status report: posture, battery, sensors, and uptime.".to_string(),
            parameters: empty.clone(),
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "get_awareness_status".to_string(),
            description: "Get the current goal driving behavior.".to_string(),
            parameters: empty.clone(),
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "set_goal".to_string(),
            description: "Set the current goal driving behavior.".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "goal": { "type": "string" } }),
                required: vec!["goal".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "set_volume".to_string(),
            description: "Set the speaker output volume level, 0 (mute) to 3 (loudest).".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "volume_level": { "type": "number", "minimum": 0, "maximum": 3 } }),
                required: vec!["volume_level".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "switch_persona".to_string(),
            description: "Switch to a different registered persona by name.".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "persona_name": { "type": "string" } }),
                required: vec!["persona_name".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "create_new_persona".to_string(),
            description: "Generate a brand new persona from a natural-language description and switch to it.".to_string(),
            parameters: ToolParameter {
                param_type: "object".to_string(),
                properties: json!({ "persona_description": { "type": "string" } }),
                required: vec!["persona_description".to_string()],
            },
        },
        ToolSpec {
            tool_type: "function".to_string(),
            name: "shut_down".to_string(),
            description: "Shut down the robot's conversational process.".to_string(),
            parameters: empty,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_flags_inactive_by_default() {
        let flags = SessionFlags::new();
        assert!(!flags.is_active());
    }

    #[test]
    fn session_flags_active_when_receiving_audio() {
        let flags = SessionFlags::new();
        flags.receiving_audio.store(true, Ordering::SeqCst);
        assert!(flags.is_active());
    }

    #[test]
    fn session_flags_reset_clears_all() {
        let flags = SessionFlags::new();
        flags.user_speaking.store(true, Ordering::SeqCst);
        flags.receiving_audio.store(true, Ordering::SeqCst);
        flags.response_active.store(true, Ordering::SeqCst);
        flags.reset();
        assert!(!flags.is_active());
    }

    #[test]
    fn build_tool_specs_covers_all_nine_tools() {
        let specs = build_tool_specs();
        assert_eq!(specs.len(), 9);
        assert!(specs.iter().any(|s| s.name == "perform_action"));
        assert!(specs.iter().any(|s| s.name == "shut_down"));
    }
}
