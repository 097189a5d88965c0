//! Wire types for the realtime speech-to-speech session: the tagged
//! client/server event enums and the session configuration payload.

use serde::{Deserialize, Serialize};

/// Turn detection mode. Semantic VAD lets the remote model decide when the
/// user has finished speaking instead of a fixed silence window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionType {
    ServerVad,
    SemanticVad,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: TurnDetectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_response: Option<bool>,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            detection_type: TurnDetectionType::SemanticVad,
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(200),
            create_response: Some(true),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolParameter {
    #[serde(rename = "type")]
    pub param_type: String,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: ToolParameter,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<serde_json::Value>,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: String,
    pub temperature: f32,
}

/// Options for an outbound `response.create`. `None` renders the bare
/// default request (resume after tool output).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseCreateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

impl ResponseCreateOptions {
    /// True when this would serialize to `{}` — used for single-flight
    /// coalescing of identical consecutive default requests.
    pub fn is_default(&self) -> bool {
        self.modalities.is_none()
            && self.tool_choice.is_none()
            && self.instructions.is_none()
            && self.conversation.is_none()
            && self.metadata.is_none()
            && self.input.is_none()
    }
}

/// Events sent to the remote model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseCreateOptions>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: String,
        content: Vec<ConversationContent>,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationContent {
    InputText { text: String },
    InputImage { image_url: String },
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: "user".to_string(),
            content: vec![ConversationContent::InputText { text: text.into() }],
        }
    }

    pub fn user_text_and_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        ConversationItem::Message {
            role: "user".to_string(),
            content: vec![
                ConversationContent::InputText { text: text.into() },
                ConversationContent::InputImage { image_url: image_url.into() },
            ],
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Events received from the remote model. Unrecognized event types are
/// captured by `Other` rather than failing deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: serde_json::Value },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: serde_json::Value },

    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {},

    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { delta: String },

    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },

    #[serde(rename = "response.done")]
    ResponseDone { response: serde_json::Value },

    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {},

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {},

    #[serde(rename = "error")]
    Error { error: serde_json::Value },

    #[serde(other)]
    Other,
}
