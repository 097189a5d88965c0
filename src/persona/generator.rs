//! Generates a new `Persona` from a natural-language description via an
//! external chat-completion endpoint, for the `create_new_persona` tool.

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use super::Persona;
use crate::config::Config;

const AVAILABLE_VOICES: &[&str] = &["alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse"];

const SYSTEM_PROMPT: &str = "You generate personas for a small robot dog. Respond with strict JSON only, \
no markdown fences, containing exactly these fields: name (string), voice (one of the allowed voices), \
prompt (string, the persona's system instructions), image_prompt (string, a visual description for \
image generation), default_motivation (string, what the dog does when idle).";

/// POST a persona-generation request to an OpenAI-compatible chat completion
/// endpoint and parse the resulting JSON into a `Persona`.
pub async fn generate_persona(cfg: &Config, description: &str) -> Result<Persona> {
    let auth = cfg
        .model_auth_header
        .as_ref()
        .ok_or_else(|| anyhow!("no model API key configured, cannot generate a persona"))?;

    let user_prompt = format!(
        "Available voices: {}.\n\nRequested persona: {description}\n\n\
         Example persona for style reference:\n\
         {{\"name\":\"Admiral Rufus Ironpaw\",\"voice\":\"ash\",\
         \"prompt\":\"You are Admiral Rufus Ironpaw, a gruff but good-hearted naval officer dog. \
         Speak in short, decisive sentences and nautical metaphors.\",\
         \"image_prompt\":\"A robot dog wearing a small navy captain's hat and coat\",\
         \"default_motivation\":\"Patrol the room and report anything out of order.\"}}",
        AVAILABLE_VOICES.join(", ")
    );

    let client = reqwest::Client::new();
    let response = client
        .post("https://api.openai.com/v1/chat/completions")
        .bearer_auth(auth)
        .json(&json!({
            "model": "gpt-4",
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt },
            ],
        }))
        .send()
        .await
        .context("persona generation request failed")?
        .error_for_status()
        .context("persona generation endpoint returned an error status")?;

    let body: serde_json::Value = response.json().await.context("parse persona generation response")?;
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("persona generation response missing message content"))?;

    serde_json::from_str(content).with_context(|| format!("persona generation returned invalid JSON: {content}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_voices_is_nonempty() {
        assert!(!AVAILABLE_VOICES.is_empty());
    }
}
