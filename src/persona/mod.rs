//! Persona records and the registry that holds them.
//!
//! A persona is a tagged record (name, prompt, voice required; image_prompt,
//! default_motivation, description optional) used to configure the remote
//! model session and to drive the awareness loop's idle reminder text.

pub mod generator;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub prompt: String,
    pub voice: String,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub default_motivation: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Persona {
    pub fn default_motivation_or(&self, fallback: &str) -> String {
        self.default_motivation
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Mutable registry of personas keyed by name, supporting add/update/lookup.
/// Reconnect flows merge a freshly generated persona into this registry
/// rather than replacing it wholesale, so previously loaded personas remain
/// switchable for the lifetime of the process.
#[derive(Debug, Default)]
pub struct PersonaRegistry {
    personas: HashMap<String, Persona>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: Vec<Persona>) -> Self {
        let mut registry = Self::new();
        for persona in defaults {
            registry.upsert(persona);
        }
        registry
    }

    /// Insert a persona, or overwrite the existing one with the same name.
    pub fn upsert(&mut self, persona: Persona) {
        self.personas.insert(persona.name.clone(), persona);
    }

    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.personas.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

/// Built-in persona used when no persona file/service supplies one.
pub fn default_persona(name: &str) -> Persona {
    Persona {
        name: name.to_string(),
        prompt: "You are a friendly robot dog companion. Be curious, playful, and brief."
            .to_string(),
        voice: "alloy".to_string(),
        image_prompt: None,
        default_motivation: Some("Look around and greet whoever is nearby.".to_string()),
        description: Some("Default fallback persona.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_lookup_round_trips() {
        let mut registry = PersonaRegistry::new();
        registry.upsert(default_persona("default"));
        let persona = registry.get("default").unwrap();
        assert_eq!(persona.voice, "alloy");
    }

    #[test]
    fn upsert_overwrites_existing_name() {
        let mut registry = PersonaRegistry::new();
        registry.upsert(default_persona("default"));
        let mut updated = default_persona("default");
        updated.voice = "verse".to_string();
        registry.upsert(updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("default").unwrap().voice, "verse");
    }

    #[test]
    fn default_motivation_or_falls_back() {
        let mut persona = default_persona("default");
        persona.default_motivation = None;
        assert_eq!(persona.default_motivation_or("fallback"), "fallback");
    }
}
