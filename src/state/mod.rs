//! Shared robot state, the event bus, and the lightbar status mapping.
//!
//! `StateStore` is the single writer of `RobotState`; every other component
//! reads a `snapshot()` or subscribes to the broadcast stream. No module
//! outside this one should hold a `RobotState` field of its own.

pub mod pose;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::Config;
pub use pose::{HeadPose, Posture};

/// Petting gesture subtype surfaced by the touch sensor (supplement, see
/// component design for `SensorMonitor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PettingGesture {
    /// Front-to-back stroke.
    Ls,
    /// Back-to-front stroke.
    Rs,
    /// Left touch pad.
    L,
    /// Right touch pad.
    R,
}

impl PettingGesture {
    /// Short clause appended to the awareness stimulus text.
    pub fn reaction_clause(self) -> &'static str {
        match self {
            PettingGesture::Ls => "(front-to-back stroke)",
            PettingGesture::Rs => "(back-to-front stroke)",
            PettingGesture::L => "(left side touch)",
            PettingGesture::R => "(right side touch)",
        }
    }
}

/// A bus event, replayed to late-joining observers from a bounded ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            timestamp: Utc::now(),
            payload,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Lightbar status derived from `RobotState` on each broadcast tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightMode {
    Idle,
    Active,
    Speaking,
    Error,
}

impl LightMode {
    /// Derive the lightbar mode from the current robot state.
    pub fn from_state(state: &RobotState) -> Self {
        if state.is_talking_movement {
            LightMode::Speaking
        } else if state.is_taking_action || state.is_playing_sound || state.pending_stimulus.is_some() {
            LightMode::Active
        } else {
            LightMode::Idle
        }
    }
}

/// The robot's shared mutable state. Owned exclusively by `StateStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotState {
    pub volume: f32,
    pub posture: Posture,
    pub head_pose: HeadPose,
    pub goal: String,
    pub face_present: bool,
    pub face_last_seen_at: Option<DateTime<Utc>>,
    pub petting_at: Option<DateTime<Utc>>,
    pub is_being_petted: bool,
    pub petting_gesture: Option<PettingGesture>,
    pub last_sound_direction: Option<String>,
    pub last_orientation_desc: Option<String>,
    pub last_awareness_event_at: Option<DateTime<Utc>>,
    pub pending_stimulus: Option<String>,
    pub is_talking_movement: bool,
    pub is_taking_action: bool,
    pub is_playing_sound: bool,
    pub active_persona: String,
    pub light_mode: LightMode,
}

impl RobotState {
    fn new(default_persona: &str) -> Self {
        Self {
            volume: 1.0,
            posture: Posture::Sitting,
            head_pose: HeadPose::default(),
            goal: String::new(),
            face_present: false,
            face_last_seen_at: None,
            petting_at: None,
            is_being_petted: false,
            petting_gesture: None,
            last_sound_direction: None,
            last_orientation_desc: None,
            last_awareness_event_at: None,
            pending_stimulus: None,
            is_talking_movement: false,
            is_taking_action: false,
            is_playing_sound: false,
            active_persona: default_persona.to_string(),
            light_mode: LightMode::Idle,
        }
    }

    /// Reset for a freshly loaded persona. Hardware-backed fields (pose,
    /// posture) are left as-is; they get re-synced from hardware separately.
    fn reset_for_new_persona(&mut self, persona_name: &str, default_motivation: &str) {
        self.goal = default_motivation.to_string();
        self.face_present = false;
        self.face_last_seen_at = None;
        self.petting_at = None;
        self.is_being_petted = false;
        self.petting_gesture = None;
        self.last_sound_direction = None;
        self.last_orientation_desc = None;
        self.last_awareness_event_at = None;
        self.pending_stimulus = None;
        self.active_persona = persona_name.to_string();
    }
}

const EVENT_RING_CAPACITY: usize = 500;

/// Single writer of `RobotState`; broadcasts a snapshot on mutation and on a
/// throttled timer, and retains a bounded replay ring of bus events.
pub struct StateStore {
    state: Mutex<RobotState>,
    state_tx: broadcast::Sender<RobotState>,
    events: Mutex<VecDeque<Event>>,
    event_tx: broadcast::Sender<Event>,
}

impl StateStore {
    pub fn new(default_persona: &str) -> Self {
        let (state_tx, _) = broadcast::channel(32);
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(RobotState::new(default_persona)),
            state_tx,
            events: Mutex::new(VecDeque::with_capacity(EVENT_RING_CAPACITY)),
            event_tx,
        }
    }

    /// Immutable copy of the current state.
    pub async fn snapshot(&self) -> RobotState {
        self.state.lock().await.clone()
    }

    /// Mutate under exclusive access, then broadcast the resulting snapshot.
    pub async fn mutate(&self, f: impl FnOnce(&mut RobotState)) {
        let snapshot = {
            let mut guard = self.state.lock().await;
            f(&mut guard);
            guard.light_mode = LightMode::from_state(&guard);
            guard.clone()
        };
        let _ = self.state_tx.send(snapshot);
    }

    pub async fn reset_for_new_persona(&self, persona_name: &str, default_motivation: &str) {
        self.mutate(|s| s.reset_for_new_persona(persona_name, default_motivation))
            .await;
    }

    /// Subscribe to the state broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RobotState> {
        self.state_tx.subscribe()
    }

    /// Publish a bus event: stored in the replay ring and broadcast live.
    pub async fn publish_event(&self, event: Event) {
        {
            let mut ring = self.events.lock().await;
            if ring.len() >= EVENT_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to live bus events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the replay ring, oldest first, for late-joining observers.
    pub async fn replay_events(&self) -> Vec<Event> {
        self.events.lock().await.iter().cloned().collect()
    }

    /// Spawn the throttled broadcast task (default 1 Hz, see `Config`).
    /// Mutation already broadcasts on change; this keeps idle observers
    /// synced without requiring them to poll.
    pub fn spawn_heartbeat(self: &std::sync::Arc<Self>, cfg: &Config) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let interval = cfg.state_stream_interval.max(Duration::from_millis(50));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = store.snapshot().await;
                let _ = store.state_tx.send(snapshot);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_mutation() {
        let store = StateStore::new("default");
        store.mutate(|s| s.volume = 2.0).await;
        assert_eq!(store.snapshot().await.volume, 2.0);
    }

    #[tokio::test]
    async fn subscribers_observe_mutated_snapshot() {
        let store = StateStore::new("default");
        let mut rx = store.subscribe();
        store.mutate(|s| s.goal = "explore".to_string()).await;
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.goal, "explore");
    }

    #[tokio::test]
    async fn event_ring_is_bounded() {
        let store = StateStore::new("default");
        for i in 0..(EVENT_RING_CAPACITY + 10) {
            store
                .publish_event(Event::new("test.tick", serde_json::json!({ "i": i })))
                .await;
        }
        assert_eq!(store.replay_events().await.len(), EVENT_RING_CAPACITY);
    }

    #[tokio::test]
    async fn light_mode_reflects_talking() {
        let store = StateStore::new("default");
        store.mutate(|s| s.is_talking_movement = true).await;
        assert_eq!(store.snapshot().await.light_mode, LightMode::Speaking);
    }

    #[test]
    fn reset_for_new_persona_preserves_hardware_pose() {
        let mut state = RobotState::new("a");
        state.head_pose = HeadPose::new(10.0, 5.0, 0.0);
        state.posture = Posture::Standing;
        state.reset_for_new_persona("b", "be curious");
        assert_eq!(state.active_persona, "b");
        assert_eq!(state.goal, "be curious");
        assert_eq!(state.head_pose, HeadPose::new(10.0, 5.0, 0.0));
        assert_eq!(state.posture, Posture::Standing);
    }
}
