//! k9-agent-core — the realtime conversational orchestrator for a
//! quadruped robot dog.
//!
//! Wires StateStore, HeadController, FaceTracker, SensorMonitor,
//! AudioPipeline, ModelSession, ToolDispatcher, ActionLibrary, and
//! AwarenessLoop behind the Orchestrator, then runs until a `shut_down`
//! tool call or SIGINT/SIGTERM requests shutdown.

mod actions;
mod audio;
mod awareness;
mod config;
mod face_tracker;
mod hardware;
mod head;
mod lightbar;
mod model;
mod orchestrator;
mod persona;
mod sensors;
mod state;
mod tools;
mod vision;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use actions::ActionLibrary;
use audio::AudioPipeline;
use config::Config;
use face_tracker::FaceTracker;
use hardware::{HardwareDog, MockHardwareDog};
use head::HeadController;
use model::session::ModelSession;
use orchestrator::Orchestrator;
use persona::{default_persona, PersonaRegistry};
use sensors::SensorMonitor;
use state::StateStore;
use vision::{MockVision, Vision};

/// Install the tracing subscriber: file-backed non-blocking writer under
/// `Config::data_dir`, falling back to stderr if the directory can't be
/// created. Returns the worker guard, which must be kept alive for the
/// process lifetime.
fn init_tracing(cfg: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if std::fs::create_dir_all(&cfg.data_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&cfg.data_dir, "k9-agent-core.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

/// Construct the `HardwareDog` collaborator. A real deployment swaps this
/// for a driver that talks to the vendor SDK; no such driver ships with
/// this core (§1 of the component design treats it as an external
/// collaborator behind the `HardwareDog` trait), so the dependency-free mock
/// is the only implementation available to run without silicon attached.
fn build_hardware() -> Arc<dyn HardwareDog> {
    Arc::new(MockHardwareDog::new())
}

/// Construct the `Vision` collaborator, analogous to `build_hardware`.
fn build_vision(cfg: &Config) -> Arc<dyn Vision> {
    Arc::new(MockVision::new(cfg.camera_width, cfg.camera_height))
}

#[tokio::main]
async fn main() {
    let cfg = Arc::new(Config::from_env());
    let _tracing_guard = init_tracing(&cfg);

    info!("k9-agent-core starting");

    let hardware = build_hardware();
    let vision = build_vision(&cfg);
    let state = Arc::new(StateStore::new(&cfg.default_persona));

    let audio = match AudioPipeline::new(&cfg) {
        Ok(audio) => Arc::new(audio),
        Err(e) => {
            error!("fatal: audio pipeline initialization failed: {e}");
            std::process::exit(1);
        }
    };

    let head = HeadController::new(cfg.clone(), hardware.clone(), state.clone(), audio.clone());
    let face_tracker = FaceTracker::new(cfg.clone(), head.clone(), vision.clone(), state.clone());
    let actions = ActionLibrary::new(cfg.clone(), hardware.clone(), head.clone(), state.clone());

    let registry = PersonaRegistry::with_defaults(vec![default_persona(&cfg.default_persona)]);

    let (tool_tx, tool_rx) = tokio::sync::mpsc::channel::<model::events::ToolCall>(32);

    let session = match ModelSession::new(
        cfg.clone(),
        audio.clone(),
        head.clone(),
        state.clone(),
        registry,
        actions.names(),
        tool_tx,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("fatal: model session construction failed: {e}");
            std::process::exit(1);
        }
    };

    let sensors = SensorMonitor::new(cfg.clone(), hardware.clone(), state.clone(), session.speech_activity());

    let shutdown_requested = Arc::new(AtomicBool::new(false));

    let orchestrator = Orchestrator::new(
        cfg.clone(),
        hardware.clone(),
        vision,
        state,
        audio,
        head,
        face_tracker,
        sensors,
        actions,
        session,
        tool_rx,
        shutdown_requested.clone(),
    );

    let signal_orchestrator = orchestrator.clone();
    let signal_flag = shutdown_requested.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, requesting shutdown");
            signal_flag.store(true, Ordering::SeqCst);
            if let Err(e) = signal_orchestrator.shutdown().await {
                error!("shutdown via SIGINT failed: {e}");
            }
        }
    });

    orchestrator.run().await;
    info!("k9-agent-core exited");
}
