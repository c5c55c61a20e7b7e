//! Engine collaborator handles.
//!
//! The engine (audio context + physics) is consumed, not owned: the session
//! resumes a suspended audio context when a connection opens and forwards
//! `user_grounded` physics events to the host.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

/// Audio context lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Suspended,
    Running,
}

/// Suspend/resume control over the engine's audio context.
pub trait AudioControl: Send + Sync {
    fn state(&self) -> AudioState;
    fn resume(&self);
    fn suspend(&self);
}

/// Audio control that tracks state without driving any hardware.
#[derive(Debug, Default)]
pub struct NullAudio {
    running: AtomicBool,
}

impl AudioControl for NullAudio {
    fn state(&self) -> AudioState {
        if self.running.load(Ordering::Relaxed) {
            AudioState::Running
        } else {
            AudioState::Suspended
        }
    }

    fn resume(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn suspend(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// The engine handles the session runtime consumes.
pub struct EngineHandle {
    pub audio: Box<dyn AudioControl>,
    /// `user_grounded` physics payloads, forwarded to the host verbatim.
    pub grounded: mpsc::Receiver<Value>,
}

impl EngineHandle {
    /// Bundle an audio control with a grounded-event channel. The engine
    /// keeps the sender and fires it on every grounded-state change.
    pub fn new(audio: Box<dyn AudioControl>) -> (Self, mpsc::Sender<Value>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                audio,
                grounded: rx,
            },
            tx,
        )
    }

    /// Handle for demos and tests: null audio, no physics source.
    pub fn null() -> (Self, mpsc::Sender<Value>) {
        Self::new(Box::new(NullAudio::default()))
    }
}
