//! Voice dispatch boundary
//!
//! A voice is any instrument-like collaborator that can start and stop notes.
//! Sequence sources hold an optional boxed voice; a missing voice is a valid
//! muted state.

use serde::{Deserialize, Serialize};

pub trait Voice: Send {
    /// Start a note. `pitch` is `None` for unpitched voices (drums, clicks).
    fn trigger_note(&mut self, velocity: u8, duration_ms: u32, pitch: Option<u8>);
    fn stop_note(&mut self, pitch: u8);
    fn stop_all_notes(&mut self);
}

/// A voice call captured as data, for forwarding across threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceCommand {
    Trigger {
        velocity: u8,
        duration_ms: u32,
        pitch: Option<u8>,
    },
    Stop {
        pitch: u8,
    },
    StopAll,
}

impl VoiceCommand {
    /// Replay this command onto a voice
    pub fn apply(self, voice: &mut dyn Voice) {
        match self {
            Self::Trigger {
                velocity,
                duration_ms,
                pitch,
            } => voice.trigger_note(velocity, duration_ms, pitch),
            Self::Stop { pitch } => voice.stop_note(pitch),
            Self::StopAll => voice.stop_all_notes(),
        }
    }
}
