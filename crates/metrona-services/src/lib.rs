//! metrona-services: Clock driver thread, session files and output voices

mod config;
mod engine;
mod voice;

pub use config::{
    ConfigError, GridSession, PianoRollSession, SessionConfig, StepSession, TrackSession,
    default_session_path, load_session, save_session,
};
pub use engine::{ClockEngine, EngineError};
pub use voice::{ChannelVoice, LogVoice, VoiceMessage};
