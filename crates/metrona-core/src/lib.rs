//! metrona-core: Timing engine and sequencing model for the metrona workstation

mod error;
pub mod event;
pub mod grid;
pub mod piano_roll;
pub mod sequence;
mod source;
mod step;
mod timing;
mod transport;
pub mod voice;

pub use error::{MetronaError, Result};
pub use event::Notifier;
pub use grid::{GridEvent, StepGridSource};
pub use piano_roll::{
    Note, NoteKey, NoteUpdate, Pattern, PatternBank, PianoRollConfig, PianoRollEvent,
    PianoRollSource,
};
pub use sequence::{
    MAX_SEQUENCE_STEPS, SequenceConfig, SequenceEvent, SequencePreset, StepTrackSource,
    StepTrigger,
};
pub use source::{SequenceSource, Source, SourceId};
pub use step::{Step, StepDefaults, StepUpdate, Track, TrackId};
pub use timing::{DEFAULT_BPM, MAX_BPM, MIN_BPM, PPQN, TICKS_PER_STEP, Tempo};
pub use transport::{Transport, TransportEvent, TransportState};
pub use voice::{Voice, VoiceCommand};
