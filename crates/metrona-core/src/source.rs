//! Sequence source capability and the closed set of built-in sources

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::grid::StepGridSource;
use crate::piano_roll::PianoRollSource;
use crate::sequence::StepTrackSource;
use crate::timing::Tempo;

/// Identifier under which a source is registered with the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that decides which musical events fire on a clock pulse
pub trait SequenceSource: Send {
    fn id(&self) -> &SourceId;

    /// Handle one pulse. `tick` is the zero-based pulse position since start.
    fn process_tick(&mut self, tick: u64) -> Result<()>;

    fn tempo_changed(&mut self, _tempo: Tempo) {}

    /// Transport stopped: silence voices and rewind
    fn reset(&mut self) {}
}

/// Built-in sources plus an open slot for custom implementations
pub enum Source {
    StepTrack(StepTrackSource),
    StepGrid(StepGridSource),
    PianoRoll(PianoRollSource),
    External(Box<dyn SequenceSource>),
}

impl Source {
    pub fn external(source: impl SequenceSource + 'static) -> Self {
        Self::External(Box::new(source))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepTrack(_) => "step-track",
            Self::StepGrid(_) => "step-grid",
            Self::PianoRoll(_) => "piano-roll",
            Self::External(_) => "external",
        }
    }

    pub fn as_piano_roll(&self) -> Option<&PianoRollSource> {
        match self {
            Self::PianoRoll(source) => Some(source),
            _ => None,
        }
    }
}

impl SequenceSource for Source {
    fn id(&self) -> &SourceId {
        match self {
            Self::StepTrack(s) => s.id(),
            Self::StepGrid(s) => s.id(),
            Self::PianoRoll(s) => s.id(),
            Self::External(s) => s.id(),
        }
    }

    fn process_tick(&mut self, tick: u64) -> Result<()> {
        match self {
            Self::StepTrack(s) => s.process_tick(tick),
            Self::StepGrid(s) => s.process_tick(tick),
            Self::PianoRoll(s) => s.process_tick(tick),
            Self::External(s) => s.process_tick(tick),
        }
    }

    fn tempo_changed(&mut self, tempo: Tempo) {
        match self {
            Self::StepTrack(s) => s.tempo_changed(tempo),
            Self::StepGrid(s) => s.tempo_changed(tempo),
            Self::PianoRoll(s) => s.tempo_changed(tempo),
            Self::External(s) => s.tempo_changed(tempo),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::StepTrack(s) => s.reset(),
            Self::StepGrid(s) => s.reset(),
            Self::PianoRoll(s) => s.reset(),
            Self::External(s) => s.reset(),
        }
    }
}

impl From<StepTrackSource> for Source {
    fn from(source: StepTrackSource) -> Self {
        Self::StepTrack(source)
    }
}

impl From<StepGridSource> for Source {
    fn from(source: StepGridSource) -> Self {
        Self::StepGrid(source)
    }
}

impl From<PianoRollSource> for Source {
    fn from(source: PianoRollSource) -> Self {
        Self::PianoRoll(source)
    }
}

impl From<Box<dyn SequenceSource>> for Source {
    fn from(source: Box<dyn SequenceSource>) -> Self {
        Self::External(source)
    }
}
