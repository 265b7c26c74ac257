//! Musical clock constants and tempo

use serde::{Deserialize, Serialize};

/// Pulses per quarter note (MIDI clock resolution)
pub const PPQN: u32 = 24;

/// Pulses per sixteenth-note step
pub const TICKS_PER_STEP: u64 = 6;

pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Tempo in BPM, always inside [`MIN_BPM`, `MAX_BPM`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    /// Clamps into range; non-finite input falls back to the default tempo
    pub fn new(bpm: f64) -> Self {
        if !bpm.is_finite() {
            return Self::default();
        }
        Self {
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Milliseconds between two clock pulses
    pub fn tick_interval_ms(&self) -> f64 {
        60_000.0 / self.bpm / PPQN as f64
    }

    /// Duration of one quarter note in milliseconds
    pub fn beat_duration_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }

    /// Duration of a note value expressed as a fraction of a whole note
    pub fn note_duration_ms(&self, whole_note_fraction: f64) -> f64 {
        whole_note_fraction * 4.0 * self.beat_duration_ms()
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: DEFAULT_BPM }
    }
}

impl From<f64> for Tempo {
    fn from(bpm: f64) -> Self {
        Self::new(bpm)
    }
}

impl From<Tempo> for f64 {
    fn from(tempo: Tempo) -> Self {
        tempo.bpm
    }
}

impl std::fmt::Display for Tempo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}
