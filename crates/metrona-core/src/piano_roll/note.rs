//! Piano-roll notes addressed by (row, column)

use serde::{Deserialize, Serialize};

/// Composite note address: pitch lane and time step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteKey {
    pub row: u32,
    pub col: u32,
}

impl NoteKey {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// A note on the piano-roll grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Pitch lane (MIDI pitch = start note + row)
    pub row: u32,
    /// Start step
    pub col: u32,
    /// Sustain in steps (>= 1)
    pub length: u32,
    /// MIDI velocity (1-127)
    pub velocity: u8,
}

impl Note {
    pub fn new(row: u32, col: u32, length: u32, velocity: u8) -> Self {
        Self {
            row,
            col,
            length,
            velocity,
        }
    }

    pub fn key(&self) -> NoteKey {
        NoteKey::new(self.row, self.col)
    }

    /// First step after the note (exclusive end)
    pub fn end(&self) -> u32 {
        self.col.saturating_add(self.length)
    }

    /// Nominal duration handed to the voice, in milliseconds
    pub fn duration_ms(&self) -> u32 {
        self.length.saturating_mul(100).max(100)
    }
}

/// Partial note update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteUpdate {
    pub length: Option<u32>,
    pub velocity: Option<u8>,
}

impl NoteUpdate {
    pub fn apply(&self, note: Note) -> Note {
        Note {
            length: self.length.unwrap_or(note.length),
            velocity: self.velocity.unwrap_or(note.velocity),
            ..note
        }
    }
}
