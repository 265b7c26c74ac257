//! Piano-roll sequence source
//!
//! Notes live on a (row, column) grid inside the current pattern of a
//! [`PatternBank`]. Every sixteenth-note pulse moves the playhead one column;
//! notes whose end was crossed are stopped before notes starting at the new
//! column are triggered.

mod note;
mod pattern;

pub use note::{Note, NoteKey, NoteUpdate};
pub use pattern::{PATTERN_SLOTS, Pattern, PatternBank};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::Result;
use crate::event::Notifier;
use crate::source::{SequenceSource, SourceId};
use crate::timing::TICKS_PER_STEP;
use crate::voice::Voice;

/// Bars laid out when the column count is derived from the time signature
pub const BAR_MULTIPLIER: u32 = 4;

/// Grid dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PianoRollConfig {
    pub rows: u32,
    pub columns: u32,
    /// MIDI pitch of row 0
    pub start_note: u8,
    pub steps_per_beat: u32,
    pub beats_per_bar: u32,
}

impl Default for PianoRollConfig {
    fn default() -> Self {
        Self {
            rows: 88,
            columns: 64,
            start_note: 21,
            steps_per_beat: 4,
            beats_per_bar: 4,
        }
    }
}

impl PianoRollConfig {
    fn sanitized(mut self) -> Self {
        for (name, field) in [
            ("rows", &mut self.rows),
            ("columns", &mut self.columns),
            ("steps_per_beat", &mut self.steps_per_beat),
            ("beats_per_bar", &mut self.beats_per_bar),
        ] {
            if *field == 0 {
                warn!("Piano roll {} must be positive, using 1", name);
                *field = 1;
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PianoRollEvent {
    PlayheadMoved(u32),
    NoteAdded(Note),
    NoteRemoved(Note),
    NoteUpdated(Note),
    PatternChanged {
        index: usize,
        notes: Vec<Note>,
        beats_per_bar: u32,
    },
    BeatsChanged {
        beats: u32,
        columns: u32,
        bars: u32,
    },
    /// `true` when an instrument is attached
    InstrumentChanged(bool),
}

/// End of a note on the looped timeline.
///
/// A note that runs past the last column ends in the next loop, so its end is
/// folded back by one loop length. Notes are never longer than the column
/// count, which keeps a single fold sufficient.
pub fn note_end(note: &Note, columns: u32) -> u32 {
    let end = note.end();
    if wraps(note, columns) { end - columns } else { end }
}

fn wraps(note: &Note, columns: u32) -> bool {
    note.end() > columns
}

/// Column count for a time signature, `None` when it does not fit in `u32`
fn columns_for(bars: u32, steps_per_beat: u32, beats: u32) -> Option<u32> {
    let per_bar = steps_per_beat.checked_mul(beats)?;
    let columns = per_bar.checked_mul(bars)?;
    Some(columns.max(per_bar.checked_mul(BAR_MULTIPLIER)?)).filter(|c| *c > 0)
}

/// Whether a note ending at `end` was crossed moving from `previous` to `current`
pub fn should_stop(previous: u32, current: u32, end: u32) -> bool {
    if previous < current {
        previous < end && end <= current
    } else {
        // Wrapped: the traversed interval is the tail before the loop point
        // plus the head after it
        end <= current || previous < end
    }
}

pub struct PianoRollSource {
    id: SourceId,
    config: PianoRollConfig,
    bank: PatternBank,
    playhead: u32,
    /// Column reached by the last processed step; `None` after a reset
    last_step: Option<u32>,
    /// Notes sounding across the loop point, stopped only once started
    wrapping: BTreeSet<NoteKey>,
    instrument: Option<Box<dyn Voice>>,
    notifier: Notifier<PianoRollEvent>,
}

impl PianoRollSource {
    pub fn new(id: impl Into<SourceId>, config: PianoRollConfig) -> Self {
        let config = config.sanitized();
        Self {
            id: id.into(),
            bank: PatternBank::new(config.beats_per_bar),
            config,
            playhead: 0,
            last_step: None,
            wrapping: BTreeSet::new(),
            instrument: None,
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<PianoRollEvent> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &PianoRollConfig {
        &self.config
    }

    pub fn columns(&self) -> u32 {
        self.config.columns
    }

    pub fn playhead(&self) -> u32 {
        self.playhead
    }

    pub fn current_pattern(&self) -> usize {
        self.bank.active_index()
    }

    pub fn pattern(&self) -> &Pattern {
        self.bank.active()
    }

    pub fn bank(&self) -> &PatternBank {
        &self.bank
    }

    /// MIDI pitch for a row, if representable
    pub fn pitch_for(&self, row: u32) -> Option<u8> {
        (self.config.start_note as u32)
            .checked_add(row)
            .and_then(|p| u8::try_from(p).ok())
            .filter(|p| *p <= 127)
    }

    fn is_valid(&self, note: &Note) -> bool {
        note.row < self.config.rows
            && self.pitch_for(note.row).is_some()
            && note.col < self.config.columns
            && (1..=self.config.columns).contains(&note.length)
            && (1..=127).contains(&note.velocity)
    }

    /// Add a note to the current pattern. Fails when the cell is occupied or
    /// the note does not fit the grid.
    pub fn add_note(&mut self, row: u32, col: u32, length: u32, velocity: u8) -> bool {
        let note = Note::new(row, col, length, velocity);
        if !self.is_valid(&note) || !self.bank.active_mut().insert(note) {
            return false;
        }
        self.notifier.emit(PianoRollEvent::NoteAdded(note));
        true
    }

    pub fn remove_note(&mut self, row: u32, col: u32) -> bool {
        let key = NoteKey::new(row, col);
        let Some(note) = self.bank.active_mut().remove(key) else {
            return false;
        };
        self.wrapping.remove(&key);
        self.notifier.emit(PianoRollEvent::NoteRemoved(note));
        true
    }

    pub fn update_note(&mut self, row: u32, col: u32, update: NoteUpdate) -> bool {
        let Some(note) = self.bank.active().get(NoteKey::new(row, col)).copied() else {
            return false;
        };
        let updated = update.apply(note);
        if !self.is_valid(&updated) {
            return false;
        }
        self.bank.active_mut().replace(updated);
        self.notifier.emit(PianoRollEvent::NoteUpdated(updated));
        true
    }

    pub fn note_at(&self, row: u32, col: u32) -> Option<&Note> {
        self.bank.active().get(NoteKey::new(row, col))
    }

    pub fn notes(&self) -> Vec<Note> {
        self.bank.active().to_vec()
    }

    /// Remove every note from the current pattern
    pub fn clear(&mut self) {
        self.stop_all();
        self.bank.active_mut().clear();
        self.emit_pattern_changed();
    }

    /// Attach an instrument, silencing the previous one
    pub fn set_instrument(&mut self, voice: Box<dyn Voice>) {
        self.stop_all();
        self.instrument = Some(voice);
        self.notifier.emit(PianoRollEvent::InstrumentChanged(true));
    }

    pub fn clear_instrument(&mut self) -> Option<Box<dyn Voice>> {
        self.stop_all();
        let previous = self.instrument.take();
        self.notifier.emit(PianoRollEvent::InstrumentChanged(false));
        previous
    }

    pub fn has_instrument(&self) -> bool {
        self.instrument.is_some()
    }

    /// Jump the playhead, stopping whatever is sounding
    pub fn set_playhead(&mut self, position: u32) {
        self.playhead = position.min(self.config.columns - 1);
        self.last_step = None;
        self.stop_all();
        self.notifier.emit(PianoRollEvent::PlayheadMoved(self.playhead));
    }

    /// Change the time signature of the current pattern, keeping the bar count
    pub fn set_beats_per_bar(&mut self, beats: u32) -> bool {
        if beats < 1 {
            warn!("Invalid beats per bar for {}: {}", self.id, beats);
            return false;
        }
        let steps_per_beat = self.config.steps_per_beat;
        let old_beats = self.config.beats_per_bar;
        let bars = steps_per_beat
            .checked_mul(old_beats)
            .map_or(1, |per_bar| self.config.columns.div_ceil(per_bar));
        let Some(columns) = columns_for(bars, steps_per_beat, beats) else {
            warn!("Beats per bar {} too large for {}", beats, self.id);
            return false;
        };

        self.config.beats_per_bar = beats;
        self.config.columns = columns;
        self.bank.active_mut().beats_per_bar = beats;
        self.playhead = self.playhead.min(columns - 1);

        self.notifier.emit(PianoRollEvent::BeatsChanged {
            beats,
            columns,
            bars,
        });
        true
    }

    /// Switch the current pattern; notes and time signature change together
    pub fn set_pattern(&mut self, index: usize) -> bool {
        let Some(pattern) = self.bank.get(index) else {
            return false;
        };
        let beats_per_bar = pattern.beats_per_bar;
        let columns = if beats_per_bar == self.config.beats_per_bar {
            self.config.columns
        } else {
            let Some(columns) = columns_for(1, self.config.steps_per_beat, beats_per_bar) else {
                warn!("Pattern {} of {} has an unusable time signature", index, self.id);
                return false;
            };
            columns
        };

        self.stop_all();
        self.bank.set_active(index);
        self.config.beats_per_bar = beats_per_bar;
        self.config.columns = columns;
        self.playhead = self.playhead.min(self.config.columns - 1);
        self.last_step = None;

        debug!("{} switched to pattern {}", self.id, index);
        self.emit_pattern_changed();
        true
    }

    pub fn copy_pattern(&mut self, from: usize, to: usize) -> bool {
        self.bank.copy_pattern(from, to)
    }

    pub fn clear_pattern(&mut self, index: usize) -> bool {
        self.bank.clear_pattern(index)
    }

    pub fn rename_pattern(&mut self, index: usize, name: impl Into<String>) -> bool {
        let Some(pattern) = self.bank.get_mut(index) else {
            return false;
        };
        pattern.name = name.into();
        true
    }

    fn emit_pattern_changed(&mut self) {
        let pattern = self.bank.active();
        let event = PianoRollEvent::PatternChanged {
            index: self.bank.active_index(),
            notes: pattern.to_vec(),
            beats_per_bar: pattern.beats_per_bar,
        };
        self.notifier.emit(event);
    }

    fn stop_all(&mut self) {
        self.wrapping.clear();
        if let Some(voice) = self.instrument.as_mut() {
            voice.stop_all_notes();
        }
    }

    /// Advance to `column`: stop crossed note ends, then start notes at `column`
    fn advance_to(&mut self, column: u32) {
        let columns = self.config.columns;
        let start_note = self.config.start_note as u32;
        let pitch = |row: u32| start_note.checked_add(row).and_then(|p| u8::try_from(p).ok());

        if let Some(voice) = self.instrument.as_mut() {
            let pattern = self.bank.active();

            if let Some(previous) = self.last_step {
                for note in pattern.notes() {
                    if !should_stop(previous, column, note_end(note, columns)) {
                        continue;
                    }
                    // A folded end before the note ever played belongs to a
                    // loop that did not happen
                    if wraps(note, columns) && !self.wrapping.remove(&note.key()) {
                        continue;
                    }
                    if let Some(pitch) = pitch(note.row) {
                        voice.stop_note(pitch);
                    }
                }
            }

            for note in pattern.starting_at(column) {
                let Some(pitch) = pitch(note.row) else {
                    continue;
                };
                if wraps(note, columns) {
                    self.wrapping.insert(note.key());
                }
                let velocity = note.velocity.clamp(1, 127);
                let duration = note.duration_ms();
                trace!("Playing note {} velocity {} for {} ms", pitch, velocity, duration);
                voice.trigger_note(velocity, duration, Some(pitch));
            }
        }

        self.last_step = Some(column);
        self.playhead = column;
        self.notifier.emit(PianoRollEvent::PlayheadMoved(column));
    }
}

impl SequenceSource for PianoRollSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn process_tick(&mut self, tick: u64) -> Result<()> {
        if tick % TICKS_PER_STEP != 0 {
            return Ok(());
        }
        let column = ((tick / TICKS_PER_STEP) % self.config.columns as u64) as u32;
        self.advance_to(column);
        Ok(())
    }

    fn reset(&mut self) {
        self.stop_all();
        self.playhead = 0;
        self.last_step = None;
    }
}
