//! Flat step-grid sequencer

use tracing::warn;

use crate::Result;
use crate::event::Notifier;
use crate::source::{SequenceSource, SourceId};
use crate::timing::TICKS_PER_STEP;
use crate::voice::Voice;

pub const DEFAULT_GRID_STEPS: usize = 16;
const GRID_VELOCITY: u8 = 127;
const GRID_NOTE_MS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEvent {
    StepChanged(usize),
    GridUpdated(Vec<bool>),
}

/// One row of on/off cells played as sixteenth notes
pub struct StepGridSource {
    id: SourceId,
    grid: Vec<bool>,
    current_step: usize,
    instrument: Option<Box<dyn Voice>>,
    notifier: Notifier<GridEvent>,
}

impl StepGridSource {
    pub fn new(id: impl Into<SourceId>, steps: usize) -> Self {
        Self {
            id: id.into(),
            grid: vec![false; steps.max(1)],
            current_step: 0,
            instrument: None,
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<GridEvent> {
        self.notifier.subscribe()
    }

    pub fn steps(&self) -> &[bool] {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn is_set(&self, step: usize) -> bool {
        self.grid.get(step).copied().unwrap_or(false)
    }

    pub fn toggle_step(&mut self, step: usize) -> bool {
        let Some(cell) = self.grid.get_mut(step) else {
            return false;
        };
        *cell = !*cell;
        self.notifier.emit(GridEvent::GridUpdated(self.grid.clone()));
        true
    }

    pub fn set_step(&mut self, step: usize, on: bool) -> bool {
        let Some(cell) = self.grid.get_mut(step) else {
            return false;
        };
        *cell = on;
        self.notifier.emit(GridEvent::GridUpdated(self.grid.clone()));
        true
    }

    /// Write cells from the start of the grid; extra values are ignored
    pub fn set_steps(&mut self, cells: &[bool]) {
        for (cell, &on) in self.grid.iter_mut().zip(cells) {
            *cell = on;
        }
        self.notifier.emit(GridEvent::GridUpdated(self.grid.clone()));
    }

    /// Resize, keeping retained cells and padding with empty ones
    pub fn resize(&mut self, steps: usize) -> bool {
        if steps == 0 {
            warn!("Ignoring empty grid size for {}", self.id);
            return false;
        }
        self.grid.resize(steps, false);
        self.current_step = self.current_step.min(steps - 1);
        self.notifier.emit(GridEvent::GridUpdated(self.grid.clone()));
        true
    }

    pub fn set_instrument(&mut self, voice: Box<dyn Voice>) {
        self.instrument = Some(voice);
    }

    pub fn clear_instrument(&mut self) -> Option<Box<dyn Voice>> {
        self.instrument.take()
    }
}

impl SequenceSource for StepGridSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn process_tick(&mut self, tick: u64) -> Result<()> {
        if tick % TICKS_PER_STEP != 0 {
            return Ok(());
        }
        self.current_step = ((tick / TICKS_PER_STEP) % self.grid.len() as u64) as usize;

        if self.grid[self.current_step] {
            if let Some(voice) = self.instrument.as_mut() {
                voice.trigger_note(GRID_VELOCITY, GRID_NOTE_MS, None);
            }
        }

        self.notifier.emit(GridEvent::StepChanged(self.current_step));
        Ok(())
    }

    fn reset(&mut self) {
        self.current_step = 0;
        if let Some(voice) = self.instrument.as_mut() {
            voice.stop_all_notes();
        }
    }
}
