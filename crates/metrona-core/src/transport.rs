//! Master clock
//!
//! The transport converts wall-clock milliseconds into whole clock pulses and
//! fans each pulse out to the registered sequence sources. It never sleeps or
//! spawns anything itself: a host loop calls [`Transport::poll`] with the
//! current time and the transport works out how many pulses are due.
//!
//! Pulses are counted from a phase reference rather than from the time of the
//! last poll, so late or jittery polls never accumulate drift. The fractional
//! remainder of a poll carries into the next one.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::event::Notifier;
use crate::source::{SequenceSource, Source, SourceId};
use crate::timing::{PPQN, Tempo};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Started,
    Stopped,
    /// Pulse count since start (1 for the first pulse)
    Tick(u64),
    TempoChanged(f64),
    SourceFailed {
        source_id: SourceId,
        reason: String,
    },
}

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

/// Point on the wall clock from which pulses are counted
#[derive(Debug, Clone, Copy, Default)]
struct PhaseReference {
    origin_ms: f64,
    /// Pulses advanced since `origin_ms`
    ticks: u64,
}

impl PhaseReference {
    fn at(origin_ms: f64) -> Self {
        Self {
            origin_ms,
            ticks: 0,
        }
    }

    /// Wall-clock time of the last advanced pulse
    fn reference_ms(&self, tempo: Tempo) -> f64 {
        self.origin_ms + self.ticks as f64 * tempo.tick_interval_ms()
    }

    /// Whole pulses between `origin_ms` and `now_ms`
    fn ticks_elapsed(&self, tempo: Tempo, now_ms: f64) -> u64 {
        let elapsed = now_ms - self.origin_ms;
        if !(elapsed > 0.0) {
            return 0;
        }
        // elapsed / interval, written without the rounded interval
        (elapsed * tempo.bpm() * PPQN as f64 / 60_000.0).floor() as u64
    }
}

pub struct Transport {
    tempo: Tempo,
    state: TransportState,
    current_tick: u64,
    phase: PhaseReference,
    sources: Vec<Source>,
    notifier: Notifier<TransportEvent>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::with_tempo(Tempo::default())
    }

    pub fn with_tempo(tempo: Tempo) -> Self {
        Self {
            tempo,
            state: TransportState::Stopped,
            current_tick: 0,
            phase: PhaseReference::default(),
            sources: Vec::new(),
            notifier: Notifier::new(),
        }
    }

    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<TransportEvent> {
        self.notifier.subscribe()
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn tick_interval_ms(&self) -> f64 {
        self.tempo.tick_interval_ms()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Change tempo without restarting. The tick counter is kept and the new
    /// interval applies from the last advanced pulse onwards.
    pub fn set_tempo(&mut self, bpm: f64) {
        if bpm.is_nan() {
            warn!("Ignoring NaN tempo");
            return;
        }
        let tempo = Tempo::new(bpm);
        if tempo.bpm() != bpm {
            warn!("Tempo {} clamped to {}", bpm, tempo);
        }

        if self.is_running() {
            self.phase = PhaseReference::at(self.phase.reference_ms(self.tempo));
        }
        self.tempo = tempo;

        for source in &mut self.sources {
            source.tempo_changed(tempo);
        }
        debug!("Tempo set to {}", tempo);
        self.notifier.emit(TransportEvent::TempoChanged(tempo.bpm()));
    }

    /// Start counting pulses from `now_ms`. No-op while running.
    pub fn start(&mut self, now_ms: f64) {
        if self.is_running() {
            return;
        }
        self.state = TransportState::Playing;
        self.current_tick = 0;
        self.phase = PhaseReference::at(now_ms);
        info!("Transport started at {}", self.tempo);
        self.notifier.emit(TransportEvent::Started);
    }

    /// Stop and rewind every source. No-op while stopped.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.state = TransportState::Stopped;
        self.current_tick = 0;
        for source in &mut self.sources {
            source.reset();
        }
        info!("Transport stopped");
        self.notifier.emit(TransportEvent::Stopped);
    }

    /// Add a source, replacing any source registered under the same id.
    ///
    /// While running, the source is immediately fed the latest pulse so it
    /// does not lag behind the others.
    pub fn register_source(&mut self, source: impl Into<Source>) {
        let mut source = source.into();
        source.tempo_changed(self.tempo);

        let id = source.id().clone();
        info!("Registering {} source {}", source.kind(), id);
        let index = match self.sources.iter().position(|s| *s.id() == id) {
            Some(index) => {
                warn!("Replacing source {}", id);
                self.sources[index] = source;
                index
            }
            None => {
                self.sources.push(source);
                self.sources.len() - 1
            }
        };

        if self.is_running() && self.current_tick > 0 {
            let position = self.current_tick - 1;
            Self::dispatch(&mut self.sources[index], position, &mut self.notifier);
        }
    }

    pub fn unregister_source(&mut self, id: &SourceId) -> Option<Source> {
        let index = self.sources.iter().position(|s| s.id() == id)?;
        info!("Unregistering source {}", id);
        Some(self.sources.remove(index))
    }

    pub fn source(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id().clone()).collect()
    }

    /// Advance every pulse due at `now_ms`. Returns the number of pulses fired.
    pub fn poll(&mut self, now_ms: f64) -> u64 {
        if !self.is_running() {
            return 0;
        }

        let elapsed = self.phase.ticks_elapsed(self.tempo, now_ms);
        let due = elapsed.saturating_sub(self.phase.ticks);
        if due == 0 {
            return 0;
        }
        self.phase.ticks = elapsed;

        for _ in 0..due {
            self.current_tick += 1;
            let position = self.current_tick - 1;
            for source in &mut self.sources {
                Self::dispatch(source, position, &mut self.notifier);
            }
            self.notifier.emit(TransportEvent::Tick(self.current_tick));
        }
        due
    }

    fn dispatch(source: &mut Source, position: u64, notifier: &mut Notifier<TransportEvent>) {
        if let Err(e) = source.process_tick(position) {
            error!("Source {} failed at pulse {}: {}", source.id(), position, e);
            notifier.emit(TransportEvent::SourceFailed {
                source_id: source.id().clone(),
                reason: e.to_string(),
            });
        }
    }
}
