//! Step-track sequence: several tracks sharing one bar/beat/step grid

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;
use crate::event::Notifier;
use crate::source::{SequenceSource, SourceId};
use crate::step::{StepDefaults, Track, TrackId};
use crate::timing::{PPQN, Tempo};
use crate::voice::Voice;

/// Upper bound on `bars * beats_per_bar * steps_per_beat`
pub const MAX_SEQUENCE_STEPS: u32 = 4096;

/// Sequence timing and dynamics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub bars: u32,
    pub beats_per_bar: u32,
    pub steps_per_beat: u32,
    /// Step duration as a fraction of a whole note
    pub step_duration: f32,
    /// Velocity multiplier (0.0-2.0)
    pub velocity_sensitivity: f32,
    /// Extra length for odd steps (0.0-1.0)
    pub swing_amount: f32,
    pub step_defaults: StepDefaults,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            bars: 1,
            beats_per_bar: 4,
            steps_per_beat: 4,
            step_duration: 1.0 / 16.0,
            velocity_sensitivity: 1.0,
            swing_amount: 0.0,
            step_defaults: StepDefaults::default(),
        }
    }
}

/// Named starting points for a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencePreset {
    #[default]
    Default,
    DrumMachine,
    Melodic,
    Triplets,
    Slow,
}

impl SequenceConfig {
    pub fn preset(preset: SequencePreset) -> Self {
        let base = Self::default();
        match preset {
            SequencePreset::Default | SequencePreset::DrumMachine => base,
            SequencePreset::Melodic => Self { bars: 2, ..base },
            SequencePreset::Triplets => Self {
                steps_per_beat: 3,
                step_duration: 1.0 / 12.0,
                ..base
            },
            SequencePreset::Slow => Self {
                beats_per_bar: 2,
                steps_per_beat: 2,
                step_duration: 1.0 / 8.0,
                ..base
            },
        }
    }

    /// Total steps in the sequence
    pub fn length(&self) -> usize {
        (self.bars as usize)
            .saturating_mul(self.beats_per_bar as usize)
            .saturating_mul(self.steps_per_beat as usize)
    }

    /// Clamp every field into its valid range
    pub fn sanitized(mut self) -> Self {
        for (name, field) in [
            ("bars", &mut self.bars),
            ("beats_per_bar", &mut self.beats_per_bar),
            ("steps_per_beat", &mut self.steps_per_beat),
        ] {
            if *field == 0 {
                warn!("Sequence {} must be positive, using 1", name);
                *field = 1;
            }
        }
        if self.steps_per_beat > PPQN {
            warn!("Sequence steps_per_beat {} above {}, clamping", self.steps_per_beat, PPQN);
            self.steps_per_beat = PPQN;
        }
        let max_beats = MAX_SEQUENCE_STEPS / self.steps_per_beat;
        if self.beats_per_bar > max_beats {
            warn!("Sequence beats_per_bar {} above {}, clamping", self.beats_per_bar, max_beats);
            self.beats_per_bar = max_beats;
        }
        let per_bar = self.beats_per_bar * self.steps_per_beat;
        if self.bars.checked_mul(per_bar).is_none_or(|len| len > MAX_SEQUENCE_STEPS) {
            let bars = MAX_SEQUENCE_STEPS / per_bar;
            warn!(
                "Sequence of {} bars exceeds {} steps, using {} bars",
                self.bars, MAX_SEQUENCE_STEPS, bars
            );
            self.bars = bars;
        }
        self.step_duration = sanitize_f32(self.step_duration, 0.0, f32::MAX, 1.0 / 16.0);
        self.velocity_sensitivity = sanitize_f32(self.velocity_sensitivity, 0.0, 2.0, 1.0);
        self.swing_amount = sanitize_f32(self.swing_amount, 0.0, 1.0, 0.0);
        self
    }
}

fn sanitize_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// A step that fired
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepTrigger {
    pub track_id: TrackId,
    pub bar: u32,
    pub beat: u32,
    pub step: u32,
    pub step_index: usize,
    /// Velocity after sensitivity scaling
    pub velocity: u8,
    /// Swung duration as a fraction of a whole note
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    Trigger(StepTrigger),
    /// Emitted on every pulse for position display
    Position {
        bar: u32,
        beat: u32,
        step: u32,
        step_index: usize,
    },
    LengthChanged(usize),
}

/// Linear step-track sequence source
pub struct StepTrackSource {
    id: SourceId,
    config: SequenceConfig,
    tracks: Vec<Track>,
    voices: HashMap<TrackId, Box<dyn Voice>>,
    tempo: Tempo,
    rng: fastrand::Rng,
    notifier: Notifier<SequenceEvent>,
}

impl StepTrackSource {
    pub fn new(id: impl Into<SourceId>, config: SequenceConfig) -> Self {
        Self {
            id: id.into(),
            config: config.sanitized(),
            tracks: Vec::new(),
            voices: HashMap::new(),
            tempo: Tempo::default(),
            rng: fastrand::Rng::new(),
            notifier: Notifier::new(),
        }
    }

    pub fn with_preset(id: impl Into<SourceId>, preset: SequencePreset) -> Self {
        Self::new(id, SequenceConfig::preset(preset))
    }

    /// Reseed the probability generator (for reproducible playback)
    pub fn seed(&mut self, seed: u64) {
        self.rng = fastrand::Rng::with_seed(seed);
    }

    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<SequenceEvent> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Replace the configuration. Tracks take the new step defaults and are
    /// resized when the length changes.
    pub fn set_config(&mut self, config: SequenceConfig) {
        let old_length = self.length();
        self.config = config.sanitized();
        for track in &mut self.tracks {
            track.set_defaults(self.config.step_defaults);
        }
        let length = self.length();
        if length != old_length {
            for track in &mut self.tracks {
                track.resize(length);
            }
            debug!("Sequence {} length {} -> {}", self.id, old_length, length);
            self.notifier.emit(SequenceEvent::LengthChanged(length));
        }
    }

    pub fn apply_preset(&mut self, preset: SequencePreset) {
        self.set_config(SequenceConfig::preset(preset));
    }

    pub fn length(&self) -> usize {
        self.config.length()
    }

    /// Add (or replace) a track, optionally seeding its step values
    pub fn add_track(&mut self, id: TrackId, initial: &[u8]) -> &mut Track {
        let mut track = Track::with_defaults(id, self.length(), self.config.step_defaults);
        track.set_steps(initial);

        let index = match self.tracks.iter().position(|t| t.id == id) {
            Some(index) => {
                self.tracks[index] = track;
                index
            }
            None => {
                self.tracks.push(track);
                self.tracks.len() - 1
            }
        };
        &mut self.tracks[index]
    }

    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        if let Some(mut voice) = self.voices.remove(&id) {
            voice.stop_all_notes();
        }
        let pos = self.tracks.iter().position(|t| t.id == id)?;
        Some(self.tracks.remove(pos))
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Attach a voice to a track; the previous voice is silenced first
    pub fn set_track_voice(&mut self, id: TrackId, voice: Box<dyn Voice>) -> bool {
        if self.track(id).is_none() {
            return false;
        }
        if let Some(mut old) = self.voices.insert(id, voice) {
            old.stop_all_notes();
        }
        true
    }

    pub fn clear_track_voice(&mut self, id: TrackId) -> bool {
        let Some(mut voice) = self.voices.remove(&id) else {
            return false;
        };
        voice.stop_all_notes();
        true
    }

    pub fn calculate_step_index(&self, bar: u32, beat: u32, step: u32) -> usize {
        let beats_per_bar = self.config.beats_per_bar as usize;
        let steps_per_beat = self.config.steps_per_beat as usize;
        bar as usize * beats_per_bar * steps_per_beat
            + beat as usize * steps_per_beat
            + step as usize
    }

    /// Step duration with swing applied to odd steps
    pub fn step_duration(&self, step_index: usize) -> f32 {
        let duration = self.config.step_duration;
        let swing = self.config.swing_amount;
        if swing > 0.0 && step_index % 2 == 1 {
            return duration * (1.0 + swing);
        }
        duration
    }

    /// Evaluate one pulse given as (beat count, pulse within beat)
    pub fn process_position(&mut self, beat_index: u64, sub_tick: u32) {
        let beats_per_bar = self.config.beats_per_bar as u64;
        let steps_per_beat = self.config.steps_per_beat as u64;
        let ppqn = PPQN as u64;

        let bar = ((beat_index / beats_per_bar) % self.config.bars as u64) as u32;
        let beat = (beat_index % beats_per_bar) as u32;
        let step = (sub_tick as u64 * steps_per_beat / ppqn) as u32;
        let step_index = self.calculate_step_index(bar, beat, step);

        // A step fires only on the first pulse it covers
        let step_start = (step as u64 * ppqn).div_ceil(steps_per_beat);
        if sub_tick as u64 == step_start && step_index < self.length() {
            let triggers = self.collect_triggers(bar, beat, step, step_index);
            for trigger in triggers {
                self.dispatch(&trigger);
                self.notifier.emit(SequenceEvent::Trigger(trigger));
            }
        }

        self.notifier.emit(SequenceEvent::Position {
            bar,
            beat,
            step,
            step_index,
        });
    }

    fn collect_triggers(
        &mut self,
        bar: u32,
        beat: u32,
        step: u32,
        step_index: usize,
    ) -> Vec<StepTrigger> {
        let sensitivity = self.config.velocity_sensitivity;
        let duration = self.step_duration(step_index);
        let mut triggers = Vec::new();

        for track in &self.tracks {
            let Some(data) = track.step(step_index) else {
                continue;
            };
            if !data.is_active() {
                continue;
            }
            if data.probability < 1.0 && self.rng.f32() >= data.probability {
                continue;
            }
            triggers.push(StepTrigger {
                track_id: track.id,
                bar,
                beat,
                step,
                step_index,
                velocity: (data.velocity * sensitivity).round().clamp(0.0, 127.0) as u8,
                duration: duration * data.duration,
            });
        }
        triggers
    }

    fn dispatch(&mut self, trigger: &StepTrigger) {
        let Some(voice) = self.voices.get_mut(&trigger.track_id) else {
            return;
        };
        let duration_ms = self.tempo.note_duration_ms(trigger.duration as f64).round() as u32;
        debug!(
            "{} step {} -> velocity {}, {} ms",
            trigger.track_id, trigger.step_index, trigger.velocity, duration_ms
        );
        voice.trigger_note(trigger.velocity.clamp(1, 127), duration_ms, None);
    }
}

impl SequenceSource for StepTrackSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn process_tick(&mut self, tick: u64) -> Result<()> {
        let ppqn = PPQN as u64;
        self.process_position(tick / ppqn, (tick % ppqn) as u32);
        Ok(())
    }

    fn tempo_changed(&mut self, tempo: Tempo) {
        self.tempo = tempo;
    }

    fn reset(&mut self) {
        for voice in self.voices.values_mut() {
            voice.stop_all_notes();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepUpdate;
    use crate::voice::VoiceCommand;
    use crate::voice::testing::{RecordingVoice, triggers};

    fn drain_triggers(rx: &crossbeam_channel::Receiver<SequenceEvent>) -> Vec<StepTrigger> {
        rx.try_iter()
            .filter_map(|e| match e {
                SequenceEvent::Trigger(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_presets() {
        assert_eq!(SequenceConfig::preset(SequencePreset::Default).length(), 16);
        assert_eq!(SequenceConfig::preset(SequencePreset::Melodic).length(), 32);
        assert_eq!(SequenceConfig::preset(SequencePreset::Triplets).length(), 12);
        assert_eq!(SequenceConfig::preset(SequencePreset::Slow).length(), 4);
    }

    #[test]
    fn test_sanitized_clamps_invalid_fields() {
        let config = SequenceConfig {
            bars: 0,
            velocity_sensitivity: 5.0,
            swing_amount: -1.0,
            step_duration: f32::NAN,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.bars, 1);
        assert_eq!(config.velocity_sensitivity, 2.0);
        assert_eq!(config.swing_amount, 0.0);
        assert_eq!(config.step_duration, 1.0 / 16.0);
    }

    #[test]
    fn test_oversized_dimensions_are_capped() {
        let config = SequenceConfig {
            bars: 70_000,
            beats_per_bar: 70_000,
            steps_per_beat: 100,
            ..Default::default()
        };
        let mut seq = StepTrackSource::new("seq", config);

        assert_eq!(seq.config().steps_per_beat, PPQN);
        assert_eq!(seq.config().beats_per_bar, MAX_SEQUENCE_STEPS / PPQN);
        assert_eq!(seq.config().bars, 1);
        assert!(seq.length() <= MAX_SEQUENCE_STEPS as usize);
        seq.add_track(TrackId(1), &[1]);
        seq.process_tick(0).unwrap();

        let raw = SequenceConfig {
            bars: u32::MAX,
            beats_per_bar: u32::MAX,
            steps_per_beat: u32::MAX,
            ..Default::default()
        };
        assert_eq!(raw.length(), usize::MAX);
    }

    #[test]
    fn test_step_index_formula() {
        let seq = StepTrackSource::new("seq", SequenceConfig {
            bars: 2,
            ..Default::default()
        });
        assert_eq!(seq.calculate_step_index(0, 0, 0), 0);
        assert_eq!(seq.calculate_step_index(0, 1, 2), 6);
        assert_eq!(seq.calculate_step_index(1, 3, 3), 31);
    }

    #[test]
    fn test_step_fires_once_per_step() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.add_track(TrackId(1), &[1, 1, 0, 0]);
        let rx = seq.subscribe();

        // One quarter note: pulses 0..24 cover steps 0..4
        for tick in 0..24 {
            seq.process_tick(tick).unwrap();
        }

        let fired = drain_triggers(&rx);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].step_index, 0);
        assert_eq!(fired[1].step_index, 1);
    }

    #[test]
    fn test_position_emitted_every_pulse() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        let rx = seq.subscribe();
        for tick in 0..10 {
            seq.process_tick(tick).unwrap();
        }
        let positions = rx
            .try_iter()
            .filter(|e| matches!(e, SequenceEvent::Position { .. }))
            .count();
        assert_eq!(positions, 10);
    }

    #[test]
    fn test_sequence_loops_after_last_bar() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.add_track(TrackId(1), &[1]);
        let rx = seq.subscribe();

        // Bar of 4 beats = 96 pulses; pulse 96 is step 0 again
        seq.process_tick(0).unwrap();
        seq.process_tick(96).unwrap();

        let fired = drain_triggers(&rx);
        assert_eq!(fired.len(), 2);
        assert!(fired.iter().all(|t| t.step_index == 0 && t.bar == 0));
    }

    #[test]
    fn test_velocity_sensitivity() {
        let config = SequenceConfig {
            velocity_sensitivity: 0.5,
            ..Default::default()
        };
        let mut seq = StepTrackSource::new("seq", config);
        seq.add_track(TrackId(1), &[]).set_step(0, 1, StepUpdate::velocity(101.0));
        let rx = seq.subscribe();

        seq.process_tick(0).unwrap();

        let fired = drain_triggers(&rx);
        assert_eq!(fired[0].velocity, 51);
    }

    #[test]
    fn test_swing_extends_odd_steps() {
        let config = SequenceConfig {
            swing_amount: 0.5,
            ..Default::default()
        };
        let seq = StepTrackSource::new("seq", config);
        assert_eq!(seq.step_duration(0), 1.0 / 16.0);
        assert_eq!(seq.step_duration(1), 1.0 / 16.0 * 1.5);
    }

    #[test]
    fn test_zero_probability_never_fires() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.seed(7);
        let update = StepUpdate {
            probability: Some(0.0),
            ..Default::default()
        };
        seq.add_track(TrackId(1), &[]).set_step(0, 1, update);
        let rx = seq.subscribe();

        for bar in 0..8 {
            seq.process_tick(bar * 96).unwrap();
        }
        assert!(drain_triggers(&rx).is_empty());
    }

    #[test]
    fn test_config_change_resizes_tracks() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.add_track(TrackId(1), &[1, 0, 1]);
        let rx = seq.subscribe();

        seq.apply_preset(SequencePreset::Melodic);

        assert_eq!(seq.track(TrackId(1)).unwrap().len(), 32);
        assert_eq!(seq.track(TrackId(1)).unwrap().step_value(2), 1);
        assert_eq!(rx.try_recv().ok(), Some(SequenceEvent::LengthChanged(32)));
    }

    #[test]
    fn test_config_change_updates_step_defaults() {
        let mut seq = StepTrackSource::with_preset("seq", SequencePreset::DrumMachine);
        seq.add_track(TrackId(1), &[]);
        let rx = seq.subscribe();

        let config = SequenceConfig {
            step_defaults: StepDefaults {
                velocity: 64.0,
                ..Default::default()
            },
            ..seq.config().clone()
        };
        seq.set_config(config);
        let track = seq.track_mut(TrackId(1)).unwrap();
        track.set_step(0, 1, StepUpdate::default());

        assert_eq!(track.step(0).unwrap().velocity, 64.0);
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_track_voice_receives_duration() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.add_track(TrackId(1), &[1]);
        let (voice, log) = RecordingVoice::new();
        assert!(seq.set_track_voice(TrackId(1), Box::new(voice)));
        assert!(!seq.set_track_voice(TrackId(9), Box::new(RecordingVoice::new().0)));
        seq.tempo_changed(Tempo::new(120.0));

        seq.process_tick(0).unwrap();

        assert_eq!(
            triggers(&log),
            vec![VoiceCommand::Trigger {
                velocity: 100,
                duration_ms: 125,
                pitch: None,
            }]
        );
    }

    #[test]
    fn test_remove_track() {
        let mut seq = StepTrackSource::new("seq", SequenceConfig::default());
        seq.add_track(TrackId(1), &[1]);
        seq.add_track(TrackId(2), &[1]);
        assert!(seq.remove_track(TrackId(1)).is_some());
        assert!(seq.remove_track(TrackId(1)).is_none());
        assert_eq!(seq.tracks().len(), 1);
    }
}
