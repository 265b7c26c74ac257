//! Steps and step tracks

use serde::{Deserialize, Serialize};

/// Unique identifier for tracks within a step sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Track-level defaults for newly written steps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDefaults {
    pub velocity: f32,
    pub probability: f32,
    pub duration: f32,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            velocity: 100.0,
            probability: 1.0,
            duration: 1.0,
        }
    }
}

/// A single step of a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Trigger flag (0 = silent)
    pub value: u8,
    /// Raw velocity before sensitivity scaling
    pub velocity: f32,
    /// Chance to fire (0.0-1.0)
    pub probability: f32,
    /// Length multiplier applied to the sequence step duration
    pub duration: f32,
}

impl Step {
    pub fn new(value: u8, defaults: &StepDefaults) -> Self {
        Self {
            value,
            velocity: defaults.velocity,
            probability: defaults.probability,
            duration: defaults.duration,
        }
    }

    pub fn is_active(&self) -> bool {
        self.value != 0
    }
}

/// Partial step update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepUpdate {
    pub value: Option<u8>,
    pub velocity: Option<f32>,
    pub probability: Option<f32>,
    pub duration: Option<f32>,
}

impl StepUpdate {
    pub fn velocity(velocity: f32) -> Self {
        Self {
            velocity: Some(velocity),
            ..Default::default()
        }
    }

    pub fn apply(&self, step: &mut Step) {
        if let Some(value) = self.value {
            step.value = value;
        }
        if let Some(velocity) = self.velocity {
            step.velocity = velocity;
        }
        if let Some(probability) = self.probability {
            step.probability = probability.clamp(0.0, 1.0);
        }
        if let Some(duration) = self.duration {
            step.duration = duration.max(0.0);
        }
    }
}

/// Fixed-length (until resized) row of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    steps: Vec<Option<Step>>,
    defaults: StepDefaults,
}

impl Track {
    pub fn new(id: TrackId, length: usize) -> Self {
        Self::with_defaults(id, length, StepDefaults::default())
    }

    pub fn with_defaults(id: TrackId, length: usize, defaults: StepDefaults) -> Self {
        Self {
            id,
            steps: vec![None; length],
            defaults,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Write a step built from the track defaults, then `params` on top.
    /// Returns false when `index` is out of range.
    pub fn set_step(&mut self, index: usize, value: u8, params: StepUpdate) -> bool {
        let Some(slot) = self.steps.get_mut(index) else {
            return false;
        };
        let mut step = Step::new(value, &self.defaults);
        params.apply(&mut step);
        step.value = params.value.unwrap_or(value);
        *slot = Some(step);
        true
    }

    /// Merge `update` into an existing step
    pub fn update_step(&mut self, index: usize, update: StepUpdate) -> bool {
        let Some(Some(step)) = self.steps.get_mut(index) else {
            return false;
        };
        update.apply(step);
        true
    }

    pub fn clear_step(&mut self, index: usize) -> bool {
        let Some(slot) = self.steps.get_mut(index) else {
            return false;
        };
        *slot = None;
        true
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)?.as_ref()
    }

    /// Trigger value at `index` (0 for empty or out-of-range steps)
    pub fn step_value(&self, index: usize) -> u8 {
        self.step(index).map_or(0, |s| s.value)
    }

    /// Write values from the start of the track; extra values are ignored
    pub fn set_steps(&mut self, values: &[u8]) {
        let len = self.steps.len();
        for (index, &value) in values.iter().take(len).enumerate() {
            self.set_step(index, value, StepUpdate::default());
        }
    }

    pub fn clear(&mut self) {
        self.steps.fill(None);
    }

    /// Resize, keeping steps at retained indices and padding with empty steps
    pub fn resize(&mut self, length: usize) {
        self.steps.resize(length, None);
    }

    pub fn set_defaults(&mut self, defaults: StepDefaults) {
        self.defaults = defaults;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_step_uses_defaults() {
        let defaults = StepDefaults {
            velocity: 80.0,
            probability: 0.5,
            duration: 2.0,
        };
        let mut track = Track::with_defaults(TrackId(1), 4, defaults);

        assert!(track.set_step(1, 1, StepUpdate::velocity(110.0)));

        let step = track.step(1).unwrap();
        assert_eq!(step.value, 1);
        assert_eq!(step.velocity, 110.0);
        assert_eq!(step.probability, 0.5);
        assert_eq!(step.duration, 2.0);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut track = Track::new(TrackId(1), 4);
        assert!(!track.set_step(4, 1, StepUpdate::default()));
        assert!(!track.update_step(9, StepUpdate::velocity(1.0)));
        assert!(!track.clear_step(4));
        assert_eq!(track.step_value(100), 0);
    }

    #[test]
    fn test_update_merges_fields() {
        let mut track = Track::new(TrackId(1), 4);
        assert!(!track.update_step(0, StepUpdate::velocity(50.0)));

        track.set_step(0, 1, StepUpdate::default());
        let update = StepUpdate {
            probability: Some(0.25),
            ..Default::default()
        };
        assert!(track.update_step(0, update));

        let step = track.step(0).unwrap();
        assert_eq!(step.velocity, 100.0);
        assert_eq!(step.probability, 0.25);
    }

    #[test]
    fn test_resize_preserves_retained_steps() {
        let mut track = Track::new(TrackId(1), 16);
        let values: Vec<u8> = (0..16).map(|i| (i % 3 == 0) as u8).collect();
        track.set_steps(&values);

        track.resize(8);
        assert_eq!(track.len(), 8);
        track.resize(16);
        assert_eq!(track.len(), 16);

        for i in 0..8 {
            assert_eq!(track.step_value(i), values[i]);
        }
        for i in 8..16 {
            assert_eq!(track.step_value(i), 0);
        }
    }

    #[test]
    fn test_clear_keeps_length() {
        let mut track = Track::new(TrackId(2), 8);
        track.set_steps(&[1, 0, 0, 1, 0, 0, 1, 0]);
        assert_eq!(track.step_value(3), 1);

        track.clear();
        assert_eq!(track.len(), 8);
        assert!((0..8).all(|i| track.step(i).is_none()));
    }
}
