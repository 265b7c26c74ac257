//! Pattern bank for piano-roll sequencing

use std::collections::BTreeMap;

use super::note::{Note, NoteKey};

/// Number of pattern slots per piano roll
pub const PATTERN_SLOTS: usize = 16;

/// A switchable set of notes with its own time signature
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Pattern name (e.g., "Intro", "Verse")
    pub name: String,
    pub beats_per_bar: u32,
    notes: BTreeMap<NoteKey, Note>,
}

impl Pattern {
    pub fn new(beats_per_bar: u32) -> Self {
        Self {
            name: String::new(),
            beats_per_bar: beats_per_bar.max(1),
            notes: BTreeMap::new(),
        }
    }

    /// Insert a note; an existing note at the same (row, col) is kept
    pub fn insert(&mut self, note: Note) -> bool {
        if self.notes.contains_key(&note.key()) {
            return false;
        }
        self.notes.insert(note.key(), note);
        true
    }

    /// Overwrite the note stored at `note.key()`
    pub fn replace(&mut self, note: Note) -> Option<Note> {
        self.notes.insert(note.key(), note)
    }

    pub fn remove(&mut self, key: NoteKey) -> Option<Note> {
        self.notes.remove(&key)
    }

    pub fn get(&self, key: NoteKey) -> Option<&Note> {
        self.notes.get(&key)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn to_vec(&self) -> Vec<Note> {
        self.notes.values().copied().collect()
    }

    /// Notes whose start step is `col`
    pub fn starting_at(&self, col: u32) -> impl Iterator<Item = &Note> {
        self.notes.values().filter(move |n| n.col == col)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}

/// Fixed set of pattern slots with exactly one current pattern
#[derive(Debug, Clone)]
pub struct PatternBank {
    patterns: Vec<Pattern>,
    active_pattern: usize,
}

impl PatternBank {
    pub fn new(beats_per_bar: u32) -> Self {
        Self {
            patterns: (0..PATTERN_SLOTS).map(|_| Pattern::new(beats_per_bar)).collect(),
            active_pattern: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active_pattern
    }

    pub fn active(&self) -> &Pattern {
        &self.patterns[self.active_pattern]
    }

    pub fn active_mut(&mut self) -> &mut Pattern {
        &mut self.patterns[self.active_pattern]
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    /// Slot access for renaming; note edits go through the owning piano roll
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Pattern> {
        self.patterns.get_mut(index)
    }

    /// Make `index` current; false when out of range
    pub fn set_active(&mut self, index: usize) -> bool {
        if index >= self.patterns.len() {
            return false;
        }
        self.active_pattern = index;
        true
    }

    /// Deep-copy a pattern into an inactive slot
    pub fn copy_pattern(&mut self, from: usize, to: usize) -> bool {
        let len = self.patterns.len();
        if from >= len || to >= len || from == to || to == self.active_pattern {
            return false;
        }
        self.patterns[to] = self.patterns[from].clone();
        true
    }

    /// Reset an inactive slot to an empty pattern
    pub fn clear_pattern(&mut self, index: usize) -> bool {
        if index >= self.patterns.len() || index == self.active_pattern {
            return false;
        }
        let beats_per_bar = self.patterns[index].beats_per_bar;
        self.patterns[index] = Pattern::new(beats_per_bar);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_existing() {
        let mut pattern = Pattern::new(4);
        assert!(pattern.insert(Note::new(2, 5, 1, 100)));
        assert!(!pattern.insert(Note::new(2, 5, 8, 20)));

        let kept = pattern.get(NoteKey::new(2, 5)).unwrap();
        assert_eq!(kept.length, 1);
        assert_eq!(kept.velocity, 100);
        assert_eq!(pattern.len(), 1);
    }

    #[test]
    fn test_starting_at() {
        let mut pattern = Pattern::new(4);
        pattern.insert(Note::new(0, 4, 1, 100));
        pattern.insert(Note::new(7, 4, 2, 100));
        pattern.insert(Note::new(1, 5, 1, 100));

        let rows: Vec<u32> = pattern.starting_at(4).map(|n| n.row).collect();
        assert_eq!(rows, vec![0, 7]);
    }

    #[test]
    fn test_copy_is_deep() {
        let mut bank = PatternBank::new(4);
        bank.active_mut().insert(Note::new(0, 0, 1, 100));

        assert!(bank.copy_pattern(0, 3));
        bank.active_mut().insert(Note::new(1, 1, 1, 100));

        assert_eq!(bank.get(3).unwrap().len(), 1);
        assert_eq!(bank.active().len(), 2);
    }

    #[test]
    fn test_copy_and_clear_reject_active_slot() {
        let mut bank = PatternBank::new(4);
        bank.active_mut().insert(Note::new(0, 0, 1, 100));

        assert!(!bank.copy_pattern(2, 0));
        assert!(!bank.clear_pattern(0));
        assert!(!bank.copy_pattern(0, PATTERN_SLOTS));
        assert_eq!(bank.active().len(), 1);
    }

    #[test]
    fn test_clear_inactive_slot() {
        let mut bank = PatternBank::new(3);
        bank.copy_pattern(0, 1);
        assert!(bank.set_active(1));
        bank.active_mut().insert(Note::new(0, 0, 1, 100));
        assert!(bank.set_active(0));

        assert!(bank.clear_pattern(1));
        assert!(bank.get(1).unwrap().is_empty());
        assert_eq!(bank.get(1).unwrap().beats_per_bar, 3);
        assert!(!bank.set_active(PATTERN_SLOTS));
    }
}
