//! Session files
//!
//! A session describes the tempo and the sources to register, stored as TOML
//! under the user config directory by default.

use std::path::{Path, PathBuf};

use metrona_core::grid::DEFAULT_GRID_STEPS;
use metrona_core::{
    Note, PianoRollConfig, PianoRollSource, SequenceConfig, SequencePreset, Source,
    StepGridSource, StepTrackSource, Tempo, TrackId, Voice,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid session file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid session: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tempo: Tempo,
    pub steps: Option<StepSession>,
    pub piano_roll: Option<PianoRollSession>,
    pub grid: Option<GridSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSession {
    pub id: String,
    /// Overrides `config` when present
    pub preset: Option<SequencePreset>,
    pub config: SequenceConfig,
    pub tracks: Vec<TrackSession>,
}

impl Default for StepSession {
    fn default() -> Self {
        Self {
            id: "steps".into(),
            preset: None,
            config: SequenceConfig::default(),
            tracks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSession {
    pub id: u64,
    #[serde(default)]
    pub steps: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PianoRollSession {
    pub id: String,
    pub config: PianoRollConfig,
    pub notes: Vec<Note>,
}

impl Default for PianoRollSession {
    fn default() -> Self {
        Self {
            id: "piano-roll".into(),
            config: PianoRollConfig::default(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSession {
    pub id: String,
    pub steps: usize,
    /// Indices of the cells that are on
    pub active: Vec<usize>,
}

impl Default for GridSession {
    fn default() -> Self {
        Self {
            id: "grid".into(),
            steps: DEFAULT_GRID_STEPS,
            active: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Small session exercising every source kind
    pub fn demo() -> Self {
        let note = |row, col, length| Note {
            row,
            col,
            length,
            velocity: 100,
        };
        Self {
            tempo: Tempo::new(120.0),
            steps: Some(StepSession {
                preset: Some(SequencePreset::DrumMachine),
                tracks: vec![
                    TrackSession {
                        id: 1,
                        steps: [1, 0, 0, 0].repeat(4),
                    },
                    TrackSession {
                        id: 2,
                        steps: [0, 0, 1, 0].repeat(4),
                    },
                ],
                ..Default::default()
            }),
            piano_roll: Some(PianoRollSession {
                config: PianoRollConfig {
                    columns: 16,
                    ..Default::default()
                },
                // The last note rings across the loop point
                notes: vec![note(39, 0, 4), note(43, 4, 4), note(46, 8, 2), note(51, 14, 4)],
                ..Default::default()
            }),
            grid: Some(GridSession {
                active: vec![0, 6, 10],
                ..Default::default()
            }),
        }
    }

    /// Build every configured source, asking `voice` for an instrument per
    /// track or source (by name)
    pub fn build_sources(
        &self,
        mut voice: impl FnMut(&str) -> Box<dyn Voice>,
    ) -> Result<Vec<Source>, ConfigError> {
        let mut sources = Vec::new();

        if let Some(session) = &self.steps {
            let id = session.id.as_str();
            let mut source = match session.preset {
                Some(preset) => StepTrackSource::with_preset(id, preset),
                None => StepTrackSource::new(id, session.config.clone()),
            };
            for track in &session.tracks {
                if track.steps.len() > source.length() {
                    warn!(
                        "Track {} has {} steps, sequence holds {}",
                        track.id,
                        track.steps.len(),
                        source.length()
                    );
                }
                let id = TrackId(track.id);
                source.add_track(id, &track.steps);
                source.set_track_voice(id, voice(&format!("{}/{}", session.id, id)));
            }
            sources.push(source.into());
        }

        if let Some(session) = &self.piano_roll {
            let mut source = PianoRollSource::new(session.id.as_str(), session.config.clone());
            for note in &session.notes {
                if !source.add_note(note.row, note.col, note.length, note.velocity) {
                    return Err(ConfigError::Invalid(format!(
                        "note at row {} col {} in {}",
                        note.row, note.col, session.id
                    )));
                }
            }
            source.set_instrument(voice(&session.id));
            sources.push(source.into());
        }

        if let Some(session) = &self.grid {
            if session.steps == 0 {
                return Err(ConfigError::Invalid(format!("grid {} has no steps", session.id)));
            }
            let mut source = StepGridSource::new(session.id.as_str(), session.steps);
            for &step in &session.active {
                if !source.set_step(step, true) {
                    return Err(ConfigError::Invalid(format!(
                        "grid step {} out of range in {}",
                        step, session.id
                    )));
                }
            }
            source.set_instrument(voice(&session.id));
            sources.push(source.into());
        }

        Ok(sources)
    }
}

/// `<config dir>/metrona/session.toml`
pub fn default_session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metrona")
        .join("session.toml")
}

pub fn load_session(path: &Path) -> Result<SessionConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let session = toml::from_str(&text)?;
    info!("Loaded session {}", path.display());
    Ok(session)
}

pub fn save_session(path: &Path, session: &SessionConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = toml::to_string_pretty(session)?;
    std::fs::write(path, text).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use metrona_core::SequenceSource;

    use super::*;
    use crate::voice::LogVoice;

    #[test]
    fn test_parse_session() {
        let text = r#"
            tempo = 95.0

            [steps]
            preset = "melodic"

            [[steps.tracks]]
            id = 1
            steps = [1, 0, 1, 0]

            [piano_roll.config]
            columns = 32

            [[piano_roll.notes]]
            row = 12
            col = 30
            length = 4
            velocity = 90
        "#;
        let session: SessionConfig = toml::from_str(text).unwrap();

        assert_eq!(session.tempo.bpm(), 95.0);
        let steps = session.steps.as_ref().unwrap();
        assert_eq!(steps.id, "steps");
        assert_eq!(steps.preset, Some(SequencePreset::Melodic));
        assert_eq!(steps.tracks[0].steps, vec![1, 0, 1, 0]);
        let roll = session.piano_roll.as_ref().unwrap();
        assert_eq!(roll.config.columns, 32);
        assert_eq!(roll.config.rows, 88);
        assert!(session.grid.is_none());

        let sources = session.build_sources(LogVoice::boxed).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind(), "step-track");
        assert_eq!(sources[1].id().to_string(), "piano-roll");
    }

    #[test]
    fn test_tempo_is_clamped_on_load() {
        let session: SessionConfig = toml::from_str("tempo = 900.0").unwrap();
        assert_eq!(session.tempo.bpm(), 300.0);
    }

    #[test]
    fn test_demo_builds_all_sources() {
        let mut names = Vec::new();
        let sources = SessionConfig::demo()
            .build_sources(|name| {
                names.push(name.to_string());
                LogVoice::boxed(name)
            })
            .unwrap();

        assert_eq!(sources.len(), 3);
        assert_eq!(names, vec!["steps/track-1", "steps/track-2", "piano-roll", "grid"]);
    }

    #[test]
    fn test_invalid_note_rejected() {
        let session = SessionConfig {
            piano_roll: Some(PianoRollSession {
                notes: vec![Note {
                    row: 200,
                    col: 0,
                    length: 1,
                    velocity: 100,
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            session.build_sources(LogVoice::boxed),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("metrona-test-{}", std::process::id()))
            .join("session.toml");
        let session = SessionConfig::demo();

        save_session(&path, &session).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded, session);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = load_session(Path::new("/nonexistent/metrona/session.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
