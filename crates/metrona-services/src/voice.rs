//! Output voices for hosts without an audio backend

use crossbeam_channel::Sender;
use metrona_core::{Voice, VoiceCommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Voice that writes every note event to the log
#[derive(Debug, Clone)]
pub struct LogVoice {
    name: String,
}

impl LogVoice {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn boxed(name: &str) -> Box<dyn Voice> {
        Box::new(Self::new(name))
    }
}

impl Voice for LogVoice {
    fn trigger_note(&mut self, velocity: u8, duration_ms: u32, pitch: Option<u8>) {
        match pitch {
            Some(pitch) => info!(voice = %self.name, pitch, velocity, duration_ms, "note on"),
            None => info!(voice = %self.name, velocity, duration_ms, "hit"),
        }
    }

    fn stop_note(&mut self, pitch: u8) {
        debug!(voice = %self.name, pitch, "note off");
    }

    fn stop_all_notes(&mut self) {
        debug!(voice = %self.name, "all notes off");
    }
}

/// A voice command tagged with the voice it was addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub voice: String,
    pub command: VoiceCommand,
}

/// Voice that forwards commands to another thread (an audio renderer)
pub struct ChannelVoice {
    name: String,
    tx: Sender<VoiceMessage>,
}

impl ChannelVoice {
    pub fn new(name: impl Into<String>, tx: Sender<VoiceMessage>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    fn forward(&self, command: VoiceCommand) {
        let message = VoiceMessage {
            voice: self.name.clone(),
            command,
        };
        if self.tx.send(message).is_err() {
            trace!(voice = %self.name, "voice receiver gone, dropping {:?}", command);
        }
    }
}

impl Voice for ChannelVoice {
    fn trigger_note(&mut self, velocity: u8, duration_ms: u32, pitch: Option<u8>) {
        self.forward(VoiceCommand::Trigger {
            velocity,
            duration_ms,
            pitch,
        });
    }

    fn stop_note(&mut self, pitch: u8) {
        self.forward(VoiceCommand::Stop { pitch });
    }

    fn stop_all_notes(&mut self) {
        self.forward(VoiceCommand::StopAll);
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn test_channel_voice_forwards() {
        let (tx, rx) = unbounded();
        let mut voice = ChannelVoice::new("lead", tx);

        voice.trigger_note(90, 250, Some(64));
        voice.stop_note(64);
        voice.stop_all_notes();

        let commands: Vec<_> = rx.try_iter().map(|m| m.command).collect();
        assert_eq!(
            commands,
            vec![
                VoiceCommand::Trigger {
                    velocity: 90,
                    duration_ms: 250,
                    pitch: Some(64),
                },
                VoiceCommand::Stop { pitch: 64 },
                VoiceCommand::StopAll,
            ]
        );
    }

    #[test]
    fn test_channel_voice_survives_dropped_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut voice = ChannelVoice::new("lead", tx);
        voice.trigger_note(100, 100, None);
    }
}
