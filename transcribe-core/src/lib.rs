// transcribe-core/src/lib.rs

//! The core logic for the monophonic audio transcriber.
//! This crate is responsible for audio decoding, pitch estimation,
//! note quantization and score export. It is completely headless
//! and contains no server or CLI code.

use serde::{Deserialize, Serialize};

pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod midi;
pub mod musicxml;
pub mod pipeline;
pub mod pitch;
pub mod quantize;
pub mod render;
pub mod tuning;

pub use config::{MinNoteDuration, QuantizerParams, ScoreSettings, TranscriptionConfig};
pub use error::{Error, Result};
pub use pipeline::{transcribe, RasterOutcome, TranscribeRequest, TranscriptionReport};

/// A single quantized note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number (0-127).
    pub note: u8,
    /// Onset in seconds from the start of the recording.
    pub start_seconds: f64,
    /// Length in seconds, always positive.
    pub duration_seconds: f64,
    /// Mean magnitude of the note relative to the loudest frame (0.0 to 1.0).
    pub velocity: f32,
}

impl NoteEvent {
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }

    /// Velocity scaled to MIDI's 1-127 (0 would mean note-off).
    pub fn midi_velocity(&self) -> u8 {
        1 + (self.velocity.clamp(0.0, 1.0) * 126.0).round() as u8
    }

    /// Note name with sharp notation (e.g., "A4", "C#5").
    pub fn name(&self) -> &'static str {
        tuning::note_name(self.note)
    }
}

/// Ordered, non-overlapping notes of one recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteSequence {
    pub notes: Vec<NoteEvent>,
    /// Length of the analysed audio in seconds (frames x hop).
    pub duration_seconds: f64,
}

impl NoteSequence {
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Writes the sequence as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_velocity_range() {
        let mut note = NoteEvent {
            note: 60,
            start_seconds: 0.0,
            duration_seconds: 1.0,
            velocity: 0.0,
        };
        assert_eq!(note.midi_velocity(), 1);
        note.velocity = 1.0;
        assert_eq!(note.midi_velocity(), 127);
        note.velocity = 0.5;
        assert_eq!(note.midi_velocity(), 64);
        assert_eq!(note.name(), "C4");
    }
}
