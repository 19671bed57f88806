//! # Equal Temperament Module
//!
//! Maps between frequencies in Hz and MIDI note numbers using twelve-tone
//! equal temperament with A4 = 440 Hz = note 69, and provides the note
//! names and pitch spellings used by the score exporters.

use once_cell::sync::Lazy;

/// Reference pitch for A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4.
pub const A4_MIDI: u8 = 69;

/// Highest valid MIDI note number.
pub const MAX_MIDI_NOTE: u8 = 127;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A single MIDI note with its name and equal-tempered frequency.
#[derive(Debug, Clone)]
pub struct MidiNote {
    /// Note name with sharps (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Statically computed table for all 128 MIDI notes (C-1 to G9).
static NOTES: Lazy<Vec<MidiNote>> = Lazy::new(|| {
    (0..=MAX_MIDI_NOTE)
        .map(|note| {
            // f = 440 * 2^((n - 69) / 12)
            let frequency =
                A4_FREQUENCY * 2.0_f32.powf((note as f32 - A4_MIDI as f32) / 12.0);
            let octave = (note / 12) as i32 - 1;
            let name = format!("{}{}", SHARP_NAMES[(note % 12) as usize], octave);
            MidiNote { name, frequency }
        })
        .collect()
});

/// Quantizes a frequency to the nearest MIDI note number.
///
/// Returns `None` for non-positive or non-finite frequencies and for
/// frequencies whose nearest note falls outside `0..=127`; such frames are
/// treated as rests rather than as note 0.
pub fn frequency_to_midi(freq: f32) -> Option<u8> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let note = (A4_MIDI as f32 + 12.0 * (freq / A4_FREQUENCY).log2()).round();
    if (0.0..=MAX_MIDI_NOTE as f32).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

/// Equal-tempered frequency of a MIDI note.
///
/// # Arguments
/// * `note` - MIDI note number; values above 127 are clamped
///
/// # Returns
/// * `f32` - Frequency in Hz relative to A4 = 440 Hz
pub fn midi_to_frequency(note: u8) -> f32 {
    NOTES[note.min(MAX_MIDI_NOTE) as usize].frequency
}

/// Note name with sharp notation (e.g., "A4", "C#5").
pub fn note_name(note: u8) -> &'static str {
    &NOTES[note.min(MAX_MIDI_NOTE) as usize].name
}

/// Pitch spelling for notation: `(step, alter, octave)`.
///
/// Black keys are spelled as sharps of the step below.
pub fn pitch_spelling(note: u8) -> (char, i8, i8) {
    const STEPS: [(char, i8); 12] = [
        ('C', 0), ('C', 1), ('D', 0), ('D', 1), ('E', 0), ('F', 0),
        ('F', 1), ('G', 0), ('G', 1), ('A', 0), ('A', 1), ('B', 0),
    ];
    let (step, alter) = STEPS[(note % 12) as usize];
    let octave = (note / 12) as i8 - 1;
    (step, alter, octave)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_a440_is_note_69() {
        assert_eq!(frequency_to_midi(440.0), Some(69));
        assert_relative_eq!(midi_to_frequency(69), 440.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rounds_to_nearest_semitone() {
        // 49 cents sharp of A4 still rounds to A4, 51 cents sharp rounds up
        assert_eq!(frequency_to_midi(440.0 * 2f32.powf(0.49 / 12.0)), Some(69));
        assert_eq!(frequency_to_midi(440.0 * 2f32.powf(0.51 / 12.0)), Some(70));
        assert_eq!(frequency_to_midi(261.63), Some(60));
    }

    #[test]
    fn test_invalid_frequencies_are_rests() {
        assert_eq!(frequency_to_midi(0.0), None);
        assert_eq!(frequency_to_midi(-440.0), None);
        assert_eq!(frequency_to_midi(f32::NAN), None);
        assert_eq!(frequency_to_midi(f32::INFINITY), None);
        // Above G9 (~12543 Hz)
        assert_eq!(frequency_to_midi(20_000.0), None);
    }

    #[test]
    fn test_note_names_and_spelling() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(61), "C#4");
        assert_eq!(note_name(21), "A0");
        assert_eq!(pitch_spelling(61), ('C', 1, 4));
        assert_eq!(pitch_spelling(69), ('A', 0, 4));
        assert_eq!(pitch_spelling(0), ('C', 0, -1));
    }
}
