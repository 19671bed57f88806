//! MIDI File Export
//!
//! Writes a note sequence as a Standard MIDI File (format 0, one track)
//! using the `midly` crate. Seconds are converted to ticks at the tempo
//! from [`ScoreSettings`], which is also written as a tempo meta event.

use std::path::Path;

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use tracing::{debug, info};

use crate::config::ScoreSettings;
use crate::error::Result;
use crate::NoteSequence;

/// A note boundary at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimedEvent {
    tick: u64,
    /// Note-offs sort before note-ons at the same tick.
    is_on: bool,
    note: u8,
    velocity: u8,
}

/// Converts seconds to ticks at the given tempo.
fn seconds_to_ticks(seconds: f64, settings: &ScoreSettings) -> u64 {
    let beats = seconds * settings.tempo_bpm / 60.0;
    (beats * settings.ticks_per_beat as f64).round().max(0.0) as u64
}

/// Encodes a note sequence as SMF bytes.
///
/// Onsets and ends are converted to ticks at `settings.tempo_bpm`. A note
/// that would round to zero length still lasts one tick.
///
/// # Arguments
/// * `sequence` - Ordered, non-overlapping notes
/// * `settings` - Tempo, resolution and track name
///
/// # Returns
/// * `Vec<u8>` - A complete format 0 MIDI file
///
/// # Errors
/// * `InvalidParameter` - the score settings fail validation
/// * `Midi` - midly could not serialize the track
pub fn encode_midi(sequence: &NoteSequence, settings: &ScoreSettings) -> Result<Vec<u8>> {
    settings.validate()?;

    let mut timed = Vec::with_capacity(sequence.notes.len() * 2);
    for note in &sequence.notes {
        let on = seconds_to_ticks(note.start_seconds, settings);
        // Every note keeps at least one tick
        let off = seconds_to_ticks(note.end_seconds(), settings).max(on + 1);
        timed.push(TimedEvent {
            tick: on,
            is_on: true,
            note: note.note,
            velocity: note.midi_velocity(),
        });
        timed.push(TimedEvent {
            tick: off,
            is_on: false,
            note: note.note,
            velocity: 0,
        });
    }
    timed.sort();

    let us_per_quarter = (60_000_000.0 / settings.tempo_bpm).round() as u32;
    let mut track: Vec<TrackEvent> = vec![
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(settings.title.as_bytes())),
        },
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter.into())),
        },
    ];

    let mut last_tick = 0u64;
    for event in &timed {
        let delta = (event.tick - last_tick) as u32;
        last_tick = event.tick;
        let message = if event.is_on {
            MidiMessage::NoteOn {
                key: event.note.into(),
                vel: event.velocity.into(),
            }
        } else {
            MidiMessage::NoteOff {
                key: event.note.into(),
                vel: event.velocity.into(),
            }
        };
        track.push(TrackEvent {
            delta: delta.into(),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message,
            },
        });
    }
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(
            Format::SingleTrack,
            Timing::Metrical(settings.ticks_per_beat.into()),
        ),
        tracks: vec![track],
    };

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    debug!(
        "Encoded {} notes into {} MIDI bytes ({} ticks)",
        sequence.notes.len(),
        bytes.len(),
        last_tick
    );
    Ok(bytes)
}

/// Writes a note sequence to a `.mid` file.
///
/// # Errors
/// Everything [`encode_midi`] returns, plus `Io` when the file cannot be
/// written.
pub fn write_midi(
    sequence: &NoteSequence,
    path: impl AsRef<Path>,
    settings: &ScoreSettings,
) -> Result<()> {
    let bytes = encode_midi(sequence, settings)?;
    std::fs::write(path.as_ref(), bytes)?;
    info!("MIDI written to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoteEvent;

    fn note(note: u8, start: f64, duration: f64) -> NoteEvent {
        NoteEvent {
            note,
            start_seconds: start,
            duration_seconds: duration,
            velocity: 1.0,
        }
    }

    /// Flattens a parsed track into `(absolute_tick, is_on, key)`.
    fn note_events(smf: &Smf) -> Vec<(u64, bool, u8)> {
        let mut tick = 0u64;
        let mut out = Vec::new();
        for event in &smf.tracks[0] {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Midi { message, .. } = event.kind {
                match message {
                    MidiMessage::NoteOn { key, .. } => out.push((tick, true, key.as_int())),
                    MidiMessage::NoteOff { key, .. } => out.push((tick, false, key.as_int())),
                    _ => {}
                }
            }
        }
        out
    }

    #[test]
    fn test_notes_become_on_off_pairs() {
        let sequence = NoteSequence {
            notes: vec![note(69, 0.0, 0.5), note(71, 0.5, 1.0)],
            duration_seconds: 1.5,
        };
        let bytes = encode_midi(&sequence, &ScoreSettings::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.header.timing, Timing::Metrical(480.into()));
        // 120 BPM at 480 ticks per beat is 960 ticks per second;
        // the off at 480 sorts before the next on.
        assert_eq!(
            note_events(&smf),
            vec![(0, true, 69), (480, false, 69), (480, true, 71), (1440, false, 71)]
        );
    }

    #[test]
    fn test_tempo_and_track_name_are_written() {
        let settings = ScoreSettings {
            tempo_bpm: 100.0,
            title: "Melody".to_string(),
            ..Default::default()
        };
        let bytes = encode_midi(&NoteSequence::default(), &settings).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let metas: Vec<_> = smf.tracks[0]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Meta(m) => Some(m),
                _ => None,
            })
            .collect();
        assert!(metas.contains(&MetaMessage::Tempo(600_000.into())));
        assert!(metas.contains(&MetaMessage::TrackName(b"Melody")));
        assert_eq!(metas.last(), Some(&MetaMessage::EndOfTrack));
    }

    #[test]
    fn test_tempo_event_is_never_zero() {
        let fastest = ScoreSettings {
            tempo_bpm: crate::config::MAX_TEMPO_BPM,
            ..Default::default()
        };
        let bytes = encode_midi(&NoteSequence::default(), &fastest).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert!(smf.tracks[0]
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::Tempo(60_000.into()))));

        let too_fast = ScoreSettings {
            tempo_bpm: 2.0e8,
            ..Default::default()
        };
        assert!(matches!(
            encode_midi(&NoteSequence::default(), &too_fast),
            Err(crate::Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_very_short_note_keeps_one_tick() {
        let sequence = NoteSequence {
            notes: vec![note(60, 0.0, 1e-6)],
            duration_seconds: 1e-6,
        };
        let bytes = encode_midi(&sequence, &ScoreSettings::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(note_events(&smf), vec![(0, true, 60), (1, false, 60)]);
    }

    #[test]
    fn test_write_midi_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mid");
        let sequence = NoteSequence {
            notes: vec![note(64, 0.25, 0.25)],
            duration_seconds: 0.5,
        };
        write_midi(&sequence, &path, &ScoreSettings::default()).unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"MThd");
    }
}
