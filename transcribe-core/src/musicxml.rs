//! # MusicXML Export Module
//!
//! Renders a note sequence as a single-part MusicXML 4.0 score.
//!
//! Note boundaries are snapped to a grid of `divisions` per quarter note.
//! Gaps become rests, and any note or rest that crosses a barline or has a
//! length with no single notated value is split into notated pieces (notes
//! joined with ties). Layout and engraving are left to the notation program
//! that opens the file.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, info};

use crate::config::ScoreSettings;
use crate::error::Result as CrateResult;
use crate::tuning;
use crate::NoteSequence;

/// A notated value: grid length, type name, dotted.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NoteValue {
    duration: u32,
    type_name: &'static str,
    dotted: bool,
}

/// A contiguous stretch of the timeline in grid units.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: u32,
    length: u32,
    /// `None` for rests.
    note: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tie {
    None,
    Start,
    Stop,
    Both,
}

impl Tie {
    fn new(continues_from: bool, continues_to: bool) -> Self {
        match (continues_from, continues_to) {
            (false, false) => Tie::None,
            (false, true) => Tie::Start,
            (true, false) => Tie::Stop,
            (true, true) => Tie::Both,
        }
    }
}

/// All notated values representable at `divisions` per quarter, longest
/// first. 32nd notes and longer, with single dots.
fn note_values(divisions: u32) -> Vec<NoteValue> {
    // (type, length in 32nds)
    const TYPES: [(&str, u32); 6] = [
        ("whole", 32),
        ("half", 16),
        ("quarter", 8),
        ("eighth", 4),
        ("16th", 2),
        ("32nd", 1),
    ];
    let mut values = Vec::new();
    for (type_name, thirty_seconds) in TYPES {
        // duration = thirty_seconds * divisions / 8
        let scaled = thirty_seconds * divisions;
        if scaled % 8 == 0 {
            values.push(NoteValue {
                duration: scaled / 8,
                type_name,
                dotted: false,
            });
        }
        let dotted = scaled * 3;
        if dotted % 16 == 0 {
            values.push(NoteValue {
                duration: dotted / 16,
                type_name,
                dotted: true,
            });
        }
    }
    values.retain(|v| v.duration > 0);
    values.sort_by(|a, b| b.duration.cmp(&a.duration));
    values
}

/// Greedily splits a length into notated values, longest first.
fn split_length(mut length: u32, values: &[NoteValue]) -> Vec<NoteValue> {
    let mut pieces = Vec::new();
    while length > 0 {
        // The smallest value is always 1 for the supported divisions
        let Some(value) = values.iter().find(|v| v.duration <= length) else {
            break;
        };
        pieces.push(*value);
        length -= value.duration;
    }
    pieces
}

/// Snaps notes to the grid and fills gaps with rests.
fn build_timeline(sequence: &NoteSequence, settings: &ScoreSettings) -> Vec<Segment> {
    let units_per_second = settings.tempo_bpm / 60.0 * settings.divisions as f64;
    let to_units = |seconds: f64| (seconds * units_per_second).round().max(0.0) as u32;

    let mut segments = Vec::new();
    let mut cursor = 0u32;
    for note in &sequence.notes {
        let start = to_units(note.start_seconds).max(cursor);
        let end = to_units(note.end_seconds()).max(start + 1);
        if start > cursor {
            segments.push(Segment {
                start: cursor,
                length: start - cursor,
                note: None,
            });
        }
        segments.push(Segment {
            start,
            length: end - start,
            note: Some(note.note),
        });
        cursor = end;
    }

    let measure = settings.beats_per_measure * settings.divisions;
    let total = if cursor == 0 {
        measure
    } else {
        cursor.div_ceil(measure) * measure
    };
    if total > cursor {
        segments.push(Segment {
            start: cursor,
            length: total - cursor,
            note: None,
        });
    }
    segments
}

/// Treble clef unless the median pitch sits below middle C.
fn choose_clef(sequence: &NoteSequence) -> (&'static str, u8) {
    let mut pitches: Vec<u8> = sequence.notes.iter().map(|n| n.note).collect();
    if pitches.is_empty() {
        return ("G", 2);
    }
    pitches.sort_unstable();
    if pitches[pitches.len() / 2] < 60 { ("F", 4) } else { ("G", 2) }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_attributes(
    xml: &mut String,
    sequence: &NoteSequence,
    settings: &ScoreSettings,
) -> std::fmt::Result {
    let (sign, line) = choose_clef(sequence);
    writeln!(xml, "      <attributes>")?;
    writeln!(xml, "        <divisions>{}</divisions>", settings.divisions)?;
    writeln!(xml, "        <key><fifths>0</fifths></key>")?;
    writeln!(
        xml,
        "        <time><beats>{}</beats><beat-type>4</beat-type></time>",
        settings.beats_per_measure
    )?;
    writeln!(xml, "        <clef><sign>{sign}</sign><line>{line}</line></clef>")?;
    writeln!(xml, "      </attributes>")?;
    let tempo = settings.tempo_bpm;
    writeln!(xml, "      <direction placement=\"above\">")?;
    writeln!(
        xml,
        "        <direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>{}</per-minute></metronome></direction-type>",
        tempo.round()
    )?;
    writeln!(xml, "        <sound tempo=\"{tempo}\"/>")?;
    writeln!(xml, "      </direction>")
}

fn write_note(
    xml: &mut String,
    note: Option<u8>,
    value: NoteValue,
    tie: Tie,
    whole_measure_rest: bool,
) -> std::fmt::Result {
    writeln!(xml, "      <note>")?;
    match note {
        Some(n) => {
            let (step, alter, octave) = tuning::pitch_spelling(n);
            write!(xml, "        <pitch><step>{step}</step>")?;
            if alter != 0 {
                write!(xml, "<alter>{alter}</alter>")?;
            }
            writeln!(xml, "<octave>{octave}</octave></pitch>")?;
        }
        None if whole_measure_rest => writeln!(xml, "        <rest measure=\"yes\"/>")?,
        None => writeln!(xml, "        <rest/>")?,
    }
    writeln!(xml, "        <duration>{}</duration>", value.duration)?;
    if matches!(tie, Tie::Stop | Tie::Both) {
        writeln!(xml, "        <tie type=\"stop\"/>")?;
    }
    if matches!(tie, Tie::Start | Tie::Both) {
        writeln!(xml, "        <tie type=\"start\"/>")?;
    }
    writeln!(xml, "        <voice>1</voice>")?;
    writeln!(xml, "        <type>{}</type>", value.type_name)?;
    if value.dotted {
        writeln!(xml, "        <dot/>")?;
    }
    if tie != Tie::None {
        write!(xml, "        <notations>")?;
        if matches!(tie, Tie::Stop | Tie::Both) {
            write!(xml, "<tied type=\"stop\"/>")?;
        }
        if matches!(tie, Tie::Start | Tie::Both) {
            write!(xml, "<tied type=\"start\"/>")?;
        }
        writeln!(xml, "</notations>")?;
    }
    writeln!(xml, "      </note>")
}

fn render(sequence: &NoteSequence, settings: &ScoreSettings) -> Result<String, std::fmt::Error> {
    let values = note_values(settings.divisions);
    let measure = settings.beats_per_measure * settings.divisions;
    let timeline = build_timeline(sequence, settings);
    let total = timeline.last().map_or(measure, |s| s.start + s.length);
    let measure_count = total / measure;

    let mut xml = String::new();
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#)?;
    writeln!(
        xml,
        r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 4.0 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#
    )?;
    writeln!(xml, r#"<score-partwise version="4.0">"#)?;
    let title = escape(&settings.title);
    writeln!(xml, "  <work><work-title>{title}</work-title></work>")?;
    writeln!(xml, "  <part-list>")?;
    writeln!(xml, "    <score-part id=\"P1\"><part-name>{title}</part-name></score-part>")?;
    writeln!(xml, "  </part-list>")?;
    writeln!(xml, "  <part id=\"P1\">")?;

    let mut segments = timeline.iter().peekable();
    // Carried-over remainder of a segment that crossed the previous barline
    let mut carry: Option<(Segment, bool)> = None;

    for index in 0..measure_count {
        let bar_start = index * measure;
        let bar_end = bar_start + measure;
        writeln!(xml, "    <measure number=\"{}\">", index + 1)?;
        if index == 0 {
            write_attributes(&mut xml, sequence, settings)?;
        }

        loop {
            let (segment, tied_in) = match carry.take() {
                Some(c) => c,
                None => match segments.next_if(|s| s.start < bar_end) {
                    Some(s) => (*s, false),
                    None => break,
                },
            };

            let end = segment.start + segment.length;
            let in_bar = end.min(bar_end) - segment.start;
            let crosses = end > bar_end;
            if crosses {
                carry = Some((
                    Segment {
                        start: bar_end,
                        length: end - bar_end,
                        note: segment.note,
                    },
                    segment.note.is_some(),
                ));
            }

            let whole_bar_rest = segment.note.is_none() && in_bar == measure && segment.start == bar_start;
            let pieces = split_length(in_bar, &values);
            let last = pieces.len().saturating_sub(1);
            for (i, value) in pieces.into_iter().enumerate() {
                let tie = match segment.note {
                    Some(_) => Tie::new(tied_in || i > 0, crosses || i < last),
                    None => Tie::None,
                };
                write_note(&mut xml, segment.note, value, tie, whole_bar_rest && last == 0)?;
            }

            if crosses {
                break;
            }
        }

        writeln!(xml, "    </measure>")?;
    }

    writeln!(xml, "  </part>")?;
    writeln!(xml, "</score-partwise>")?;
    debug!(
        "Rendered {} notes into {} measures of MusicXML",
        sequence.notes.len(),
        measure_count
    );
    Ok(xml)
}

/// Renders a note sequence as a MusicXML document.
///
/// One part, one staff. Notes are snapped to a grid of `settings.divisions`
/// per quarter, gaps become rests, and values that cross a barline are
/// split and tied.
///
/// # Arguments
/// * `sequence` - Ordered, non-overlapping notes
/// * `settings` - Tempo, grid, meter and title
///
/// # Returns
/// * `String` - A `score-partwise` MusicXML 4.0 document
///
/// # Errors
/// * `InvalidParameter` - the score settings fail validation
pub fn to_musicxml(sequence: &NoteSequence, settings: &ScoreSettings) -> CrateResult<String> {
    settings.validate()?;
    render(sequence, settings).map_err(|e| std::io::Error::other(e).into())
}

/// Writes a note sequence to a `.musicxml` file.
pub fn write_musicxml(
    sequence: &NoteSequence,
    path: impl AsRef<Path>,
    settings: &ScoreSettings,
) -> CrateResult<()> {
    let xml = to_musicxml(sequence, settings)?;
    std::fs::write(path.as_ref(), xml)?;
    info!("MusicXML written to {}", path.as_ref().display());
    Ok(())
}
