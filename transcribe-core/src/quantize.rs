//! # Note Quantization Module
//!
//! Turns a frame-wise pitch magnitude matrix into a clean monophonic
//! sequence of note events.
//!
//! ## Algorithm
//!
//! 1. **Peak picking** - per frame, the bin with the largest magnitude wins;
//!    on equal magnitudes the lowest bin wins.
//! 2. **Gating** - a frame whose peak is below the silence threshold, or
//!    whose peak frequency has no MIDI note, is a rest.
//! 3. **Run-length merge** - consecutive frames with the same note form one
//!    candidate note. Tracked with a two-state machine (`Silence`,
//!    `InNote`) that emits on every exit from `InNote`.
//! 4. **Jitter drop** - candidates shorter than the minimum duration are
//!    discarded outright, never merged into a neighbour.

use tracing::debug;

use crate::config::{MinNoteDuration, QuantizerParams};
use crate::error::{Error, Result};
use crate::pitch::PitchFrameMatrix;
use crate::tuning;
use crate::{NoteEvent, NoteSequence};

/// Tolerance for comparing run lengths in seconds (`3 * 0.1 >= 0.3`).
const DURATION_EPSILON: f64 = 1e-9;

/// Per-frame classification after peak picking and gating.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameClass {
    Rest,
    Note { note: u8, magnitude: f32 },
}

#[derive(Debug, Clone, Copy)]
enum RunState {
    Silence,
    InNote {
        note: u8,
        start_frame: usize,
        magnitude_sum: f64,
    },
}

/// Converts pitch frame matrices into note sequences.
#[derive(Debug, Clone, Default)]
pub struct NoteQuantizer {
    params: QuantizerParams,
}

impl NoteQuantizer {
    /// Creates a quantizer, rejecting invalid parameters up front.
    pub fn new(params: QuantizerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Parameters in effect.
    pub fn params(&self) -> &QuantizerParams {
        &self.params
    }

    /// Quantizes a matrix into an ordered, non-overlapping note sequence.
    ///
    /// # Errors
    /// * `InvalidInput` - empty or ragged matrix, bin/frequency length
    ///   mismatch, negative or non-finite magnitudes
    /// * `InvalidParameter` - non-positive or non-finite hop duration
    pub fn quantize(&self, matrix: &PitchFrameMatrix) -> Result<NoteSequence> {
        let n_frames = validate_matrix(matrix)?;
        let hop = matrix.hop_seconds;
        let min_frames = self.min_frames(hop);

        let classes: Vec<FrameClass> = (0..n_frames)
            .map(|frame| self.classify(matrix, frame))
            .collect();

        let global_peak = classes
            .iter()
            .filter_map(|c| match c {
                FrameClass::Note { magnitude, .. } => Some(*magnitude),
                FrameClass::Rest => None,
            })
            .fold(0.0f32, f32::max);

        let mut notes = Vec::new();
        let mut dropped = 0usize;
        let mut state = RunState::Silence;

        // One extra iteration with a synthetic rest closes a note that runs
        // to the final frame.
        for (frame, class) in classes
            .iter()
            .copied()
            .chain(std::iter::once(FrameClass::Rest))
            .enumerate()
        {
            state = match (state, class) {
                (
                    RunState::InNote {
                        note,
                        start_frame,
                        magnitude_sum,
                    },
                    FrameClass::Note {
                        note: next,
                        magnitude,
                    },
                ) if next == note => RunState::InNote {
                    note,
                    start_frame,
                    magnitude_sum: magnitude_sum + magnitude as f64,
                },
                (previous, class) => {
                    if let RunState::InNote {
                        note,
                        start_frame,
                        magnitude_sum,
                    } = previous
                    {
                        let length = frame - start_frame;
                        if length >= min_frames {
                            notes.push(make_event(
                                note,
                                start_frame,
                                length,
                                magnitude_sum,
                                global_peak,
                                hop,
                            ));
                        } else {
                            dropped += 1;
                        }
                    }
                    match class {
                        FrameClass::Note { note, magnitude } => RunState::InNote {
                            note,
                            start_frame: frame,
                            magnitude_sum: magnitude as f64,
                        },
                        FrameClass::Rest => RunState::Silence,
                    }
                }
            };
        }

        debug!(
            "Quantized {} frames into {} notes ({} short candidates dropped)",
            n_frames,
            notes.len(),
            dropped
        );

        Ok(NoteSequence {
            notes,
            duration_seconds: n_frames as f64 * hop,
        })
    }

    /// Peak-picks one frame and gates it against the silence threshold.
    fn classify(&self, matrix: &PitchFrameMatrix, frame: usize) -> FrameClass {
        let (bin, magnitude) = peak_bin(matrix, frame);
        if magnitude < self.params.silence_threshold {
            return FrameClass::Rest;
        }
        match tuning::frequency_to_midi(matrix.frequencies[bin]) {
            Some(note) => FrameClass::Note { note, magnitude },
            None => FrameClass::Rest,
        }
    }

    /// Minimum run length in whole frames.
    fn min_frames(&self, hop: f64) -> usize {
        match self.params.min_duration {
            MinNoteDuration::Frames(n) => n,
            MinNoteDuration::Seconds(s) => {
                ((s / hop) - DURATION_EPSILON).ceil().max(1.0) as usize
            }
        }
    }
}

/// Arg-max over the bins of one frame. Only a strictly greater magnitude
/// replaces the current best, so ties resolve to the lowest bin.
fn peak_bin(matrix: &PitchFrameMatrix, frame: usize) -> (usize, f32) {
    let mut best_bin = 0;
    let mut best = matrix.magnitudes[0][frame];
    for (bin, row) in matrix.magnitudes.iter().enumerate().skip(1) {
        if row[frame] > best {
            best = row[frame];
            best_bin = bin;
        }
    }
    (best_bin, best)
}

fn make_event(
    note: u8,
    start_frame: usize,
    length: usize,
    magnitude_sum: f64,
    global_peak: f32,
    hop: f64,
) -> NoteEvent {
    let mean = magnitude_sum / length as f64;
    let velocity = if global_peak > 0.0 {
        (mean / global_peak as f64).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };
    NoteEvent {
        note,
        start_seconds: start_frame as f64 * hop,
        duration_seconds: length as f64 * hop,
        velocity,
    }
}

/// Checks shape and values, returning the frame count.
fn validate_matrix(matrix: &PitchFrameMatrix) -> Result<usize> {
    if !matrix.hop_seconds.is_finite() || matrix.hop_seconds <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "hop duration must be positive, got {}",
            matrix.hop_seconds
        )));
    }
    let n_bins = matrix.magnitudes.len();
    if n_bins == 0 {
        return Err(Error::InvalidInput("magnitude matrix has no frequency bins".to_string()));
    }
    let n_frames = matrix.magnitudes[0].len();
    if n_frames == 0 {
        return Err(Error::InvalidInput("magnitude matrix has no frames".to_string()));
    }
    if matrix.frequencies.len() != n_bins {
        return Err(Error::InvalidInput(format!(
            "frequency mapping has {} entries but the matrix has {} bins",
            matrix.frequencies.len(),
            n_bins
        )));
    }
    for (bin, row) in matrix.magnitudes.iter().enumerate() {
        if row.len() != n_frames {
            return Err(Error::InvalidInput(format!(
                "bin {} has {} frames, expected {}",
                bin,
                row.len(),
                n_frames
            )));
        }
        if let Some(bad) = row.iter().find(|m| !m.is_finite() || **m < 0.0) {
            return Err(Error::InvalidInput(format!(
                "bin {bin} holds invalid magnitude {bad}"
            )));
        }
    }
    Ok(n_frames)
}
