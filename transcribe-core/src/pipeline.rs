//! # Transcription Pipeline
//!
//! Runs the stages in order: decode, pitch estimation, quantization, MIDI,
//! MusicXML and the optional PNG. Each stage finishes before the next one
//! starts. MIDI and MusicXML failures abort the run; a PNG failure is
//! logged and recorded in the report.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::{self, Waveform};
use crate::config::TranscriptionConfig;
use crate::error::{Error, Result};
use crate::midi;
use crate::musicxml;
use crate::pitch::PitchEstimator;
use crate::quantize::NoteQuantizer;
use crate::render::RasterRenderer;
use crate::NoteSequence;

/// Input file and artifact locations for one run.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio_path: PathBuf,
    pub midi_path: PathBuf,
    pub musicxml_path: PathBuf,
    /// `None` skips PNG rendering altogether.
    pub png_path: Option<PathBuf>,
}

impl TranscribeRequest {
    /// Standard artifact names (`output.mid`, `output.musicxml`,
    /// `output_sheet.png`) inside `dir`.
    pub fn in_dir(audio_path: impl Into<PathBuf>, dir: &Path, with_png: bool) -> Self {
        Self {
            audio_path: audio_path.into(),
            midi_path: dir.join("output.mid"),
            musicxml_path: dir.join("output.musicxml"),
            png_path: with_png.then(|| dir.join("output_sheet.png")),
        }
    }
}

/// What happened to the optional PNG.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterOutcome {
    /// No PNG was requested.
    Skipped,
    Rendered(PathBuf),
    /// Rendering was requested but failed or no renderer was configured.
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct TranscriptionReport {
    pub notes: NoteSequence,
    pub sample_rate: u32,
    pub audio_seconds: f64,
    pub frame_count: usize,
    pub raster: RasterOutcome,
    pub processing_ms: f32,
}

/// Waveform to notes, without touching the filesystem.
///
/// # Arguments
/// * `waveform` - Decoded mono audio
/// * `config` - Analysis and quantizer settings; score settings are unused
///
/// # Returns
/// * `(NoteSequence, usize)` - The notes and the number of analysis frames
pub fn transcribe_waveform(
    waveform: &Waveform,
    config: &TranscriptionConfig,
) -> Result<(NoteSequence, usize)> {
    let estimator = PitchEstimator::new(config.analysis.clone())?;
    let quantizer = NoteQuantizer::new(config.quantizer.clone())?;

    let matrix = estimator.analyze(waveform)?;
    debug!(
        "Pitch matrix: {} bins x {} frames, hop {:.4} s",
        matrix.bin_count(),
        matrix.frame_count(),
        matrix.hop_seconds
    );
    let notes = quantizer.quantize(&matrix)?;
    Ok((notes, matrix.frame_count()))
}

/// Runs the full pipeline for one recording.
///
/// # Errors
/// Any decode, analysis, quantization, MIDI or MusicXML failure. PNG
/// failures are never errors; see [`RasterOutcome`].
pub fn transcribe(
    request: &TranscribeRequest,
    config: &TranscriptionConfig,
    renderer: Option<&dyn RasterRenderer>,
) -> Result<TranscriptionReport> {
    let start_time = Instant::now();
    config.validate()?;

    let waveform = audio::load_waveform(&request.audio_path)?;
    let (notes, frame_count) = transcribe_waveform(&waveform, config)?;
    info!("Detected {} notes", notes.len());

    midi::write_midi(&notes, &request.midi_path, &config.score)?;
    musicxml::write_musicxml(&notes, &request.musicxml_path, &config.score)?;

    let raster = match request.png_path.as_deref() {
        None => RasterOutcome::Skipped,
        Some(png) => render_raster(&request.musicxml_path, png, renderer),
    };

    Ok(TranscriptionReport {
        notes,
        sample_rate: waveform.sample_rate,
        audio_seconds: waveform.duration_seconds(),
        frame_count,
        raster,
        processing_ms: start_time.elapsed().as_secs_f32() * 1000.0,
    })
}

fn render_raster(
    musicxml: &Path,
    png: &Path,
    renderer: Option<&dyn RasterRenderer>,
) -> RasterOutcome {
    let result = match renderer {
        Some(renderer) => renderer
            .render(musicxml, png)
            .map_err(|e| Error::RenderingUnavailable(e.to_string())),
        None => Err(Error::RenderingUnavailable(
            "no notation renderer configured".to_string(),
        )),
    };
    match result {
        Ok(()) => {
            info!("PNG score written to {}", png.display());
            RasterOutcome::Rendered(png.to_path_buf())
        }
        Err(e) => {
            warn!("Continuing without PNG: {}", e);
            RasterOutcome::Unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;

    struct FailingRenderer;

    impl RasterRenderer for FailingRenderer {
        fn render(&self, _musicxml: &Path, _png: &Path) -> std::result::Result<(), RenderError> {
            Err(RenderError::MissingOutput(PathBuf::from("nowhere.png")))
        }
    }

    struct CopyRenderer;

    impl RasterRenderer for CopyRenderer {
        fn render(&self, musicxml: &Path, png: &Path) -> std::result::Result<(), RenderError> {
            std::fs::copy(musicxml, png)?;
            Ok(())
        }
    }

    #[test]
    fn test_request_in_dir() {
        let request = TranscribeRequest::in_dir("in.wav", Path::new("/jobs/1"), false);
        assert_eq!(request.midi_path, PathBuf::from("/jobs/1/output.mid"));
        assert_eq!(request.musicxml_path, PathBuf::from("/jobs/1/output.musicxml"));
        assert_eq!(request.png_path, None);
        let request = TranscribeRequest::in_dir("in.wav", Path::new("/jobs/1"), true);
        assert_eq!(request.png_path, Some(PathBuf::from("/jobs/1/output_sheet.png")));
    }

    #[test]
    fn test_render_failure_is_downgraded() {
        let outcome = render_raster(Path::new("a.musicxml"), Path::new("a.png"), Some(&FailingRenderer));
        assert!(matches!(outcome, RasterOutcome::Unavailable(_)));

        let outcome = render_raster(Path::new("a.musicxml"), Path::new("a.png"), None);
        assert!(matches!(outcome, RasterOutcome::Unavailable(msg) if msg.contains("no notation renderer")));
    }

    #[test]
    fn test_render_success() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("a.musicxml");
        let png = dir.path().join("a.png");
        std::fs::write(&xml, "<score-partwise/>").unwrap();
        let outcome = render_raster(&xml, &png, Some(&CopyRenderer));
        assert_eq!(outcome, RasterOutcome::Rendered(png));
    }

    #[test]
    fn test_silent_waveform_gives_no_notes() {
        let waveform = Waveform {
            samples: vec![0.0; 22050],
            sample_rate: 22050,
        };
        let (notes, frames) = transcribe_waveform(&waveform, &TranscriptionConfig::default()).unwrap();
        assert!(notes.is_empty());
        assert_eq!(frames, 1 + 22050 / 512);
    }
}
