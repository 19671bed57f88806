//! Configuration parameters for transcription

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete pipeline configuration.
///
/// Every section falls back to its defaults when omitted from a config
/// file, so a file only needs to name the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub analysis: AnalysisSettings,
    pub quantizer: QuantizerParams,
    pub score: ScoreSettings,
}

/// STFT settings for the pitch estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// FFT frame size in samples (default: 2048)
    pub frame_size: usize,

    /// Hop between frames in samples (default: 512)
    pub hop_length: usize,

    /// Lowest frequency considered, in Hz (default: 50.0)
    pub fmin: f32,

    /// Highest frequency considered, in Hz (default: 2000.0)
    /// Clamped to the Nyquist frequency at analysis time.
    pub fmax: f32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_length: 512,
            fmin: 50.0,
            fmax: 2000.0,
        }
    }
}

/// Minimum length a candidate note must reach to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinNoteDuration {
    Frames(usize),
    Seconds(f64),
}

/// Tunables of the note quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerParams {
    /// Frames whose peak magnitude is below this are rests (default: 0.1).
    /// The pitch estimator normalizes its matrix to a peak of 1.0, so this
    /// is relative to the loudest bin of the recording.
    pub silence_threshold: f32,

    /// Notes shorter than this are discarded as jitter (default: 0.1 s)
    pub min_duration: MinNoteDuration,
}

impl Default for QuantizerParams {
    fn default() -> Self {
        Self {
            silence_threshold: 0.1,
            min_duration: MinNoteDuration::Seconds(0.1),
        }
    }
}

impl QuantizerParams {
    pub fn validate(&self) -> Result<()> {
        if !self.silence_threshold.is_finite() || self.silence_threshold < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "silence threshold must be a non-negative number, got {}",
                self.silence_threshold
            )));
        }
        match self.min_duration {
            MinNoteDuration::Frames(0) => Err(Error::InvalidParameter(
                "minimum note duration must be at least one frame".to_string(),
            )),
            MinNoteDuration::Seconds(s) if !s.is_finite() || s <= 0.0 => {
                Err(Error::InvalidParameter(format!(
                    "minimum note duration must be positive, got {s} s"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Fastest tempo accepted for either export.
pub const MAX_TEMPO_BPM: f64 = 1000.0;

/// Longest measure accepted, in quarter-note beats.
pub const MAX_BEATS_PER_MEASURE: u32 = 32;

/// Settings shared by the MIDI and MusicXML exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreSettings {
    /// Tempo written to both exports (default: 120.0)
    pub tempo_bpm: f64,

    /// MIDI resolution (default: 480)
    pub ticks_per_beat: u16,

    /// MusicXML grid units per quarter note, one of 1, 2, 4, 8 (default: 4)
    pub divisions: u32,

    /// Quarter-note beats per measure, 1 to 32 (default: 4)
    pub beats_per_measure: u32,

    /// Work title and MIDI track name
    pub title: String,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            ticks_per_beat: 480,
            divisions: 4,
            beats_per_measure: 4,
            title: "Transcription".to_string(),
        }
    }
}

impl ScoreSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.tempo_bpm.is_finite() || self.tempo_bpm <= 0.0 || self.tempo_bpm > MAX_TEMPO_BPM {
            return Err(Error::InvalidParameter(format!(
                "tempo must be in (0, {}] BPM, got {}",
                MAX_TEMPO_BPM, self.tempo_bpm
            )));
        }
        // Tempo meta events hold microseconds per quarter in 24 bits
        if 60_000_000.0 / self.tempo_bpm > 16_777_215.0 {
            return Err(Error::InvalidParameter(format!(
                "tempo {} BPM is too slow for a MIDI tempo event",
                self.tempo_bpm
            )));
        }
        if self.ticks_per_beat == 0 || self.ticks_per_beat > 0x7FFF {
            return Err(Error::InvalidParameter(format!(
                "ticks per beat must be in 1..=32767, got {}",
                self.ticks_per_beat
            )));
        }
        if !matches!(self.divisions, 1 | 2 | 4 | 8) {
            return Err(Error::InvalidParameter(format!(
                "divisions must be 1, 2, 4 or 8, got {}",
                self.divisions
            )));
        }
        if !(1..=MAX_BEATS_PER_MEASURE).contains(&self.beats_per_measure) {
            return Err(Error::InvalidParameter(format!(
                "beats per measure must be in 1..={}, got {}",
                MAX_BEATS_PER_MEASURE, self.beats_per_measure
            )));
        }
        Ok(())
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 2 {
            return Err(Error::InvalidParameter(format!(
                "frame size must be at least 2 samples, got {}",
                self.frame_size
            )));
        }
        if self.hop_length == 0 {
            return Err(Error::InvalidParameter(
                "hop length must be at least 1 sample".to_string(),
            ));
        }
        if !(self.fmin.is_finite() && self.fmax.is_finite()) || self.fmin < 0.0 || self.fmin >= self.fmax {
            return Err(Error::InvalidParameter(format!(
                "frequency band must satisfy 0 <= fmin < fmax, got {}..{}",
                self.fmin, self.fmax
            )));
        }
        Ok(())
    }
}

impl TranscriptionConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: TranscriptionConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.quantizer.validate()?;
        self.score.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TranscriptionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "quantizer": { "silence_threshold": 0.25 } }"#;
        let config: TranscriptionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.quantizer.silence_threshold, 0.25);
        assert_eq!(config.quantizer.min_duration, MinNoteDuration::Seconds(0.1));
        assert_eq!(config.analysis, AnalysisSettings::default());
    }

    #[test]
    fn test_min_duration_in_frames() {
        let json = r#"{ "quantizer": { "min_duration": { "frames": 3 } } }"#;
        let config: TranscriptionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.quantizer.min_duration, MinNoteDuration::Frames(3));
    }

    #[test]
    fn test_rejects_bad_quantizer_params() {
        let negative = QuantizerParams {
            silence_threshold: -0.1,
            ..Default::default()
        };
        assert!(matches!(negative.validate(), Err(Error::InvalidParameter(_))));

        let zero_frames = QuantizerParams {
            min_duration: MinNoteDuration::Frames(0),
            ..Default::default()
        };
        assert!(matches!(zero_frames.validate(), Err(Error::InvalidParameter(_))));

        let zero_seconds = QuantizerParams {
            min_duration: MinNoteDuration::Seconds(0.0),
            ..Default::default()
        };
        assert!(matches!(zero_seconds.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_rejects_bad_score_settings() {
        let settings = ScoreSettings {
            divisions: 3,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidParameter(_))));

        let huge_measure = ScoreSettings {
            beats_per_measure: 1 << 30,
            ..Default::default()
        };
        assert!(matches!(huge_measure.validate(), Err(Error::InvalidParameter(_))));

        let widest = ScoreSettings {
            beats_per_measure: MAX_BEATS_PER_MEASURE,
            divisions: 8,
            ..Default::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_oversized_measure_in_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"score":{"beats_per_measure":1073741824}}"#).unwrap();
        assert!(matches!(
            TranscriptionConfig::load(&path),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_tempo_out_of_range() {
        for tempo in [0.0, -60.0, f64::NAN, 2.0e8, MAX_TEMPO_BPM + 1.0] {
            let settings = ScoreSettings {
                tempo_bpm: tempo,
                ..Default::default()
            };
            assert!(
                matches!(settings.validate(), Err(Error::InvalidParameter(_))),
                "tempo {tempo} should be rejected"
            );
        }
        let fastest = ScoreSettings {
            tempo_bpm: MAX_TEMPO_BPM,
            ..Default::default()
        };
        assert!(fastest.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = TranscriptionConfig::default();
        config.analysis.hop_length = 256;
        config.save(&path).unwrap();
        assert_eq!(TranscriptionConfig::load(&path).unwrap(), config);
    }
}
