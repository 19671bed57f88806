//! # Pitch Estimation Module
//!
//! Produces the frame-wise magnitude-by-frequency matrix consumed by the
//! note quantizer.
//!
//! ## Method
//! - Centered STFT: the signal is zero-padded by half a frame on each side,
//!   so frame `i` is centered on sample `i * hop_length` and frame 0 starts
//!   at time 0.0
//! - DC removal and Hann windowing per frame (see [`crate::fft`])
//! - Band limiting to `[fmin, fmax]`
//! - Peak tracking: only local spectral maxima keep their magnitude, every
//!   other bin is zeroed
//! - Global normalization so the loudest cell of the recording is 1.0

use tracing::debug;

use crate::audio::Waveform;
use crate::config::AnalysisSettings;
use crate::error::{Error, Result};
use crate::fft::SpectrumAnalyzer;

/// Pitch magnitudes indexed `[bin][frame]` with the Hz value of every bin.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchFrameMatrix {
    /// One row per frequency bin, one column per frame.
    pub magnitudes: Vec<Vec<f32>>,
    /// `frequencies[bin]` is the frequency of row `bin` in Hz.
    pub frequencies: Vec<f32>,
    /// Time advance between consecutive frames in seconds.
    pub hop_seconds: f64,
}

impl PitchFrameMatrix {
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn frame_count(&self) -> usize {
        self.magnitudes.first().map_or(0, Vec::len)
    }
}

/// STFT-based pitch estimator.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    settings: AnalysisSettings,
}

impl PitchEstimator {
    /// Creates an estimator, rejecting invalid analysis settings.
    pub fn new(settings: AnalysisSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Analyzes a whole waveform into a frame-wise magnitude matrix.
    ///
    /// Frames are centered on multiples of the hop length, with the signal
    /// zero-padded by half a frame on both sides. Only bins inside the
    /// configured band are kept, and within each frame only local spectral
    /// peaks survive. The result is scaled so its loudest cell is 1.0.
    ///
    /// # Arguments
    /// * `waveform` - Mono samples and their sample rate
    ///
    /// # Returns
    /// * `PitchFrameMatrix` - `[bin][frame]` magnitudes, bin frequencies and
    ///   the hop duration in seconds
    ///
    /// # Errors
    /// * `InvalidInput` - empty waveform or zero sample rate
    /// * `InvalidParameter` - the frequency band holds no FFT bin at this
    ///   sample rate
    pub fn analyze(&self, waveform: &Waveform) -> Result<PitchFrameMatrix> {
        if waveform.samples.is_empty() {
            return Err(Error::InvalidInput("waveform has no samples".to_string()));
        }
        if waveform.sample_rate == 0 {
            return Err(Error::InvalidInput("sample rate must be positive".to_string()));
        }

        let AnalysisSettings {
            frame_size,
            hop_length,
            fmin,
            fmax,
        } = self.settings;
        let sample_rate = waveform.sample_rate;
        let mut analyzer = SpectrumAnalyzer::new(frame_size);

        let nyquist = sample_rate as f32 / 2.0;
        let fmax = fmax.min(nyquist);
        let band: Vec<usize> = (0..analyzer.bin_count())
            .filter(|&bin| {
                let f = analyzer.bin_frequency(bin, sample_rate);
                f > 0.0 && f >= fmin && f <= fmax
            })
            .collect();
        let (Some(&first_bin), Some(&last_bin)) = (band.first(), band.last()) else {
            return Err(Error::InvalidParameter(format!(
                "no FFT bin between {fmin} Hz and {fmax} Hz at {sample_rate} Hz / {frame_size} samples"
            )));
        };

        let n_frames = 1 + waveform.samples.len() / hop_length;
        let pad = frame_size / 2;
        let mut padded = vec![0.0f32; pad];
        padded.extend_from_slice(&waveform.samples);
        padded.resize(padded.len() + pad, 0.0);

        debug!(
            "Analyzing {} samples at {} Hz: {} frames, bins {}..={} ({:.1}-{:.1} Hz)",
            waveform.samples.len(),
            sample_rate,
            n_frames,
            first_bin,
            last_bin,
            analyzer.bin_frequency(first_bin, sample_rate),
            analyzer.bin_frequency(last_bin, sample_rate)
        );

        let n_bins = last_bin - first_bin + 1;
        let mut magnitudes = vec![vec![0.0f32; n_frames]; n_bins];
        let mut peak = 0.0f32;

        for frame in 0..n_frames {
            let start = frame * hop_length;
            let end = (start + frame_size).min(padded.len());
            let spectrum = analyzer.magnitudes(&padded[start..end]);

            for bin in first_bin..=last_bin {
                let m = spectrum[bin];
                let left = if bin > 0 { spectrum[bin - 1] } else { 0.0 };
                let right = spectrum.get(bin + 1).copied().unwrap_or(0.0);
                if m > left && m >= right {
                    magnitudes[bin - first_bin][frame] = m;
                    peak = peak.max(m);
                }
            }
        }

        if peak > 0.0 {
            for row in magnitudes.iter_mut() {
                for m in row.iter_mut() {
                    *m /= peak;
                }
            }
        }

        let frequencies = (first_bin..=last_bin)
            .map(|bin| analyzer.bin_frequency(bin, sample_rate))
            .collect();

        Ok(PitchFrameMatrix {
            magnitudes,
            frequencies,
            hop_seconds: hop_length as f64 / sample_rate as f64,
        })
    }
}
