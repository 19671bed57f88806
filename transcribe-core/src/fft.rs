//! # Fast Fourier Transform (FFT) Module
//!
//! Frame-level spectrum analysis for the pitch estimator: DC removal,
//! Hann windowing and magnitude spectra using RustFFT.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Symmetric Hann window of length `n`, tapering to zero at both edges.
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Reusable forward FFT of a fixed frame size.
///
/// Planning and the window are computed once; `magnitudes` can then be
/// called for every frame of a recording.
pub struct SpectrumAnalyzer {
    frame_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Plans a forward FFT of `frame_size` points.
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        Self {
            frame_size,
            fft,
            window: hann_window(frame_size),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; frame_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of magnitude bins produced per frame (up to Nyquist).
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Center frequency of `bin` in Hz.
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.frame_size as f32
    }

    /// Magnitude spectrum of one frame.
    ///
    /// `frame` shorter than the frame size is zero-padded at the end;
    /// longer input is truncated.
    ///
    /// # Arguments
    /// * `frame` - Time-domain samples
    ///
    /// # Returns
    /// * `Vec<f32>` - [`bin_count`](Self::bin_count) magnitudes, DC first
    pub fn magnitudes(&mut self, frame: &[f32]) -> Vec<f32> {
        let mut processed: Vec<f32> = frame.iter().take(self.frame_size).copied().collect();
        processed.resize(self.frame_size, 0.0);
        remove_dc_offset(&mut processed);

        for ((slot, sample), w) in self.buffer.iter_mut().zip(processed).zip(&self.window) {
            *slot = Complex { re: sample * w, im: 0.0 };
        }

        self.fft.process(&mut self.buffer);

        self.buffer
            .iter()
            .take(self.bin_count())
            .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let sample_rate = 8000;
        let frame_size = 1024;
        // 1000 Hz lands exactly on bin 128
        let signal: Vec<f32> = (0..frame_size)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(frame_size);
        let mags = analyzer.magnitudes(&signal);
        assert_eq!(mags.len(), frame_size / 2 + 1);

        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 128);
        assert_eq!(analyzer.bin_frequency(peak, sample_rate), 1000.0);
    }

    #[test]
    fn test_dc_only_frame_is_silent() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let mags = analyzer.magnitudes(&[0.5; 256]);
        assert!(mags.iter().all(|m| *m < 1e-3));
    }

    #[test]
    fn test_short_frame_is_zero_padded() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let mags = analyzer.magnitudes(&[0.0; 10]);
        assert_eq!(mags.len(), 129);
    }
}
