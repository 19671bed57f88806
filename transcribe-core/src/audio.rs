//! # Waveform Source Module
//!
//! Decodes audio files into mono `f32` waveforms. The container is
//! recognized from its magic bytes rather than the file extension:
//!
//! - `RIFF` - WAV via hound
//! - `fLaC` - FLAC via claxon
//! - `ID3` tag or MPEG frame sync - MP3 via symphonia

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{Error, Result};

/// Mono audio samples in [-1.0, 1.0] with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Loads and decodes an audio file.
///
/// # Arguments
/// * `path` - WAV, FLAC or MP3 file; the extension is ignored
///
/// # Returns
/// * `Waveform` - Mono samples in [-1.0, 1.0], channels averaged
///
/// # Errors
/// * `Io` - the file cannot be read
/// * `UnsupportedFormat` - not WAV, FLAC or MP3
/// * `Decode` - the codec rejected the stream
/// * `InvalidInput` - the file decodes to no samples
pub fn load_waveform(path: impl AsRef<Path>) -> Result<Waveform> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    debug!("Decoding {} ({} bytes)", path.display(), bytes.len());
    decode_bytes(&bytes)
}

/// Decodes an in-memory audio file. Same errors as [`load_waveform`],
/// minus `Io` from reading the file.
pub fn decode_bytes(bytes: &[u8]) -> Result<Waveform> {
    if bytes.len() < 4 {
        return Err(Error::UnsupportedFormat("file too small".to_string()));
    }

    let waveform = match &bytes[0..4] {
        b"RIFF" => decode_wav(bytes)?,
        b"fLaC" => decode_flac(bytes)?,
        _ if is_mp3(bytes) => decode_mp3(bytes)?,
        _ => {
            return Err(Error::UnsupportedFormat(
                "expected WAV, FLAC or MP3".to_string(),
            ));
        }
    };

    if waveform.samples.is_empty() {
        return Err(Error::InvalidInput("audio file contains no samples".to_string()));
    }
    debug!(
        "Decoded {} samples at {} Hz ({:.2} s)",
        waveform.samples.len(),
        waveform.sample_rate,
        waveform.duration_seconds()
    );
    Ok(waveform)
}

fn is_mp3(bytes: &[u8]) -> bool {
    if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
        return true;
    }
    bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0
}

fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

// ── WAV ─────────────────────────────────────────────────────────────

fn decode_wav(bytes: &[u8]) -> Result<Waveform> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(Waveform {
        samples: mix_to_mono(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

// ── FLAC ────────────────────────────────────────────────────────────

fn decode_flac(bytes: &[u8]) -> Result<Waveform> {
    let mut reader = claxon::FlacReader::new(Cursor::new(bytes))?;
    let info = reader.streaminfo();
    let max_val = (1u64 << (info.bits_per_sample - 1)) as f32;

    let interleaved: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / max_val))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Waveform {
        samples: mix_to_mono(&interleaved, info.channels as usize),
        sample_rate: info.sample_rate,
    })
}

// ── MP3 ─────────────────────────────────────────────────────────────

/// An opened MP3 stream: demuxer, decoder and the audio track they share.
struct Mp3Stream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
}

impl Mp3Stream {
    fn open(bytes: &[u8]) -> Result<Self> {
        let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("mp3");
        let format = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())?
            .format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("MP3: no audio track found".to_string()))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("MP3: missing sample rate".to_string()))?;
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
        })
    }

    /// Decodes the next packet of our track into mono samples.
    ///
    /// `Ok(None)` marks the end of the stream. Corrupt frames yield an
    /// empty chunk and decoding carries on.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        let packet = loop {
            match self.format.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => break packet,
                Ok(_) => {}
                Err(SymphoniaError::ResetRequired) => self.decoder.reset(),
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        };

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                Ok(Some(mix_to_mono(buf.samples(), spec.channels.count())))
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!("Skipping corrupt MP3 frame: {}", msg);
                Ok(Some(Vec::new()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_mp3(bytes: &[u8]) -> Result<Waveform> {
    let mut stream = Mp3Stream::open(bytes)?;
    let mut samples = Vec::new();
    while let Some(chunk) = stream.next_chunk()? {
        samples.extend(chunk);
    }
    Ok(Waveform {
        samples,
        sample_rate: stream.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let waveform = decode_bytes(&wav_bytes(spec, &[0, 16384, -16384, 32767])).unwrap();
        assert_eq!(waveform.sample_rate, 8000);
        assert_eq!(waveform.samples.len(), 4);
        assert_relative_eq!(waveform.samples[1], 0.5);
        assert_relative_eq!(waveform.samples[2], -0.5);
    }

    #[test]
    fn test_stereo_wav_is_mixed_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let waveform = decode_bytes(&wav_bytes(spec, &[16384, 0, -16384, -16384])).unwrap();
        assert_eq!(waveform.samples.len(), 2);
        assert_relative_eq!(waveform.samples[0], 0.25);
        assert_relative_eq!(waveform.samples[1], -0.5);
        assert_relative_eq!(waveform.duration_seconds(), 2.0 / 44100.0);
    }

    #[test]
    fn test_empty_wav_is_invalid_input() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        assert!(matches!(
            decode_bytes(&wav_bytes(spec, &[])),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(matches!(
            decode_bytes(b"OggS\0\0\0\0"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(decode_bytes(b"ab"), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_truncated_wav_is_decode_error() {
        assert!(matches!(
            decode_bytes(b"RIFF\x10\0\0\0WAVEjunk"),
            Err(Error::Decode(_) | Error::Io(_))
        ));
    }

    #[test]
    fn test_mp3_without_frames_is_rejected() {
        let mut bytes = b"ID3\x03\0\0\0\0\0\0".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            decode_bytes(&bytes),
            Err(Error::Decode(_) | Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            load_waveform("/definitely/not/here.wav"),
            Err(Error::Io(_))
        ));
    }
}
