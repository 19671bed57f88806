//! Error types for the transcription pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or empty pitch data, or audio that decodes to nothing.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Bad threshold, duration or analysis setting.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The audio container is not WAV, FLAC or MP3.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Optional raster export failed.
    #[error("Rendering unavailable: {0}")]
    RenderingUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A codec rejected the audio stream after the container was recognized.
    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::Decode(format!("WAV: {other}")),
        }
    }
}

impl From<claxon::Error> for Error {
    fn from(e: claxon::Error) -> Self {
        match e {
            claxon::Error::IoError(io) => Error::Io(io),
            other => Error::Decode(format!("FLAC: {other}")),
        }
    }
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        Error::Decode(format!("MP3: {e}"))
    }
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::Midi(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
