//! Error types for the stream pipeline and the fingerprinting engine

use std::io;
use thiserror::Error;

/// Audio processing error
#[derive(Error, Debug)]
pub enum AudioError {
    /// A stream received source properties it cannot process
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A position, length or read count is not aligned to the sample block size
    #[error("Misaligned access: {0}")]
    MisalignedAccess(String),

    /// Bounds or ordering violated (crop range, seek target, warp anchor)
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Rejected configuration, e.g. a warp ratio the resampler cannot handle
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The stream cannot be repositioned to the requested target
    #[error("Not seekable: {0}")]
    NotSeekable(String),

    /// Sample rate converter failure
    #[error("Resampling error: {0}")]
    Resample(String),

    /// Decoder failure
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Match post-processing got matches it cannot reduce, e.g. of several track pairs
    #[error("Match processing error: {0}")]
    MatchProcessing(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for audio operations
pub type Result<T> = std::result::Result<T, AudioError>;

impl From<hound::Error> for AudioError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => AudioError::Io(io),
            hound::Error::Unsupported => {
                AudioError::UnsupportedFormat("unsupported WAV layout".to_string())
            }
            other => AudioError::Decoder(other.to_string()),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        AudioError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for AudioError {
    fn from(e: rubato::ResampleError) -> Self {
        AudioError::Resample(e.to_string())
    }
}
