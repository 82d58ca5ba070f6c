//! Error types for the viewer pipeline.
//!
//! Every error here is terminal for the current playback session: nothing
//! inside the pipeline retries. Whether to try again (e.g. with another file)
//! is up to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a file into a usable frame sequence.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no image found in {}", .path.display())]
    NoFrames { path: PathBuf },

    #[error("frame sequence is empty")]
    EmptySequence,

    #[error("target size {width}x{height} is not drawable")]
    InvalidTarget { width: u32, height: u32 },

    #[error("frame {index} is {actual_width}x{actual_height}, expected {width}x{height}")]
    FrameSize {
        index: usize,
        actual_width: u32,
        actual_height: u32,
        width: u32,
        height: u32,
    },
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Display or GPIO initialization failed (commonly: not running as root).
    #[error("failed to initialize LED matrix: {0}")]
    HardwareInit(String),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("render thread panicked")]
    RenderThread,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
