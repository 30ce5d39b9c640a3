//! Error types for the emulator.
//!
//! Protocol variation (unknown SysEx, bad checksums, out of range tones) is
//! not an error: it is logged and absorbed by the engine. These variants cover
//! framing problems on the direct API, file I/O and start-up configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the emulator library.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet's length header promised more bytes than were supplied.
    #[error("truncated packet: header declares {declared} bytes, {available} available")]
    Packet {
        /// Payload bytes (after nibble decoding) promised by the header.
        declared: usize,
        /// Bytes actually left in the buffer.
        available: usize,
    },

    /// SysEx framing is wrong (missing F0/F7 or empty body).
    #[error("invalid sysex: {0}")]
    InvalidSysex(String),

    /// A voice parameter file could not be parsed at all.
    #[error("voice file {path}: line {line}: {msg}")]
    VoiceFile {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number of the failure.
        line: usize,
        /// Description of the failure.
        msg: String,
    },

    /// The engine configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Sample rate of zero or beyond what the chip model supports.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    /// The event queue has no room for another event.
    #[error("midi event queue is full")]
    QueueFull,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
