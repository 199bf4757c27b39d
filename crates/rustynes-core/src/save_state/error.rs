//! Save state error types.

use thiserror::Error;

/// Save state operation error.
#[derive(Debug, Error)]
pub enum SaveStateError {
    /// Invalid magic bytes (expected "NESS").
    #[error("invalid magic bytes (expected \"NESS\")")]
    InvalidMagic,

    /// Unsupported container version.
    #[error("unsupported save state version: {0} (current: {CURRENT_VERSION})")]
    UnsupportedVersion(u32),

    /// A section's declared length runs past the end of the file.
    #[error("section {tag:?} declares length {declared} but only {available} bytes remain")]
    SectionOverflow {
        /// The section's 4-byte tag.
        tag: [u8; 4],
        /// Declared length in bytes.
        declared: u32,
        /// Bytes actually remaining in the container.
        available: u32,
    },

    /// A mandatory section is missing from the container.
    #[error("missing mandatory section {0:?}")]
    MissingSection(&'static str),

    /// A section's payload failed to decode.
    #[error("section {tag:?} failed to decode: {reason}")]
    SectionDecode {
        /// The section's 4-byte tag.
        tag: [u8; 4],
        /// Decoder error message.
        reason: String,
    },

    /// I/O error reading or writing the container file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const CURRENT_VERSION: u32 = super::SAVE_STATE_VERSION;
