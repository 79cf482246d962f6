//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A pkt-line length header is not valid hex, is out of range, or the
    /// frame is truncated.
    #[error("malformed pkt-line at byte {offset}: {reason}")]
    MalformedFrame {
        /// Offset of the frame's length header.
        offset: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A payload does not fit in a single pkt-line.
    #[error("pkt-line payload of {len} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest payload a frame can carry.
        max: usize,
    },

    /// The pack does not start with `PACK`.
    #[error("invalid pack signature {0:?}")]
    InvalidMagic([u8; 4]),

    /// The pack version is not 2 or 3.
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    /// The pack trailer does not match its contents.
    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum carried in the trailer.
        expected: String,
        /// Checksum of the pack body.
        actual: String,
    },

    /// A pack entry cannot be decoded.
    #[error("corrupted pack entry at offset {offset}: {reason}")]
    CorruptedPack {
        /// Offset of the entry in the pack.
        offset: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A delta names a base that is neither in the pack nor available locally.
    #[error("missing delta base {base} for entry at offset {offset}")]
    MissingBaseObject {
        /// Base object id, or `@<offset>` for offset deltas.
        base: String,
        /// Offset of the delta entry.
        offset: usize,
    },

    /// Pack-level structure is invalid.
    #[error("pack parse error: {0}")]
    PackParse(String),

    /// The remote sent something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote reported an error (`ERR` packet or side-band channel 3).
    #[error("remote error: {0}")]
    Remote(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tether_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
