//! Storage Module
//!
//! Relation snapshots: every stored row of every relation written to one
//! file with the compact value encoding of [`crate::value::encoding`].
//!
//! ## Snapshot Layout
//!
//! ```text
//! magic      "DDSNAP01"
//! flags      u8 (bit 0: CRC32 trailer present)
//! strings    u32 count, then (u32 id, u32 len, utf8 bytes)*
//! relations  u32 count, then per relation:
//!              u32 n, object ids; u32 n, attribute ids; u32 arity; u8 reaches
//!              u64 row count, then arity encoded values per row
//! trailer    u32 CRC32 of everything between magic and trailer
//! ```
//!
//! All integers are little-endian. String ids are local to the file; loading
//! interns every name again and reorders columns to the current layout.

mod snapshot;

pub use snapshot::{read_snapshot, save_snapshot, Snapshot, StoredRelation, MAGIC};

use crate::error::EngineError;
use crate::value::encoding::DecodeError;
use std::io;
use thiserror::Error;

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the snapshot magic
    #[error("Not a snapshot file")]
    BadMagic,

    #[error("Checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Snapshot truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("Unknown value opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// A name or value refers to a string missing from the string table
    #[error("Unknown string id {0}")]
    UnknownString(u32),

    #[error("Invalid UTF-8 in string table")]
    InvalidUtf8,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SnapshotError {
    fn from_decode(error: DecodeError, offset: usize) -> Self {
        match error {
            DecodeError::Truncated { .. } => SnapshotError::Truncated { offset },
            DecodeError::UnknownOpcode(op) => SnapshotError::UnknownOpcode(op),
        }
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;
