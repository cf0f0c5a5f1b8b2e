//! Error types for Mach-O editing operations.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for Mach-O editing operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses
/// this error type. Precondition violations (calling `make_fat` on a fat
/// container, out-of-range indices) are programming errors and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The file could not be opened for reading and writing.
    #[error("couldn't open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exceeds the 2^32 - 1 byte limit of the fat container format.
    #[error("file size {0} exceeds 2^32 - 1 bytes")]
    FileTooLarge(u64),

    /// The first four bytes match no known Mach-O or fat magic.
    #[error("unknown magic: {0:#010x}")]
    UnknownMagic(u32),

    /// A slice's load-command table is inconsistent with its header, or the
    /// slice bounds overrun the file.
    #[error("malformed slice: {0}")]
    MalformedSlice(String),

    /// Inserting a load command would overwrite mapped segment content.
    #[error("no room for load command: {0}")]
    NoRoomForCommand(String),

    /// I/O failure from the underlying file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary (de)serialization failure.
    #[error("layout error: {0}")]
    Layout(#[from] scroll::Error),
}
