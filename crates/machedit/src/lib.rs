//! In-place editor for Mach-O executable containers.
//!
//! A [`Container`] opens a thin (single-architecture) or fat (universal)
//! Mach-O file read-write and mutates its structure directly on disk:
//! converting between thin and fat wrappers, inserting, removing and
//! extracting architecture slices, editing the load-command table of a
//! slice, changing the Mach-O file type, and stripping an existing code
//! signature while repairing the `__LINKEDIT` segment.
//!
//! Every operation keeps the in-memory model and the on-disk bytes in
//! sync; opening a file and performing no edits leaves it byte-identical.

pub mod error;
pub mod macho;

pub use error::Error;
pub use macho::container::Container;

pub type Result<T> = std::result::Result<T, Error>;
