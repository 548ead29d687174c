//! Autopack - streaming directory packer and unpacker
//!
//! A [`Packer`] turns a directory into a tar or tar.gz byte stream read
//! through [`std::io::Read`]; an [`Unpacker`] takes such a stream through
//! [`std::io::Write`], detects its format from the leading bytes and
//! materializes it under a destination directory. Archive entries can never
//! be written outside that directory.

pub mod archive;
mod bridge;
pub mod config;
pub mod error;
pub mod error_cell;
pub mod format;
pub mod guard;
pub mod platform;
mod progress;

pub use error::{Error, Result};

// Re-export commonly used types
pub use archive::{ArchiveEntry, EntryKind, Packer, Unpacker};
pub use config::{Config, StreamOptions};
pub use error_cell::ErrorCell;
pub use format::{detect, resolve_behavior_name, Behavior, DEFAULT_PACK_BEHAVIOR};
pub use platform::check_platform;
