//! Streaming archive adapters and the entry model they share

mod codec;
mod packer;
mod unpacker;

pub use packer::Packer;
pub use unpacker::Unpacker;

use crate::{Error, Result};
use std::fs::FileType;
use std::io::Read;
use std::path::PathBuf;
use tar::EntryType;

/// Kind of filesystem object an archive entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
    Fifo,
    /// Pax global extended header; carries no filesystem object
    GlobalHeader,
    /// Any other typeflag, kept as the raw byte
    Other(u8),
}

impl EntryKind {
    /// Classify a tar typeflag
    pub fn from_tar(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Link => EntryKind::HardLink,
            EntryType::Char => EntryKind::CharDevice,
            EntryType::Block => EntryKind::BlockDevice,
            EntryType::Fifo => EntryKind::Fifo,
            EntryType::XGlobalHeader => EntryKind::GlobalHeader,
            other => EntryKind::Other(other.as_byte()),
        }
    }

    /// Classify a file found while walking a source directory
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_dir() {
            return EntryKind::Directory;
        }
        if file_type.is_symlink() {
            return EntryKind::Symlink;
        }
        if file_type.is_file() {
            return EntryKind::Regular;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_fifo() {
                return EntryKind::Fifo;
            }
            if file_type.is_char_device() {
                return EntryKind::CharDevice;
            }
            if file_type.is_block_device() {
                return EntryKind::BlockDevice;
            }
        }
        EntryKind::Other(0)
    }

    /// Devices and FIFOs are archived but never recreated
    pub fn is_special(self) -> bool {
        matches!(
            self,
            EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo
        )
    }
}

/// Entry in an archive stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path within the archive, untrusted until guarded
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Permission bits from the header
    pub mode: u32,
    /// Body size in bytes
    pub size: u64,
    /// Link target for symlinks and hard links
    pub link_target: Option<PathBuf>,
}

impl ArchiveEntry {
    pub(crate) fn from_tar<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Self> {
        let header = entry.header();
        let path = entry
            .path()
            .map_err(|e| Error::io("reading entry path", e))?
            .into_owned();
        let context = || format!("reading header of {}", path.display());

        Ok(ArchiveEntry {
            kind: EntryKind::from_tar(header.entry_type()),
            mode: header.mode().map_err(|e| Error::io(context(), e))? & 0o7777,
            size: header.size().map_err(|e| Error::io(context(), e))?,
            link_target: entry
                .link_name()
                .map_err(|e| Error::io(context(), e))?
                .map(|target| target.into_owned()),
            path,
        })
    }
}
