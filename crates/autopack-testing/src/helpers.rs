//! Helper utilities for autopack testing

use anyhow::{bail, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tar::{EntryType, Header};

/// Builds tar archives in memory with names written verbatim
///
/// `tar::Builder` refuses `..` and absolute paths; this writes the raw
/// header fields instead so tests can produce hostile archives.
pub struct TarBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl Default for TarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TarBuilder {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    /// Append a regular file
    pub fn file(mut self, name: &str, contents: &[u8], mode: u32) -> Result<Self> {
        let mut header = raw_header(name, EntryType::Regular, mode)?;
        header.set_size(contents.len() as u64);
        header.set_cksum();
        self.builder.append(&header, contents)?;
        Ok(self)
    }

    /// Append a directory
    pub fn dir(mut self, name: &str, mode: u32) -> Result<Self> {
        let mut header = raw_header(name, EntryType::Directory, mode)?;
        header.set_cksum();
        self.builder.append(&header, std::io::empty())?;
        Ok(self)
    }

    /// Append a symlink with a verbatim target
    pub fn symlink(self, name: &str, target: &str) -> Result<Self> {
        self.link(name, target, EntryType::Symlink)
    }

    /// Append a hard link with a verbatim target
    pub fn hard_link(self, name: &str, target: &str) -> Result<Self> {
        self.link(name, target, EntryType::Link)
    }

    /// Append a header-only entry of any type (FIFO, device, pax global header)
    pub fn special(mut self, name: &str, entry_type: EntryType) -> Result<Self> {
        let mut header = raw_header(name, entry_type, 0o644)?;
        header.set_cksum();
        self.builder.append(&header, std::io::empty())?;
        Ok(self)
    }

    fn link(mut self, name: &str, target: &str, entry_type: EntryType) -> Result<Self> {
        let mut header = raw_header(name, entry_type, 0o777)?;
        write_field(&mut header.as_old_mut().linkname, target)?;
        header.set_cksum();
        self.builder.append(&header, std::io::empty())?;
        Ok(self)
    }

    /// Finish the archive, including the end-of-archive blocks
    pub fn build(self) -> Result<Vec<u8>> {
        Ok(self.builder.into_inner()?)
    }

    /// Finish the archive and gzip it
    pub fn build_gz(self) -> Result<Vec<u8>> {
        gzip(&self.build()?)
    }
}

/// Gzip a byte buffer
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Bytes that look like nothing any detector recognizes
pub fn garbage(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

fn raw_header(name: &str, entry_type: EntryType, mode: u32) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(0);
    header.set_mtime(0);
    write_field(&mut header.as_old_mut().name, name)?;
    Ok(header)
}

fn write_field(field: &mut [u8; 100], value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= field.len() {
        bail!("name too long for a raw tar header: {}", value);
    }
    field.fill(0);
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_names_survive() {
        let archive = TarBuilder::new()
            .file("../outside.txt", b"evil", 0o644)
            .unwrap()
            .hard_link("link", "/etc/passwd")
            .unwrap()
            .build()
            .unwrap();

        let mut parsed = tar::Archive::new(&archive[..]);
        let mut entries = parsed.entries().unwrap();
        let first = entries.next().unwrap().unwrap();
        assert_eq!(first.path_bytes().as_ref(), b"../outside.txt");
        let second = entries.next().unwrap().unwrap();
        assert_eq!(second.link_name_bytes().unwrap().as_ref(), b"/etc/passwd");
    }

    #[test]
    fn test_gzip_magic() {
        let data = TarBuilder::new().build_gz().unwrap();
        assert_eq!(&data[..2], &[0x1F, 0x8B]);
    }

    #[test]
    fn test_garbage_is_not_a_signature() {
        let bytes = garbage(300);
        assert_eq!(bytes.len(), 300);
        assert_ne!(&bytes[257..262], b"ustar");
    }
}
