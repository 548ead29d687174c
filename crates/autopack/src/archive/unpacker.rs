//! Archive byte stream to directory tree

use super::codec::Compression;
use super::{ArchiveEntry, EntryKind};
use crate::bridge::{bridge, PipeReader, PipeWriter};
use crate::config::StreamOptions;
use crate::error_cell::ErrorCell;
use crate::format::{detect, Behavior};
use crate::guard::resolve_on_disk;
use crate::platform::{check_platform, current_os};
use crate::{Error, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

enum Phase {
    /// Buffering leading bytes until a signature matches
    Detecting(Vec<u8>),
    /// Format known, worker not yet started
    Detected,
    Streaming { writer: PipeWriter },
    /// An error is recorded; the stream is torn down
    Failed,
    Closed,
}

/// Writes an archive byte stream out as a directory tree
///
/// With [`Behavior::Auto`] the leading bytes are buffered until the format
/// is recognized. Extraction then runs on a worker thread; every entry is
/// resolved through the path guard before anything touches the disk.
///
/// ```no_run
/// use autopack::{Behavior, Unpacker};
/// use std::io;
///
/// let mut unpacker = Unpacker::new("/srv/restore", Behavior::Auto);
/// let mut archive = std::fs::File::open("/tmp/data.tar.gz")?;
/// io::copy(&mut archive, &mut unpacker)?;
/// unpacker.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Unpacker {
    dest_dir: PathBuf,
    behavior: Behavior,
    options: StreamOptions,
    errors: Arc<ErrorCell>,
    worker: Option<JoinHandle<()>>,
    phase: Phase,
}

impl Default for Unpacker {
    /// An unbound unpacker; every write fails with [`Error::NotInitialized`]
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::new(),
            behavior: Behavior::Auto,
            options: StreamOptions::default(),
            errors: Arc::new(ErrorCell::new()),
            worker: None,
            phase: Phase::Detecting(Vec::new()),
        }
    }
}

impl Unpacker {
    pub fn new(dest_dir: impl Into<PathBuf>, behavior: Behavior) -> Self {
        Self::with_options(dest_dir, behavior, StreamOptions::default())
    }

    pub fn with_options(dest_dir: impl Into<PathBuf>, behavior: Behavior, options: StreamOptions) -> Self {
        Self::new_on(dest_dir.into(), behavior, options, current_os())
    }

    pub(crate) fn new_on(dest_dir: PathBuf, behavior: Behavior, options: StreamOptions, os: &str) -> Self {
        let phase = if behavior.is_resolved() {
            Phase::Detected
        } else {
            Phase::Detecting(Vec::new())
        };
        let unpacker = Self {
            dest_dir,
            behavior,
            options,
            errors: Arc::new(ErrorCell::new()),
            worker: None,
            phase,
        };
        if let Err(err) = check_platform(os) {
            warn!(error = %err, "Unpacker created on unsupported platform");
            unpacker.errors.store(err);
        }
        unpacker
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Configured behavior until detection succeeds, the detected one after
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// First error recorded for this stream, if any
    pub fn error(&self) -> Option<Error> {
        self.errors.get().cloned()
    }

    /// Finish the stream and wait for extraction to complete
    ///
    /// Closing before the format was known (or before any byte arrived) is
    /// reported as [`Error::Incomplete`].
    pub fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Detecting(prefix) => {
                let reason = if prefix.is_empty() {
                    "Unpacker closed prior to any bytes written"
                } else {
                    "Unpacker closed prior to detecting any file type"
                };
                self.errors.store(Error::Incomplete(reason.to_string()));
            }
            Phase::Detected => {
                self.errors.store(Error::Incomplete(
                    "Unpacker closed before the stream was opened".to_string(),
                ));
            }
            Phase::Streaming { mut writer } => {
                if let Err(e) = writer.close() {
                    // The worker stopped early; it recorded why.
                    debug!(dest = ?self.dest_dir, error = %e, "End-of-stream not delivered");
                }
                drop(writer);
                self.join_worker();
            }
            Phase::Failed | Phase::Closed => self.join_worker(),
        }
        self.errors.check()
    }

    /// Start the worker for the resolved format and replay `prefix` into it
    fn configure(&mut self, prefix: &[u8]) -> Result<()> {
        let compression = Compression::for_behavior(self.behavior)?;
        let (writer, reader) = bridge(self.options.pipe_depth);
        let job = UnpackJob {
            dest_dir: self.dest_dir.clone(),
            compression,
            errors: Arc::clone(&self.errors),
        };
        let worker = thread::Builder::new()
            .name("autopack-unpack".to_string())
            .spawn(move || job.run(reader))
            .map_err(|e| Error::io("starting unpack worker", e))?;

        debug!(dest = ?self.dest_dir, behavior = %self.behavior, "Unpack stream configured");
        self.worker = Some(worker);
        self.phase = Phase::Streaming { writer };

        if !prefix.is_empty() {
            self.forward(prefix)?;
        }
        Ok(())
    }

    /// Push bytes to the worker, treating a finished archive as a sink
    fn forward(&mut self, buf: &[u8]) -> Result<()> {
        let Phase::Streaming { writer } = &mut self.phase else {
            return Err(Error::Closed);
        };
        let result = writer.write_all(buf);
        match result {
            Ok(()) => Ok(()),
            // Trailing padding after the end-of-archive marker.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(bytes = buf.len(), "Discarding bytes after end of archive");
                Ok(())
            }
            Err(e) => {
                // The worker only drops its end after recording why.
                self.join_worker();
                match self.errors.get() {
                    Some(err) => Err(err.clone()),
                    None => Err(Error::io("writing unpack stream", e)),
                }
            }
        }
    }

    /// Record `err` (first wins) and tear the stream down
    fn fail(&mut self, err: Error) -> io::Error {
        if !self.errors.is_set() {
            self.errors.store(err);
        }
        // Dropping the writer lets a blocked worker fail and exit.
        self.phase = Phase::Failed;
        self.errors
            .get()
            .cloned()
            .unwrap_or_else(|| Error::StreamInvariant("error cell empty after store".to_string()))
            .into()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(dest = ?self.dest_dir, "Unpack worker panicked");
                self.errors
                    .store(Error::StreamInvariant("unpack worker panicked".to_string()));
            }
        }
    }
}

impl Write for Unpacker {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.dest_dir.as_os_str().is_empty() {
            return Err(Error::NotInitialized("Unpacker").into());
        }
        if matches!(self.phase, Phase::Closed) {
            return Err(Error::Closed.into());
        }
        if let Some(err) = self.errors.get().cloned() {
            return Err(self.fail(err));
        }

        match mem::replace(&mut self.phase, Phase::Failed) {
            Phase::Detecting(mut prefix) => {
                prefix.extend_from_slice(buf);
                match detect(&prefix) {
                    Ok(None) => {
                        self.phase = Phase::Detecting(prefix);
                        Ok(buf.len())
                    }
                    Ok(Some(found)) => {
                        debug!(behavior = %found, prefix = prefix.len(), "Detected archive format");
                        self.behavior = found;
                        self.configure(&prefix).map_err(|e| self.fail(e))?;
                        Ok(buf.len())
                    }
                    Err(err) => Err(self.fail(err)),
                }
            }
            Phase::Detected => {
                self.configure(&[]).map_err(|e| self.fail(e))?;
                self.forward(buf).map_err(|e| self.fail(e))?;
                Ok(buf.len())
            }
            Phase::Streaming { writer } => {
                self.phase = Phase::Streaming { writer };
                self.forward(buf).map_err(|e| self.fail(e))?;
                Ok(buf.len())
            }
            Phase::Failed | Phase::Closed => Err(Error::Closed.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything the extraction worker owns
struct UnpackJob {
    dest_dir: PathBuf,
    compression: Compression,
    errors: Arc<ErrorCell>,
}

impl UnpackJob {
    fn run(self, mut reader: PipeReader) {
        let handle = reader.handle();
        match self.unpack(&mut reader) {
            Ok(count) => {
                handle.finish_reader();
                info!(dest = ?self.dest_dir, entries = count, "Unpack stream complete");
            }
            Err(err) => {
                error!(dest = ?self.dest_dir, error = %err, "Unpack stream failed");
                self.errors.store(err);
            }
        }
        // `reader` drops here, after the outcome is recorded.
    }

    fn unpack(&self, reader: &mut PipeReader) -> Result<usize> {
        let mut archive = tar::Archive::new(self.compression.decoder(reader));
        let entries = archive
            .entries()
            .map_err(|e| Error::io("reading archive", e))?;

        let mut count = 0;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::io("reading archive entry", e))?;
            let meta = ArchiveEntry::from_tar(&entry)?;
            self.materialize(&meta, &mut entry)?;
            count += 1;
        }
        Ok(count)
    }

    fn materialize(&self, entry: &ArchiveEntry, body: &mut impl Read) -> Result<()> {
        let path = resolve_on_disk(&self.dest_dir, &entry.path)?;
        let context = || format!("unpacking file to {}", path.display());

        match entry.kind {
            EntryKind::Directory => {
                create_dir(&path, entry.mode).map_err(|e| Error::io(context(), e))?;
            }
            EntryKind::Regular => {
                ensure_parent(&path).map_err(|e| Error::io(context(), e))?;
                remove_symlink(&path).map_err(|e| Error::io(context(), e))?;
                write_file(&path, entry.mode, body).map_err(|e| Error::io(context(), e))?;
            }
            EntryKind::Symlink => {
                let target = link_target(entry)?;
                ensure_parent(&path).map_err(|e| Error::io(context(), e))?;
                create_symlink(target, &path).map_err(|e| Error::io(context(), e))?;
            }
            EntryKind::HardLink => {
                let target = resolve_on_disk(&self.dest_dir, link_target(entry)?)?;
                ensure_parent(&path).map_err(|e| Error::io(context(), e))?;
                fs::hard_link(&target, &path).map_err(|e| Error::io(context(), e))?;
            }
            EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
                debug!(path = ?entry.path, kind = ?entry.kind, "Skipping special file");
            }
            EntryKind::GlobalHeader => {}
            EntryKind::Other(flag) => {
                debug!(path = ?entry.path, flag, "Skipping entry with unknown type");
            }
        }
        Ok(())
    }
}

fn link_target(entry: &ArchiveEntry) -> Result<&Path> {
    entry.link_target.as_deref().ok_or_else(|| {
        Error::io(
            format!("unpacking link {}", entry.path.display()),
            io::Error::new(io::ErrorKind::InvalidData, "link entry has no target"),
        )
    })
}

/// Drop a symlink sitting where a file is about to be written
fn remove_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn write_file(path: &Path, mode: u32, body: &mut impl Read) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    io::copy(body, &mut file)?;
    // The umask applied at creation may have dropped bits.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn write_file(path: &Path, _mode: u32, body: &mut impl Read) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    io::copy(body, &mut file).map(|_| ())
}

#[cfg(unix)]
fn create_symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot create symlink {}", path.display()),
    ))
}
