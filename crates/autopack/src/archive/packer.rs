//! Directory to archive byte stream

use super::codec::Compression;
use super::EntryKind;
use crate::bridge::{bridge, PipeReader, PipeWriter};
use crate::config::StreamOptions;
use crate::error_cell::ErrorCell;
use crate::format::{Behavior, DEFAULT_PACK_BEHAVIOR};
use crate::platform::{check_platform, current_os};
use crate::progress::{scan_directory_size, CountingReader, Progress};
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

enum Phase {
    /// Nothing read yet; the format is not fixed
    Idle,
    Streaming { reader: PipeReader },
    /// An error is recorded; the stream is torn down
    Failed,
    Closed,
}

/// Reads a directory tree as a tar or tar.gz byte stream
///
/// Archival starts lazily on the first `read` and runs on a worker thread
/// that feeds the caller through a bounded pipe. A second thread totals the
/// size of the tree for progress reporting, starting at construction.
///
/// The worker waits for that scan before emitting its first byte, so
/// [`bytes_complete`](Self::bytes_complete) never exceeds [`size`](Self::size).
/// On a very large tree the first `read` therefore blocks until the walk is
/// done, and a scan stalled on a slow filesystem stalls the stream with it.
///
/// ```no_run
/// use autopack::{Behavior, Packer};
/// use std::io;
///
/// let mut packer = Packer::new("/srv/data", Behavior::Auto);
/// let mut out = std::fs::File::create("/tmp/data.tar.gz")?;
/// io::copy(&mut packer, &mut out)?;
/// packer.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Packer {
    src_dir: PathBuf,
    behavior: Behavior,
    options: StreamOptions,
    errors: Arc<ErrorCell>,
    progress: Arc<Progress>,
    scan: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    phase: Phase,
}

impl Default for Packer {
    /// An unbound packer; every read fails with [`Error::NotInitialized`]
    fn default() -> Self {
        Self {
            src_dir: PathBuf::new(),
            behavior: Behavior::Auto,
            options: StreamOptions::default(),
            errors: Arc::new(ErrorCell::new()),
            progress: Arc::new(Progress::default()),
            scan: None,
            worker: None,
            phase: Phase::Idle,
        }
    }
}

impl Packer {
    /// Bind a packer to `src_dir` and start sizing it in the background
    pub fn new(src_dir: impl Into<PathBuf>, behavior: Behavior) -> Self {
        Self::with_options(src_dir, behavior, StreamOptions::default())
    }

    pub fn with_options(src_dir: impl Into<PathBuf>, behavior: Behavior, options: StreamOptions) -> Self {
        Self::new_on(src_dir.into(), behavior, options, current_os())
    }

    pub(crate) fn new_on(src_dir: PathBuf, behavior: Behavior, options: StreamOptions, os: &str) -> Self {
        let mut packer = Self {
            src_dir,
            behavior,
            options,
            errors: Arc::new(ErrorCell::new()),
            progress: Arc::new(Progress::default()),
            scan: None,
            worker: None,
            phase: Phase::Idle,
        };

        if let Err(err) = check_platform(os) {
            warn!(error = %err, "Packer created on unsupported platform");
            packer.errors.store(err);
            return packer;
        }
        if packer.src_dir.as_os_str().is_empty() {
            return packer;
        }

        let root = packer.src_dir.clone();
        let progress = Arc::clone(&packer.progress);
        let spawned = thread::Builder::new()
            .name("autopack-size-scan".to_string())
            .spawn(move || scan_directory_size(&root, &progress));
        match spawned {
            Ok(handle) => packer.scan = Some(handle),
            Err(err) => warn!(error = %err, "Unable to start size scan"),
        }
        packer
    }

    /// Source directory this packer reads from
    pub fn source_dir(&self) -> &Path {
        &self.src_dir
    }

    /// Requested behavior, or the resolved one once streaming has begun
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Total size in bytes of the regular files counted so far
    pub fn size(&self) -> u64 {
        self.progress.total()
    }

    /// Bytes of file content handed to the archive codec so far
    pub fn bytes_complete(&self) -> u64 {
        self.progress.done()
    }

    /// First error recorded for this stream, if any
    pub fn error(&self) -> Option<Error> {
        self.errors.get().cloned()
    }

    /// Stop the stream and wait for the worker
    ///
    /// Returns the first error the stream recorded. Reads after `close`
    /// fail with [`Error::Closed`].
    pub fn close(&mut self) -> Result<()> {
        self.progress.cancel();
        if let Phase::Streaming { mut reader } = mem::replace(&mut self.phase, Phase::Closed) {
            reader.close();
        }
        self.join_worker();
        // The scan stops at its next entry; no need to wait for it.
        self.scan.take();
        self.errors.check()
    }

    fn configure(&mut self) -> Result<()> {
        let behavior = match self.behavior {
            Behavior::Auto => DEFAULT_PACK_BEHAVIOR,
            other => other,
        };
        let compression = Compression::for_behavior(behavior)?;
        self.behavior = behavior;

        let (writer, reader) = bridge(self.options.pipe_depth);
        let job = PackJob {
            src_dir: self.src_dir.clone(),
            compression,
            options: self.options,
            errors: Arc::clone(&self.errors),
            progress: Arc::clone(&self.progress),
            scan: self.scan.take(),
        };
        let worker = thread::Builder::new()
            .name("autopack-pack".to_string())
            .spawn(move || job.run(writer))
            .map_err(|e| Error::io("starting pack worker", e))?;

        debug!(src = ?self.src_dir, behavior = %behavior, "Pack stream configured");
        self.worker = Some(worker);
        self.phase = Phase::Streaming { reader };
        Ok(())
    }

    /// Record `err` (first wins) and tear the stream down
    fn fail(&mut self, err: Error) -> io::Error {
        if !self.errors.is_set() {
            self.errors.store(err);
        }
        self.progress.cancel();
        if let Phase::Streaming { mut reader } = mem::replace(&mut self.phase, Phase::Failed) {
            reader.close();
        }
        self.errors
            .get()
            .cloned()
            .unwrap_or_else(|| Error::StreamInvariant("error cell empty after store".to_string()))
            .into()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(src = ?self.src_dir, "Pack worker panicked");
                self.errors
                    .store(Error::StreamInvariant("pack worker panicked".to_string()));
            }
        }
    }
}

impl Read for Packer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.src_dir.as_os_str().is_empty() {
            return Err(Error::NotInitialized("Packer").into());
        }
        if matches!(self.phase, Phase::Closed) {
            return Err(Error::Closed.into());
        }
        if let Some(err) = self.errors.get().cloned() {
            return Err(self.fail(err));
        }
        if matches!(self.phase, Phase::Idle) {
            if let Err(err) = self.configure() {
                return Err(self.fail(err));
            }
        }

        let Phase::Streaming { reader } = &mut self.phase else {
            return Err(Error::Closed.into());
        };
        let result = reader.read(buf);

        // The worker only drops its end after recording why.
        if matches!(&result, Err(e) if e.kind() != io::ErrorKind::Interrupted) {
            self.join_worker();
        }
        // Bytes already read are discarded once the worker has failed.
        if let Some(err) = self.errors.get().cloned() {
            return Err(self.fail(err));
        }
        match result {
            Err(e) if e.kind() != io::ErrorKind::Interrupted => {
                Err(self.fail(Error::io("reading pack stream", e)))
            }
            other => other,
        }
    }
}

impl Drop for Packer {
    fn drop(&mut self) {
        self.progress.cancel();
        if let Phase::Streaming { reader } = &mut self.phase {
            reader.close();
        }
    }
}

/// Everything the archival worker owns
struct PackJob {
    src_dir: PathBuf,
    compression: Compression,
    options: StreamOptions,
    errors: Arc<ErrorCell>,
    progress: Arc<Progress>,
    scan: Option<JoinHandle<()>>,
}

impl PackJob {
    fn run(mut self, pipe: PipeWriter) {
        // Finish sizing first so the byte count never passes the total.
        if let Some(scan) = self.scan.take() {
            if scan.join().is_err() {
                warn!(src = ?self.src_dir, "Size scan panicked");
            }
        }

        let handle = pipe.handle();
        match self.pack(pipe) {
            Ok(()) => info!(
                src = ?self.src_dir,
                bytes = self.progress.done(),
                "Pack stream complete"
            ),
            Err(_) if handle.reader_closed() => {
                debug!(src = ?self.src_dir, "Pack stream closed by reader");
            }
            Err(err) => {
                handle.abort_writer();
                error!(src = ?self.src_dir, error = %err, "Pack stream failed");
                self.errors.store(err);
            }
        }
    }

    fn pack(&self, pipe: PipeWriter) -> Result<()> {
        let handle = pipe.handle();
        let mut builder = tar::Builder::new(self.compression.encoder(pipe, &self.options));

        if let Err(err) = self.append_tree(&mut builder) {
            // Dropping the builder writes a trailer; make that fail fast.
            handle.abort_writer();
            return Err(err);
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::io("writing archive trailer", e))?;
        let mut pipe = encoder
            .finish()
            .map_err(|e| Error::io("flushing compressed stream", e))?;
        pipe.close()
            .map_err(|e| Error::io("closing pack stream", e))
    }

    fn append_tree<W: Write>(&self, builder: &mut tar::Builder<W>) -> Result<()> {
        for entry in WalkDir::new(&self.src_dir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            self.append_entry(builder, &entry)?;
        }
        Ok(())
    }

    fn append_entry<W: Write>(&self, builder: &mut tar::Builder<W>, entry: &DirEntry) -> Result<()> {
        let path = entry.path();
        let name = archive_name(&self.src_dir, path)?;
        let metadata = entry.metadata()?;
        let context = || format!("archiving {}", path.display());

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Complete);

        match EntryKind::from_file_type(metadata.file_type()) {
            EntryKind::Regular => {
                let size = metadata.len();
                header.set_size(size);
                let file = File::open(path).map_err(|e| Error::io(context(), e))?;
                let mut body = CountingReader::new(file.take(size), Arc::clone(&self.progress));
                builder
                    .append_data(&mut header, name, &mut body)
                    .map_err(|e| Error::io(context(), e))?;
                if body.count() != size {
                    return Err(Error::io(
                        context(),
                        io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while being archived"),
                    ));
                }
            }
            EntryKind::Symlink => {
                let target = fs::read_link(path).map_err(|e| Error::io(context(), e))?;
                header.set_size(0);
                builder
                    .append_link(&mut header, name, target)
                    .map_err(|e| Error::io(context(), e))?;
            }
            kind => {
                if kind.is_special() {
                    debug!(path = ?path, kind = ?kind, "Archiving header-only special file");
                }
                header.set_size(0);
                builder
                    .append_data(&mut header, name, io::empty())
                    .map_err(|e| Error::io(context(), e))?;
            }
        }
        Ok(())
    }
}

/// Name of a walked path inside the archive
fn archive_name<'a>(root: &Path, path: &'a Path) -> Result<&'a Path> {
    let name = path.strip_prefix(root).map_err(|_| {
        Error::StreamInvariant(format!(
            "walked path {} is not under {}",
            path.display(),
            root.display()
        ))
    })?;
    if name.as_os_str().is_empty() || name.has_root() {
        return Err(Error::StreamInvariant(format!(
            "walked path {} has no usable archive name",
            path.display()
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        tar::Archive::new(archive)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn test_default_packer_is_not_initialized() {
        let mut packer = Packer::default();
        let err = packer.read(&mut [0u8; 16]).unwrap_err();
        assert!(matches!(Error::from_io(&err), Some(Error::NotInitialized("Packer"))));
    }

    #[test]
    fn test_unsupported_platform_fails_every_read() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("kept.txt"), b"kept").unwrap();
        let mut packer = Packer::new_on(
            temp_dir.path().to_path_buf(),
            Behavior::Tar,
            StreamOptions::default(),
            "windows",
        );

        for _ in 0..2 {
            let err = packer.read(&mut [0u8; 16]).unwrap_err();
            assert!(matches!(Error::from_io(&err), Some(Error::UnsupportedPlatform(os)) if os == "windows"));
        }
        assert!(matches!(packer.close(), Err(Error::UnsupportedPlatform(_))));
        // No size scan ran and the tree is untouched.
        assert_eq!(packer.size(), 0);
        assert_eq!(
            autopack_testing::assertions::collect_entries(temp_dir.path()).unwrap(),
            vec![PathBuf::from("kept.txt")]
        );
    }

    #[test]
    fn test_unimplemented_behaviors() {
        for behavior in [Behavior::TarXZ, Behavior::Zip] {
            let temp_dir = TempDir::new().unwrap();
            let mut packer = Packer::new(temp_dir.path(), behavior);
            let err = packer.read(&mut [0u8; 16]).unwrap_err();
            assert!(matches!(Error::from_io(&err), Some(Error::NotImplemented(b)) if *b == behavior));
        }
    }

    #[test]
    fn test_tar_entries_are_sorted_and_relative() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("b")).unwrap();
        fs::write(temp_dir.path().join("b/inner.txt"), b"inner").unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"first").unwrap();

        let mut packer = Packer::new(temp_dir.path(), Behavior::Tar);
        let mut archive = Vec::new();
        packer.read_to_end(&mut archive).unwrap();
        packer.close().unwrap();

        assert_eq!(entry_names(&archive), vec!["a.txt", "b", "b/inner.txt"]);
        assert_eq!(packer.behavior(), Behavior::Tar);
    }

    #[test]
    fn test_auto_resolves_to_gzip() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"hello").unwrap();

        let mut packer = Packer::new(temp_dir.path(), Behavior::Auto);
        let mut archive = Vec::new();
        packer.read_to_end(&mut archive).unwrap();
        packer.close().unwrap();

        assert_eq!(packer.behavior(), Behavior::TarGZ);
        assert_eq!(&archive[..2], &[0x1F, 0x8B]);
    }

    #[test]
    fn test_missing_source_reports_walk_error() {
        let mut packer = Packer::new("/nonexistent/autopack/source", Behavior::Tar);
        let mut archive = Vec::new();
        let err = packer.read_to_end(&mut archive).unwrap_err();
        assert!(matches!(Error::from_io(&err), Some(Error::Io { .. })));
        assert!(packer.error().is_some());
        assert!(packer.close().is_err());
    }

    #[test]
    fn test_read_after_close() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), vec![7u8; 4096]).unwrap();

        let mut packer = Packer::new(temp_dir.path(), Behavior::Tar);
        let mut first = [0u8; 512];
        packer.read_exact(&mut first).unwrap();
        assert!(packer.close().is_ok());

        let err = packer.read(&mut first).unwrap_err();
        assert!(matches!(Error::from_io(&err), Some(Error::Closed)));
    }

    #[test]
    fn test_archive_name() {
        let root = Path::new("/src");
        assert_eq!(archive_name(root, Path::new("/src/a/b")).unwrap(), Path::new("a/b"));
        assert!(archive_name(root, Path::new("/src")).is_err());
        assert!(archive_name(root, Path::new("/other/a")).is_err());
    }
}
