//! In-process blocking byte pipe between a foreground stream and its worker
//!
//! Bytes travel as owned frames over a bounded channel, so a writer blocks
//! once `depth` frames are queued and a reader blocks until one arrives.
//! Dropping either end unblocks the other.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

enum Frame {
    Data(Vec<u8>),
    End,
}

#[derive(Debug, Default)]
struct Shared {
    /// Reader consumed everything it wanted and stopped cleanly
    reader_finished: AtomicBool,
    /// Writer side gave up; further writes must fail fast
    writer_aborted: AtomicBool,
    /// Reader was closed by its owner before end-of-stream
    reader_closed: AtomicBool,
}

/// Create a connected writer/reader pair holding at most `depth` frames
pub(crate) fn bridge(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(depth.max(1));
    let shared = Arc::new(Shared::default());
    (
        PipeWriter {
            tx: Some(tx),
            shared: Arc::clone(&shared),
        },
        PipeReader {
            rx: Some(rx),
            current: Vec::new(),
            offset: 0,
            ended: false,
            shared,
        },
    )
}

/// Out-of-band control over a bridge, usable after an end has been moved
/// into a codec
#[derive(Debug, Clone)]
pub(crate) struct BridgeHandle(Arc<Shared>);

impl BridgeHandle {
    /// Mark the reading side as cleanly finished
    pub(crate) fn finish_reader(&self) {
        self.0.reader_finished.store(true, Ordering::Release);
    }

    /// Make every later write on the writing side fail immediately
    pub(crate) fn abort_writer(&self) {
        self.0.writer_aborted.store(true, Ordering::Release);
    }

    /// Whether the reading side was deliberately closed
    pub(crate) fn reader_closed(&self) -> bool {
        self.0.reader_closed.load(Ordering::Acquire)
    }
}

/// Writing end of the bridge
pub(crate) struct PipeWriter {
    tx: Option<Sender<Frame>>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    pub(crate) fn handle(&self) -> BridgeHandle {
        BridgeHandle(Arc::clone(&self.shared))
    }

    /// Signal a clean end-of-stream and release the channel
    ///
    /// Succeeds when the reader already stopped cleanly.
    pub(crate) fn close(&mut self) -> io::Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        match tx.send(Frame::End) {
            Ok(()) => Ok(()),
            Err(_) if self.shared.reader_finished.load(Ordering::Acquire) => Ok(()),
            Err(_) => Err(broken_pipe("reader closed before end of stream")),
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.shared.writer_aborted.load(Ordering::Acquire) {
            return Err(broken_pipe("write on aborted pipe"));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| broken_pipe("write on closed pipe"))?;
        match tx.send(Frame::Data(buf.to_vec())) {
            Ok(()) => Ok(buf.len()),
            Err(_) if self.shared.reader_finished.load(Ordering::Acquire) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "reader reached end of stream",
            )),
            Err(_) => Err(broken_pipe("reader closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading end of the bridge
pub(crate) struct PipeReader {
    rx: Option<Receiver<Frame>>,
    current: Vec<u8>,
    offset: usize,
    ended: bool,
    shared: Arc<Shared>,
}

impl PipeReader {
    pub(crate) fn handle(&self) -> BridgeHandle {
        BridgeHandle(Arc::clone(&self.shared))
    }

    /// Drop the channel so a blocked or future writer fails
    pub(crate) fn close(&mut self) {
        self.shared.reader_closed.store(true, Ordering::Release);
        self.rx = None;
        self.current.clear();
        self.offset = 0;
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset == self.current.len() {
            if self.ended {
                return Ok(0);
            }
            let rx = self
                .rx
                .as_ref()
                .ok_or_else(|| broken_pipe("read on closed pipe"))?;
            match rx.recv() {
                Ok(Frame::Data(data)) => {
                    self.current = data;
                    self.offset = 0;
                }
                Ok(Frame::End) => {
                    self.ended = true;
                    self.rx = None;
                }
                Err(_) => return Err(broken_pipe("writer closed before end of stream")),
            }
        }

        let available = &self.current[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

fn broken_pipe(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bytes_flow_in_order() {
        let (mut writer, mut reader) = bridge(2);
        let producer = thread::spawn(move || {
            for i in 0..100u8 {
                writer.write_all(&[i; 7]).unwrap();
            }
            writer.close().unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        producer.join().unwrap();

        assert_eq!(out.len(), 700);
        assert!(out.chunks(7).enumerate().all(|(i, c)| c.iter().all(|b| *b == i as u8)));
    }

    #[test]
    fn test_dropped_writer_is_not_clean_eof() {
        let (mut writer, mut reader) = bridge(4);
        writer.write_all(b"partial").unwrap();
        drop(writer);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(out, b"partial");
    }

    #[test]
    fn test_closed_reader_unblocks_writer() {
        let (mut writer, mut reader) = bridge(1);
        let producer = thread::spawn(move || {
            let mut result = Ok(());
            for _ in 0..64 {
                result = writer.write_all(&[0u8; 1024]);
                if result.is_err() {
                    break;
                }
            }
            result
        });

        let mut first = [0u8; 16];
        reader.read_exact(&mut first).unwrap();
        let handle = reader.handle();
        reader.close();
        assert!(handle.reader_closed());

        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_finished_reader_reports_eof_to_writer() {
        let (mut writer, reader) = bridge(1);
        reader.handle().finish_reader();
        drop(reader);

        let err = writer.write(b"trailing").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(writer.close().is_ok());
    }

    #[test]
    fn test_aborted_writer_fails_fast() {
        let (mut writer, _reader) = bridge(1);
        writer.handle().abort_writer();
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_empty_write_sends_nothing() {
        // Room for the data frame and the end marker.
        let (mut writer, mut reader) = bridge(2);
        assert_eq!(writer.write(&[]).unwrap(), 0);
        writer.write_all(b"ab").unwrap();
        writer.close().unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "ab");
    }
}
