//! Compression layer between the tar codec and the stream bridge

use crate::bridge::PipeWriter;
use crate::config::StreamOptions;
use crate::format::Behavior;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, BufWriter, Read, Write};

/// Compression wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Codec for a resolved behavior; formats without one are refused
    pub(crate) fn for_behavior(behavior: Behavior) -> Result<Self> {
        match behavior {
            Behavior::Tar => Ok(Compression::None),
            Behavior::TarGZ => Ok(Compression::Gzip),
            Behavior::TarXZ | Behavior::Zip => Err(Error::NotImplemented(behavior)),
            Behavior::Auto => Err(Error::StreamInvariant(
                "codec requested before the format was resolved".to_string(),
            )),
        }
    }

    pub(crate) fn encoder(self, pipe: PipeWriter, options: &StreamOptions) -> Encoder {
        let buffered = BufWriter::with_capacity(options.chunk_size.max(1), pipe);
        match self {
            Compression::None => Encoder::Plain(buffered),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(
                buffered,
                flate2::Compression::new(options.compression_level.min(9)),
            )),
        }
    }

    pub(crate) fn decoder<R: Read>(self, reader: R) -> Decoder<R> {
        match self {
            Compression::None => Decoder::Plain(reader),
            Compression::Gzip => Decoder::Gzip(GzDecoder::new(reader)),
        }
    }
}

/// Sink the tar builder writes into
pub(crate) enum Encoder {
    Plain(BufWriter<PipeWriter>),
    Gzip(GzEncoder<BufWriter<PipeWriter>>),
}

impl Encoder {
    /// Flush every buffered byte (and the gzip trailer) and hand back the pipe
    pub(crate) fn finish(self) -> io::Result<PipeWriter> {
        let buffered = match self {
            Encoder::Plain(buffered) => buffered,
            Encoder::Gzip(encoder) => encoder.finish()?,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
        }
    }
}

/// Source the tar archive reads from
pub(crate) enum Decoder<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Plain(r) => r.read(buf),
            Decoder::Gzip(r) => r.read(buf),
        }
    }
}
