//! Pluggable stream compression.
//!
//! A [`Compression`] mode turns a raw source into a decompressing [`Read`]
//! and a raw sink into a [`CompressedWriter`]. Every codec uses its
//! self-delimiting frame format, so a compressed stream can be decoded
//! without knowing its length in advance.
//!
//! | Mode     | Crate      | Feature  |
//! |----------|------------|----------|
//! | `none`   | -          | always   |
//! | `gzip`   | `flate2`   | `gzip`   |
//! | `snappy` | `snap`     | `snappy` |
//! | `lz4`    | `lz4_flex` | `lz4`    |

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use crate::error::{CerealError, Result};

/// Compression applied to a whole record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Bytes pass through untouched.
    #[default]
    None,
    /// Gzip members (`flate2`). Concatenated members are decoded as one stream.
    #[cfg(feature = "gzip")]
    Gzip,
    /// Snappy frame format (`snap`).
    #[cfg(feature = "snappy")]
    Snappy,
    /// LZ4 frame format (`lz4_flex`).
    #[cfg(feature = "lz4")]
    Lz4,
}

impl Compression {
    /// Every mode compiled into this build.
    pub fn available() -> Vec<Compression> {
        let mut modes = vec![Compression::None];
        #[cfg(feature = "gzip")]
        modes.push(Compression::Gzip);
        #[cfg(feature = "snappy")]
        modes.push(Compression::Snappy);
        #[cfg(feature = "lz4")]
        modes.push(Compression::Lz4);
        modes
    }

    /// Lowercase mode name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            #[cfg(feature = "gzip")]
            Compression::Gzip => "gzip",
            #[cfg(feature = "snappy")]
            Compression::Snappy => "snappy",
            #[cfg(feature = "lz4")]
            Compression::Lz4 => "lz4",
        }
    }

    /// Wraps `source` in the matching decompressor.
    pub fn reader<'a, R: Read + Send + 'a>(self, source: R) -> Box<dyn Read + Send + 'a> {
        match self {
            Compression::None => Box::new(source),
            #[cfg(feature = "gzip")]
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(source)),
            #[cfg(feature = "snappy")]
            Compression::Snappy => Box::new(snap::read::FrameDecoder::new(source)),
            #[cfg(feature = "lz4")]
            Compression::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(source)),
        }
    }

    /// Wraps `sink` in the matching compressor.
    ///
    /// The stream is only complete after [`CompressedWriter::finish`].
    pub fn writer<W: Write>(self, sink: W) -> CompressedWriter<W> {
        let encoder = match self {
            Compression::None => Encoder::Plain(sink),
            #[cfg(feature = "gzip")]
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                sink,
                flate2::Compression::default(),
            )),
            #[cfg(feature = "snappy")]
            Compression::Snappy => Encoder::Snappy(snap::write::FrameEncoder::new(sink)),
            #[cfg(feature = "lz4")]
            Compression::Lz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(sink)),
        };
        CompressedWriter { encoder }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = CerealError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Compression::available()
            .into_iter()
            .find(|mode| mode.name() == wanted)
            .ok_or_else(|| {
                CerealError::Compression(format!(
                    "Compression mode '{s}' is unknown or not compiled in"
                ))
            })
    }
}

enum Encoder<W: Write> {
    Plain(W),
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzEncoder<W>),
    #[cfg(feature = "snappy")]
    Snappy(snap::write::FrameEncoder<W>),
    #[cfg(feature = "lz4")]
    Lz4(lz4_flex::frame::FrameEncoder<W>),
}

/// A compressing [`Write`] over a sink `W`.
pub struct CompressedWriter<W: Write> {
    encoder: Encoder<W>,
}

impl<W: Write> CompressedWriter<W> {
    /// Writes any trailer, flushes, and returns the sink.
    ///
    /// # Errors
    /// The sink's I/O error, or `Compression` if the codec fails to finish.
    pub fn finish(self) -> Result<W> {
        let mut sink = match self.encoder {
            Encoder::Plain(sink) => sink,
            #[cfg(feature = "gzip")]
            Encoder::Gzip(encoder) => encoder.finish()?,
            #[cfg(feature = "snappy")]
            Encoder::Snappy(encoder) => encoder.into_inner().map_err(|e| {
                CerealError::Compression(format!("snappy stream did not finish: {}", e.error()))
            })?,
            #[cfg(feature = "lz4")]
            Encoder::Lz4(encoder) => encoder
                .finish()
                .map_err(|e| CerealError::Compression(format!("lz4 stream did not finish: {e}")))?,
        };
        sink.flush()?;
        Ok(sink)
    }

    fn inner(&mut self) -> &mut dyn Write {
        match &mut self.encoder {
            Encoder::Plain(sink) => sink,
            #[cfg(feature = "gzip")]
            Encoder::Gzip(encoder) => encoder,
            #[cfg(feature = "snappy")]
            Encoder::Snappy(encoder) => encoder,
            #[cfg(feature = "lz4")]
            Encoder::Lz4(encoder) => encoder,
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner().flush()
    }
}

impl<W: Write> fmt::Debug for CompressedWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.encoder {
            Encoder::Plain(_) => Compression::None,
            #[cfg(feature = "gzip")]
            Encoder::Gzip(_) => Compression::Gzip,
            #[cfg(feature = "snappy")]
            Encoder::Snappy(_) => Compression::Snappy,
            #[cfg(feature = "lz4")]
            Encoder::Lz4(_) => Compression::Lz4,
        };
        f.debug_struct("CompressedWriter").field("mode", &mode).finish()
    }
}
