//! Stream compression for property documents.
//!
//! The compression of a stored document is encoded in its file name:
//! `.json`, `.json.gz` or `.json.zlib`. Gzip and zlib streams come from
//! `flate2`.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// How a property document is compressed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Deflate,
}

impl CompressionFormat {
    /// All formats, in file lookup order.
    pub const ALL: [CompressionFormat; 3] = [
        CompressionFormat::None,
        CompressionFormat::Gzip,
        CompressionFormat::Deflate,
    ];

    /// The file suffix, including the `.json` part.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::None => ".json",
            CompressionFormat::Gzip => ".json.gz",
            CompressionFormat::Deflate => ".json.zlib",
        }
    }

    /// The format whose extension ends `name`, if any.
    pub fn match_filename(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| name.ends_with(f.extension()))
    }

    /// Like [`match_filename`](Self::match_filename), defaulting to `None`.
    pub fn from_filename(name: &str) -> Self {
        Self::match_filename(name).unwrap_or_default()
    }

    /// The format with exactly this extension.
    pub fn from_extension(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension() == suffix)
    }

    pub fn wrap_reader<R: Read>(&self, reader: R) -> DecompressReader<R> {
        match self {
            CompressionFormat::None => DecompressReader::Plain(reader),
            CompressionFormat::Gzip => DecompressReader::Gzip(GzDecoder::new(reader)),
            CompressionFormat::Deflate => DecompressReader::Deflate(ZlibDecoder::new(reader)),
        }
    }

    pub fn wrap_writer<W: Write>(&self, writer: W) -> CompressWriter<W> {
        match self {
            CompressionFormat::None => CompressWriter::Plain(writer),
            CompressionFormat::Gzip => CompressWriter::Gzip(GzEncoder::new(writer, Compression::default())),
            CompressionFormat::Deflate => {
                CompressWriter::Deflate(ZlibEncoder::new(writer, Compression::default()))
            }
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionFormat::None => "none",
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Deflate => "deflate",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionFormat::None),
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "deflate" | "zlib" => Ok(CompressionFormat::Deflate),
            other => Err(format!("unknown compression format '{other}'")),
        }
    }
}

/// A reader that decompresses according to a [`CompressionFormat`].
pub enum DecompressReader<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
    Deflate(ZlibDecoder<R>),
}

impl<R: Read> Read for DecompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecompressReader::Plain(r) => r.read(buf),
            DecompressReader::Gzip(r) => r.read(buf),
            DecompressReader::Deflate(r) => r.read(buf),
        }
    }
}

/// A writer that compresses according to a [`CompressionFormat`].
///
/// [`finish`](Self::finish) must be called to write the stream trailer.
pub enum CompressWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Deflate(ZlibEncoder<W>),
}

impl<W: Write> CompressWriter<W> {
    /// Flushes the compressed stream and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressWriter::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            CompressWriter::Gzip(w) => w.finish(),
            CompressWriter::Deflate(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressWriter::Plain(w) => w.write(buf),
            CompressWriter::Gzip(w) => w.write(buf),
            CompressWriter::Deflate(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressWriter::Plain(w) => w.flush(),
            CompressWriter::Gzip(w) => w.flush(),
            CompressWriter::Deflate(w) => w.flush(),
        }
    }
}
