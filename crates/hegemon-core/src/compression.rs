//! Streaming compression codec for backup artifacts.

use crate::config::{CompressionFormat, CompressionLevel, CompressionSpec};
use crate::error::CompressionError;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Default compression level for zstd
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Bytes read per iteration; memory use is bounded by this, not the file size
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Fixed overhead added to every size estimate (frame header, checksum)
pub const HEADER_OVERHEAD: u64 = 1024;

type CodecResult<T> = std::result::Result<T, CompressionError>;

/// A configured codec.
///
/// Constructing one fails for declared-but-unsupported formats, so a held
/// `Codec` is always usable.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    spec: CompressionSpec,
}

impl Codec {
    pub fn new(spec: CompressionSpec) -> CodecResult<Self> {
        if !spec.format.is_supported() {
            return Err(CompressionError::UnsupportedFormat(spec.format.to_string()));
        }
        Ok(Self { spec })
    }

    /// Extension appended to compressed files, including the leading dot
    pub fn file_extension(&self) -> &'static str {
        self.spec.format.extension()
    }

    /// Whether `name` carries this codec's extension
    pub fn matches(&self, name: &str) -> bool {
        name.ends_with(self.file_extension())
    }

    /// Heuristic output size used for space pre-flight checks
    pub fn estimate_size(&self, input_bytes: u64) -> u64 {
        let scaled = match self.spec.level {
            CompressionLevel::Low => input_bytes,
            CompressionLevel::Medium => input_bytes / 10 * 9 + (input_bytes % 10) * 9 / 10,
            CompressionLevel::High => input_bytes / 10 * 8 + (input_bytes % 10) * 8 / 10,
        };
        scaled + HEADER_OVERHEAD
    }

    /// Compress `src` into `dst`, returning the compressed size in bytes.
    ///
    /// Blocking; callers on the async runtime should use `spawn_blocking`.
    pub fn compress(&self, src: &Path, dst: &Path) -> CodecResult<u64> {
        let input = File::open(src).map_err(|e| io_error(src, e))?;
        let output = File::create(dst).map_err(|e| io_error(dst, e))?;

        let mut reader = BufReader::with_capacity(CHUNK_SIZE, input);
        let writer = BufWriter::with_capacity(CHUNK_SIZE, output);
        let mut encoder = zstd::stream::write::Encoder::new(writer, zstd_level(self.spec.level))
            .map_err(|e| io_error(dst, e))?;
        encoder
            .include_checksum(true)
            .map_err(|e| io_error(dst, e))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(src, e)),
            };
            encoder.write_all(&buf[..n]).map_err(|e| io_error(dst, e))?;
        }

        let mut writer = encoder.finish().map_err(|e| io_error(dst, e))?;
        writer.flush().map_err(|e| io_error(dst, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_error(dst, e.into_error()))?;
        file.sync_all().map_err(|e| io_error(dst, e))?;

        let size = file.metadata().map_err(|e| io_error(dst, e))?.len();
        Ok(size)
    }

    /// Decompress `src` into `dst`, returning the decompressed size in bytes.
    ///
    /// Truncated or undecodable input is reported as `CorruptStream`; the
    /// partially written `dst` is left for the caller to discard.
    pub fn decompress(&self, src: &Path, dst: &Path) -> CodecResult<u64> {
        let input = File::open(src).map_err(|e| io_error(src, e))?;
        let output = File::create(dst).map_err(|e| io_error(dst, e))?;

        let reader = BufReader::with_capacity(CHUNK_SIZE, input);
        let mut decoder =
            zstd::stream::read::Decoder::with_buffer(reader).map_err(|e| corrupt(src, e))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, output);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match decoder.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(corrupt(src, e)),
            };
            writer.write_all(&buf[..n]).map_err(|e| io_error(dst, e))?;
            total += n as u64;
        }

        writer.flush().map_err(|e| io_error(dst, e))?;
        Ok(total)
    }
}

fn zstd_level(level: CompressionLevel) -> i32 {
    match level {
        CompressionLevel::Low => 1,
        CompressionLevel::Medium => DEFAULT_ZSTD_LEVEL,
        CompressionLevel::High => 19,
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CompressionError {
    CompressionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, err: std::io::Error) -> CompressionError {
    let message = if err.kind() == ErrorKind::UnexpectedEof {
        format!("stream ended before the frame was complete ({})", err)
    } else {
        err.to_string()
    };
    CompressionError::CorruptStream {
        path: path.to_path_buf(),
        message,
    }
}

/// Detect a declared compression format from a file name
pub fn detect_from_extension(name: &str) -> Option<CompressionFormat> {
    CompressionFormat::detect_from_extension(name)
}
