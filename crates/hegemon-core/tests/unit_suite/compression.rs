//! Compression codec unit tests.
//!
//! Covers file-to-file roundtrips (empty, sub-chunk and multi-chunk inputs),
//! corrupt and truncated streams, and the declared-versus-supported format
//! split.

use hegemon_core::compression::{Codec, CHUNK_SIZE};
use hegemon_core::config::{CompressionFormat, CompressionLevel, CompressionSpec};
use hegemon_core::CompressionError;
use std::path::Path;
use tempfile::TempDir;

use super::helpers::{generate_random_bytes, generate_sql_dump};

fn codec(level: CompressionLevel) -> Codec {
    Codec::new(CompressionSpec {
        format: CompressionFormat::Zstd,
        level,
    })
    .expect("zstd is supported")
}

fn roundtrip(dir: &Path, codec: &Codec, data: &[u8]) -> Vec<u8> {
    let src = dir.join("input.sql");
    let packed = dir.join("input.sql.zst");
    let out = dir.join("output.sql");
    std::fs::write(&src, data).unwrap();

    codec.compress(&src, &packed).expect("Compression failed");
    let written = codec.decompress(&packed, &out).expect("Decompression failed");
    assert_eq!(written, data.len() as u64);

    std::fs::read(&out).unwrap()
}

// ============================================================================
// Roundtrip Tests
// ============================================================================

#[test]
fn compression_roundtrip_empty_file() {
    let dir = TempDir::new().unwrap();
    let restored = roundtrip(dir.path(), &codec(CompressionLevel::Medium), b"");
    assert!(restored.is_empty());
}

#[test]
fn compression_roundtrip_larger_than_chunk() {
    let dir = TempDir::new().unwrap();
    let data = generate_random_bytes(CHUNK_SIZE * 5 + 123);
    let restored = roundtrip(dir.path(), &codec(CompressionLevel::High), &data);
    assert_eq!(restored, data);
}

#[test]
fn compression_roundtrip_every_level() {
    let data = generate_sql_dump(50_000);
    for level in [
        CompressionLevel::Low,
        CompressionLevel::Medium,
        CompressionLevel::High,
    ] {
        let dir = TempDir::new().unwrap();
        assert_eq!(roundtrip(dir.path(), &codec(level), &data), data);
    }
}

#[test]
fn compression_shrinks_sql_dump() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("dump.sql");
    let packed = dir.path().join("dump.sql.zst");
    std::fs::write(&src, generate_sql_dump(200_000)).unwrap();

    let size = codec(CompressionLevel::Medium)
        .compress(&src, &packed)
        .unwrap();

    assert_eq!(size, std::fs::metadata(&packed).unwrap().len());
    assert!(size < 200_000 / 4, "expected at least 4:1, got {} bytes", size);
}

// ============================================================================
// Corrupt Stream Tests
// ============================================================================

#[test]
fn compression_truncated_stream_is_detected() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("dump.sql");
    let packed = dir.path().join("dump.sql.zst");
    std::fs::write(&src, generate_random_bytes(CHUNK_SIZE * 3)).unwrap();

    let codec = codec(CompressionLevel::Medium);
    codec.compress(&src, &packed).unwrap();

    let full = std::fs::read(&packed).unwrap();
    std::fs::write(&packed, &full[..full.len() / 2]).unwrap();

    let err = codec
        .decompress(&packed, &dir.path().join("out.sql"))
        .unwrap_err();
    assert!(
        matches!(err, CompressionError::CorruptStream { .. }),
        "expected CorruptStream, got {:?}",
        err
    );
}

#[test]
fn compression_flipped_bytes_are_detected() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("dump.sql");
    let packed = dir.path().join("dump.sql.zst");
    std::fs::write(&src, generate_sql_dump(30_000)).unwrap();

    let codec = codec(CompressionLevel::Low);
    codec.compress(&src, &packed).unwrap();

    let mut bytes = std::fs::read(&packed).unwrap();
    let mid = bytes.len() / 2;
    for b in &mut bytes[mid..mid + 16] {
        *b ^= 0xFF;
    }
    std::fs::write(&packed, &bytes).unwrap();

    assert!(codec
        .decompress(&packed, &dir.path().join("out.sql"))
        .is_err());
}

// ============================================================================
// Format and Estimate Tests
// ============================================================================

#[test]
fn compression_declared_formats_are_rejected() {
    for format in CompressionFormat::DECLARED {
        let result = Codec::new(CompressionSpec {
            format,
            level: CompressionLevel::Medium,
        });
        assert_eq!(result.is_ok(), format.is_supported(), "{}", format);
    }
}

#[test]
fn compression_estimate_orders_by_level() {
    let input = 1_000_000;
    let low = codec(CompressionLevel::Low).estimate_size(input);
    let medium = codec(CompressionLevel::Medium).estimate_size(input);
    let high = codec(CompressionLevel::High).estimate_size(input);

    assert!(low > medium && medium > high);
    assert_eq!(medium, 900_000 + 1024);
}
