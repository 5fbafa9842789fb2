//! Gzip helpers for large cache values.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress `data` when it is larger than `threshold` and compression helps.
///
/// Returns the bytes to store and whether they are compressed.
pub fn maybe_compress(data: Vec<u8>, threshold: usize) -> std::io::Result<(Vec<u8>, bool)> {
    if data.len() <= threshold {
        return Ok((data, false));
    }

    let compressed = compress(&data)?;
    if compressed.len() < data.len() {
        Ok((compressed, true))
    } else {
        Ok((data, false))
    }
}

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
