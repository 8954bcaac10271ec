use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::{GateError, Result};

/// DEFLATE-compresses `data` if doing so is worthwhile; returns `(bytes, compressed_flag)`.
///
/// Small payloads are left uncompressed since the DEFLATE framing overhead would dominate;
/// the threshold matches the "lots of small packets, a few large ones" traffic shape typical of
/// a game gateway.
pub fn compress(data: &[u8]) -> Result<(Vec<u8>, bool)> {
    const MIN_COMPRESS_SIZE: usize = 256;
    if data.len() < MIN_COMPRESS_SIZE {
        return Ok((data.to_vec(), false));
    }

    let mut encoder = DeflateEncoder::new(data, Compression::default());
    let mut out = Vec::with_capacity(data.len());
    encoder
        .read_to_end(&mut out)
        .map_err(|_| GateError::Protocol("deflate compress failed"))?;
    Ok((out, true))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| GateError::Protocol("deflate decompress failed"))?;
    Ok(out)
}
