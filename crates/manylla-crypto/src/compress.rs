//! Deflate framing for payloads sealed into sync blobs.
//!
//! Every framed payload starts with one header byte: [`RAW`] or
//! [`DEFLATE`]. Only payloads above [`COMPRESSION_THRESHOLD`] are tried, and
//! the deflated form is kept only when it is at least 10% smaller.
//! Compression happens before sealing; ciphertext does not compress.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::CryptoError;

/// Payloads up to this many bytes are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Refuse to inflate past this; a snapshot without photos is far smaller.
pub const MAX_UNPACKED_SIZE: u64 = 64 * 1024 * 1024;

pub const RAW: u8 = 0x00;
pub const DEFLATE: u8 = 0x01;

/// Frame `payload`, deflating it when that pays off.
pub fn pack(payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if payload.len() > COMPRESSION_THRESHOLD {
        let deflated = deflate(payload)?;
        if (deflated.len() - 1) * 10 <= payload.len() * 9 {
            return Ok(deflated);
        }
    }
    Ok(raw(payload))
}

fn deflate(payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut encoder = DeflateEncoder::new(vec![DEFLATE], Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| CryptoError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CryptoError::CompressionFailed(e.to_string()))
}

fn raw(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 1);
    framed.push(RAW);
    framed.extend_from_slice(payload);
    framed
}

/// Strip the header and inflate if needed.
pub fn unpack(framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match framed.split_first() {
        Some((&RAW, body)) => Ok(body.to_vec()),
        Some((&DEFLATE, body)) => {
            let mut out = Vec::new();
            DeflateDecoder::new(body)
                .take(MAX_UNPACKED_SIZE + 1)
                .read_to_end(&mut out)
                .map_err(|e| CryptoError::CompressionFailed(e.to_string()))?;
            if out.len() as u64 > MAX_UNPACKED_SIZE {
                return Err(CryptoError::CompressionFailed(format!(
                    "payload inflates past {MAX_UNPACKED_SIZE} bytes"
                )));
            }
            Ok(out)
        }
        Some((other, _)) => Err(CryptoError::CompressionFailed(format!(
            "unknown payload header {other:#04x}"
        ))),
        None => Err(CryptoError::CompressionFailed("empty payload".into())),
    }
}
