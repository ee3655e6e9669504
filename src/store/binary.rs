//! Binary encoding for f32 embedding vectors.
//!
//! Embeddings are stored as flat little-endian f32 bytes instead of JSON
//! text, which is roughly a third of the size and much faster to decode.
//! Dimensionality varies by embedding model, so the blob length just has to
//! be a multiple of 4.

use anyhow::{bail, Result};

/// Encode an f32 embedding vector as flat little-endian bytes.
pub fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vec.len() * 4);
    for &val in vec {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    buf
}

/// Decode an embedding blob back into an f32 vector.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        bail!(
            "Invalid embedding blob: length {} is not a positive multiple of 4",
            blob.len()
        );
    }
    let mut vec = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        vec.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vec)
}
