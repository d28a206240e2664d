//! Fixed-size perceptual hash and its chunked/binary representations.
//!
//! A hash is `HASH_SIZE * HASH_SIZE` bits rendered as lowercase hex. Storage
//! never keeps it as one opaque value: it is split into `NUM_CHUNKS` chunks of
//! `CHUNK_WIDTH` hex characters so each chunk position can be indexed for
//! exact equality (see [`crate::similarity::filter`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the hash grid. Must be a power of two.
pub const HASH_SIZE: u32 = 16;

pub const BITS_PER_NIBBLE: usize = 4;

/// Hex characters per stored chunk.
pub const CHUNK_WIDTH: usize = 2;

pub const TOTAL_BITS: usize = (HASH_SIZE * HASH_SIZE) as usize;

pub const HEX_LEN: usize = TOTAL_BITS / BITS_PER_NIBBLE;

pub const NUM_CHUNKS: usize = HEX_LEN / CHUNK_WIDTH;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Hash must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Hash contains a non-hex character: {0:?}")]
    InvalidHex(char),
    #[error("Expected {expected} chunks, got {actual}")]
    InvalidChunks { expected: usize, actual: usize },
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image is too small to hash ({width}x{height})")]
    ImageTooSmall { width: u32, height: u32 },
}

/// A validated `HEX_LEN`-character lowercase hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageHash(String);

impl ImageHash {
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        if hex.len() != HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HEX_LEN,
                actual: hex.len(),
            });
        }
        if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(bad));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Reassemble a hash from its stored chunks. Inverse of [`ImageHash::to_chunks`].
    pub fn from_chunks<S: AsRef<str>>(chunks: &[S]) -> Result<Self, HashError> {
        if chunks.len() != NUM_CHUNKS {
            return Err(HashError::InvalidChunks {
                expected: NUM_CHUNKS,
                actual: chunks.len(),
            });
        }
        let joined: String = chunks.iter().map(|c| c.as_ref()).collect();
        Self::from_hex(&joined)
    }

    /// Pack row-major bits (MSB first) into a hash.
    pub(crate) fn from_bits(bits: &[bool]) -> Self {
        assert_eq!(bits.len(), TOTAL_BITS, "hash bit count mismatch");
        let hex = bits
            .chunks(BITS_PER_NIBBLE)
            .map(|nibble| {
                let value = nibble
                    .iter()
                    .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit));
                char::from_digit(value, 16).unwrap_or('0')
            })
            .collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The chunk at `index`, `CHUNK_WIDTH` characters wide.
    pub fn chunk(&self, index: usize) -> &str {
        let start = index * CHUNK_WIDTH;
        &self.0[start..start + CHUNK_WIDTH]
    }

    pub fn to_chunks(&self) -> Vec<String> {
        (0..NUM_CHUNKS).map(|i| self.chunk(i).to_string()).collect()
    }

    pub fn to_binary(&self) -> String {
        let mut out = String::with_capacity(TOTAL_BITS);
        for c in self.0.chars() {
            // Validated on construction.
            let nibble = c.to_digit(16).unwrap_or_default();
            out.push_str(&format!("{nibble:04b}"));
        }
        out
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ImageHash> for String {
    fn from(hash: ImageHash) -> Self {
        hash.0
    }
}

/// Expand hex into a bit string, four left-padded bits per nibble.
pub fn hex_to_binary(hex: &str) -> Result<String, HashError> {
    let mut out = String::with_capacity(hex.len() * BITS_PER_NIBBLE);
    for c in hex.chars() {
        let nibble = c.to_digit(16).ok_or(HashError::InvalidHex(c))?;
        out.push_str(&format!("{nibble:04b}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hex() -> String {
        "0123456789abcdef".repeat(4)
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(TOTAL_BITS, 256);
        assert_eq!(HEX_LEN, 64);
        assert_eq!(NUM_CHUNKS, 32);
    }

    #[test]
    fn test_chunks_round_trip() {
        let hash = ImageHash::from_hex(&sample_hex()).unwrap();
        let chunks = hash.to_chunks();
        assert_eq!(chunks.len(), NUM_CHUNKS);
        assert_eq!(chunks[0], "01");
        assert_eq!(chunks[7], "ef");
        assert_eq!(ImageHash::from_chunks(&chunks).unwrap(), hash);
    }

    #[test]
    fn test_binary_is_left_padded_per_nibble() {
        assert_eq!(hex_to_binary("0f").unwrap(), "00001111");
        assert_eq!(hex_to_binary("a1").unwrap(), "10100001");
        assert!(matches!(hex_to_binary("0g"), Err(HashError::InvalidHex('g'))));

        let hash = ImageHash::from_hex(&"0".repeat(HEX_LEN)).unwrap();
        let binary = hash.to_binary();
        assert_eq!(binary.len(), TOTAL_BITS);
        assert!(binary.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_uppercase_normalized() {
        let hash = ImageHash::from_hex(&"AB".repeat(32)).unwrap();
        assert_eq!(hash.as_str(), "ab".repeat(32));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            ImageHash::from_hex("abc"),
            Err(HashError::InvalidLength { actual: 3, .. })
        ));
        let bad = format!("{}zz", "0".repeat(HEX_LEN - 2));
        assert!(matches!(
            ImageHash::from_hex(&bad),
            Err(HashError::InvalidHex('z'))
        ));
        assert!(matches!(
            ImageHash::from_chunks(&["00"; 3]),
            Err(HashError::InvalidChunks { actual: 3, .. })
        ));
    }

    #[test]
    fn test_from_bits_msb_first() {
        let mut bits = vec![false; TOTAL_BITS];
        bits[0] = true;
        bits[7] = true;
        let hash = ImageHash::from_bits(&bits);
        assert_eq!(hash.chunk(0), "81");
        assert_eq!(&hash.as_str()[2..], "0".repeat(HEX_LEN - 2));
    }
}
