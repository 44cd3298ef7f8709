//! Wraps call payload bytes in the negotiated compression codec.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::error::ApplicationError;
use crate::wire::Compression;

/// Decompress `bytes` according to `algorithm`, returning the plaintext.
pub fn decompress(algorithm: Compression, bytes: &[u8]) -> Result<Vec<u8>, ApplicationError> {
    match algorithm {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| ApplicationError::new("hrpc.DecompressionException", e.to_string()))?;
            Ok(out)
        }
        Compression::Unsupported(tag) => Err(ApplicationError::unsupported_compression(tag)),
    }
}

/// Compress `bytes` according to `algorithm`.
pub fn compress(algorithm: Compression, bytes: &[u8]) -> Result<Vec<u8>, ApplicationError> {
    match algorithm {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder
                .write_all(bytes)
                .map_err(|e| ApplicationError::new("hrpc.CompressionException", e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| ApplicationError::new("hrpc.CompressionException", e.to_string()))
        }
        Compression::Unsupported(tag) => Err(ApplicationError::unsupported_compression(tag)),
    }
}

/// Wrap a reader in the decompression stream matching `algorithm`, for callers
/// that want to stream-decode a request object rather than materializing the
/// whole plaintext up front.
pub fn decompressing_reader<'a>(
    algorithm: Compression,
    bytes: &'a [u8],
) -> Result<Box<dyn Read + 'a>, ApplicationError> {
    match algorithm {
        Compression::None => Ok(Box::new(bytes)),
        Compression::Gzip => Ok(Box::new(GzDecoder::new(bytes))),
        Compression::Unsupported(tag) => Err(ApplicationError::unsupported_compression(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = compress(Compression::Gzip, &plaintext).unwrap();
        assert_ne!(compressed, plaintext);
        let decompressed = decompress(Compression::Gzip, &compressed).unwrap();
        assert_eq!(decompressed, plaintext);
    }

    #[test]
    fn none_is_identity() {
        let plaintext = b"pong".to_vec();
        let out = compress(Compression::None, &plaintext).unwrap();
        assert_eq!(out, plaintext);
        let back = decompress(Compression::None, &out).unwrap();
        assert_eq!(back, plaintext);
    }

    #[test]
    fn unsupported_tag_errors() {
        assert!(compress(Compression::Unsupported(9), b"x").is_err());
        assert!(decompress(Compression::Unsupported(9), b"x").is_err());
    }
}
