use thiserror::Error;

/// Compression schemes understood on the block transfer wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    None,
    Lz4,
}

impl CompressionAlgorithm {
    /// Parse the header's algorithm field; `""` means uncompressed.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" => Some(Self::None),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Algorithms advertised in `GetBlockChunked` requests.
    pub fn accepted() -> Vec<String> {
        vec!["lz4".to_string()]
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("corrupt lz4 payload: {0}")]
    Corrupt(String),

    #[error("decompressed to {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Restore a transferred payload to its declared original size.
///
/// Output shorter or longer than `original_len` is a failure, not a warning:
/// the header promised an exact size.
pub fn decompress(
    algorithm: CompressionAlgorithm,
    bytes: Vec<u8>,
    original_len: usize,
) -> Result<Vec<u8>, CompressionError> {
    let out = match algorithm {
        CompressionAlgorithm::None => bytes,
        CompressionAlgorithm::Lz4 => lz4_flex::block::decompress(&bytes, original_len)
            .map_err(|e| CompressionError::Corrupt(e.to_string()))?,
    };
    if algorithm != CompressionAlgorithm::None && out.len() != original_len {
        return Err(CompressionError::LengthMismatch {
            expected: original_len,
            actual: out.len(),
        });
    }
    Ok(out)
}
