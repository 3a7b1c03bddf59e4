use pergamon_common::messages::Chunk;
use thiserror::Error;

use crate::compression::CompressionAlgorithm;
use crate::services::ChunkStream;

/// First-violation errors from folding a chunk stream. The stream is
/// abandoned as soon as one is produced.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("did not start with a header")]
    FirstChunkNotHeader,

    #[error("second header")]
    SecondHeader,

    #[error("unexpected algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("empty data frame")]
    EmptyDataFrame,

    #[error("exceeding promised content length")]
    ContentLengthExceeded,

    #[error("did not receive a header")]
    MissingHeader,

    #[error("no data received")]
    NoData,

    /// The stream itself failed mid-transfer
    #[error(transparent)]
    Transport(anyhow::Error),
}

/// A fully received transfer, not yet decompressed.
#[derive(Debug)]
pub struct AssembledContent {
    pub compression: CompressionAlgorithm,
    pub original_content_length: u32,
    pub bytes: Vec<u8>,
}

/// Fold a chunk stream into a length-policed byte buffer.
///
/// Exactly one header frame must arrive first; data frames follow in arrival
/// order and may not exceed the header's promised content length.
pub async fn assemble(mut stream: ChunkStream) -> Result<AssembledContent, ChunkError> {
    let mut header = None;
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.recv().await {
        match chunk.map_err(ChunkError::Transport)? {
            Chunk::Header(h) => {
                if header.is_some() {
                    return Err(ChunkError::SecondHeader);
                }
                let compression = CompressionAlgorithm::parse(&h.compression_algorithm)
                    .ok_or(ChunkError::UnexpectedAlgorithm(h.compression_algorithm))?;
                header = Some((compression, h.content_length, h.original_content_length));
            }
            Chunk::Data(data) => {
                let Some((_, content_length, _)) = header else {
                    return Err(ChunkError::FirstChunkNotHeader);
                };
                if data.is_empty() {
                    return Err(ChunkError::EmptyDataFrame);
                }
                if bytes.len() + data.len() > content_length as usize {
                    return Err(ChunkError::ContentLengthExceeded);
                }
                bytes.extend_from_slice(&data);
            }
        }
    }

    let Some((compression, content_length, original_content_length)) = header else {
        return Err(ChunkError::MissingHeader);
    };
    if bytes.is_empty() && content_length > 0 {
        return Err(ChunkError::NoData);
    }
    Ok(AssembledContent {
        compression,
        original_content_length,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use pergamon_common::messages::ChunkHeader;
    use tokio::sync::mpsc;

    use super::*;

    fn header(algorithm: &str, content_length: u32, original: u32) -> Chunk {
        Chunk::Header(ChunkHeader {
            compression_algorithm: algorithm.to_string(),
            content_length,
            original_content_length: original,
        })
    }

    async fn assemble_all(chunks: Vec<anyhow::Result<Chunk>>) -> Result<AssembledContent, ChunkError> {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        drop(tx);
        assemble(rx).await
    }

    #[tokio::test]
    async fn assembles_data_in_arrival_order() {
        let content = assemble_all(vec![
            Ok(header("", 11, 11)),
            Ok(Chunk::Data(b"hello ".to_vec())),
            Ok(Chunk::Data(b"world".to_vec())),
        ])
        .await
        .unwrap();
        assert_eq!(content.bytes, b"hello world");
        assert_eq!(content.compression, CompressionAlgorithm::None);
        assert_eq!(content.original_content_length, 11);
    }

    #[tokio::test]
    async fn rejects_data_before_header() {
        let err = assemble_all(vec![Ok(Chunk::Data(b"early".to_vec()))]).await.unwrap_err();
        assert_eq!(err.to_string(), "did not start with a header");
    }

    #[tokio::test]
    async fn rejects_second_header() {
        let err = assemble_all(vec![Ok(header("", 5, 5)), Ok(header("", 5, 5))])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "second header");
    }

    #[tokio::test]
    async fn rejects_unknown_algorithm() {
        let err = assemble_all(vec![Ok(header("zstd", 5, 5))]).await.unwrap_err();
        assert_eq!(err.to_string(), "unexpected algorithm: zstd");
    }

    #[tokio::test]
    async fn rejects_empty_data_frame() {
        let err = assemble_all(vec![Ok(header("", 5, 5)), Ok(Chunk::Data(vec![]))])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "empty data frame");
    }

    #[tokio::test]
    async fn rejects_excess_content() {
        // header promises 10 bytes, peer sends 6 + 5
        let err = assemble_all(vec![
            Ok(header("", 10, 10)),
            Ok(Chunk::Data(vec![0; 6])),
            Ok(Chunk::Data(vec![0; 5])),
        ])
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "exceeding promised content length");
    }

    #[tokio::test]
    async fn rejects_empty_stream() {
        let err = assemble_all(vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "did not receive a header");
    }

    #[tokio::test]
    async fn rejects_header_without_data() {
        let err = assemble_all(vec![Ok(header("", 5, 5))]).await.unwrap_err();
        assert_eq!(err.to_string(), "no data received");
    }

    #[tokio::test]
    async fn tolerates_no_data_for_empty_content() {
        let content = assemble_all(vec![Ok(header("", 0, 0))]).await.unwrap();
        assert!(content.bytes.is_empty());
    }

    #[tokio::test]
    async fn surfaces_mid_stream_transport_errors() {
        let err = assemble_all(vec![
            Ok(header("", 10, 10)),
            Ok(Chunk::Data(vec![0; 4])),
            Err(anyhow!("connection reset")),
        ])
        .await
        .unwrap_err();
        assert!(matches!(err, ChunkError::Transport(_)));
    }
}
