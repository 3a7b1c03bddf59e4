//! Definition of Pergamon gossip wire messages

use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;
use crate::types::Node;

/// Announcement that the sender holds the listed blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct NewBlocksRequest {
    /// The announcing node
    #[n(0)]
    pub sender: Node,
    /// Hashes of the blocks on offer
    #[n(1)]
    pub block_hashes: Vec<BlockHash>,
}

/// Reply to a `NewBlocksRequest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct NewBlocksResponse {
    /// Whether any of the announced blocks was new to the receiver
    #[n(0)]
    pub is_new: bool,
}

/// Request for a chunked block transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct GetBlockChunkedRequest {
    /// Hash of the requested block
    #[n(0)]
    pub block_hash: BlockHash,
    /// Compression algorithms the requester can decode, e.g. `["lz4"]`
    #[n(1)]
    pub accepted_compression_algorithms: Vec<String>,
}

/// One frame of a chunked block transfer.
///
/// The first frame must be a `Header`; every following frame must be `Data`,
/// and the data byte total must not exceed the header's `content_length`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Chunk {
    #[n(0)]
    Header(#[n(0)] ChunkHeader),
    #[n(1)]
    Data(#[cbor(n(0), with = "minicbor::bytes")] Vec<u8>),
}

/// Leading frame of a chunked block transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ChunkHeader {
    /// `""` for no compression, or the algorithm name, e.g. `"lz4"`
    #[n(0)]
    pub compression_algorithm: String,
    /// Total transferred size in bytes: the sum of all data frame lengths
    #[n(1)]
    pub content_length: u32,
    /// Size in bytes after decompression
    #[n(2)]
    pub original_content_length: u32,
}
