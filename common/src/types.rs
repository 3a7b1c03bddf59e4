//! Definition of Pergamon domain types

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;

/// Peer identity: a stable node id plus the endpoint it gossips on.
///
/// Equality and hashing go by `id` only, so a peer that re-announces itself
/// under a new address is still the same peer.
#[derive(Debug, Clone, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Node {
    /// Opaque node identifier
    #[cbor(n(0), with = "minicbor::bytes")]
    pub id: Vec<u8>,
    /// Gossip endpoint, host:port
    #[n(1)]
    pub address: String,
    /// Human-readable display name
    #[n(2)]
    pub name: String,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Block descriptor: the header-level view of a block, without the body.
///
/// All of `dependencies()` must be locally present before the full block can
/// be validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct BlockSummary {
    /// Hash of the block this summary describes
    #[n(0)]
    pub block_hash: BlockHash,
    /// Hashes of the block's parents
    #[n(1)]
    pub parent_hashes: Vec<BlockHash>,
    /// Hashes of the blocks justifying this one
    #[n(2)]
    pub justification_hashes: Vec<BlockHash>,
}

impl BlockSummary {
    /// Parents and justifications, deduplicated.
    pub fn dependencies(&self) -> BTreeSet<BlockHash> {
        self.parent_hashes
            .iter()
            .chain(self.justification_hashes.iter())
            .copied()
            .collect()
    }
}

/// Full block: summary plus the serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The block's descriptor
    #[n(0)]
    pub summary: BlockSummary,
    /// Serialized block body
    #[cbor(n(1), with = "minicbor::bytes")]
    pub payload: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.summary.block_hash
    }

    /// Encode to the CBOR wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("encoding a block to a vec is infallible")
    }

    /// Decode from the CBOR wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    #[test]
    fn dependencies_are_parents_and_justifications_deduplicated() {
        let summary = BlockSummary {
            block_hash: hash(1),
            parent_hashes: vec![hash(2), hash(3)],
            justification_hashes: vec![hash(3), hash(4)],
        };
        let deps = summary.dependencies();
        assert_eq!(deps, BTreeSet::from([hash(2), hash(3), hash(4)]));
    }

    #[test]
    fn block_codec_round_trip() {
        let block = Block {
            summary: BlockSummary {
                block_hash: hash(9),
                parent_hashes: vec![hash(8)],
                justification_hashes: vec![],
            },
            payload: b"deploys".to_vec(),
        };
        let bytes = block.to_bytes();
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);
    }

    #[test]
    fn block_decode_rejects_garbage() {
        assert!(Block::from_bytes(b"not cbor at all").is_err());
    }

    #[test]
    fn node_identity_goes_by_id() {
        let a = Node {
            id: vec![1, 2, 3],
            address: "10.0.0.1:40400".into(),
            name: "alpha".into(),
        };
        let moved = Node {
            id: vec![1, 2, 3],
            address: "10.0.0.2:40400".into(),
            name: "alpha-2".into(),
        };
        assert_eq!(a, moved);
    }
}
