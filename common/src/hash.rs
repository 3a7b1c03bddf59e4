use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte block identifier.
///
/// Hashes are totally ordered by lexicographic byte comparison and render as
/// lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const LEN: usize = 32;

    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", hex::encode(self.0))
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for BlockHash {
    #[inline]
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl AsRef<[u8]> for BlockHash {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for BlockHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<C> minicbor::Encode<C> for BlockHash {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for BlockHash {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected a 32-byte hash"))?;
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_and_parses_hex() {
        let hash = BlockHash::new([0xab; 32]);
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<BlockHash>().unwrap(), hash);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("abcd".parse::<BlockHash>().is_err());
    }

    #[test]
    fn orders_lexicographically() {
        let mut low = [0u8; 32];
        let mut high = [0u8; 32];
        low[0] = 1;
        high[0] = 2;
        assert!(BlockHash::new(low) < BlockHash::new(high));
    }

    #[test]
    fn cbor_round_trip() {
        let hash = BlockHash::new([7; 32]);
        let bytes = minicbor::to_vec(hash).unwrap();
        let back: BlockHash = minicbor::decode(&bytes).unwrap();
        assert_eq!(back, hash);
    }
}
