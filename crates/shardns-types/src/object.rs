use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of low bits of `lo` holding the object index.
pub const INDEX_BITS: u32 = 62;

/// Mask selecting the index bits of `lo`.
pub const INDEX_MASK: u64 = (1u64 << INDEX_BITS) - 1;

/// Index of the root group in every container.
pub const ROOT_INDEX: u64 = 1;

/// Kind of namespace node an [`ObjectId`] names, stored in the top two bits
/// of its `lo` word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Group,
    Dataset,
    NamedType,
    Map,
}

impl NodeKind {
    /// All kinds, in tag order.
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Group,
        NodeKind::Dataset,
        NodeKind::NamedType,
        NodeKind::Map,
    ];

    /// The 2-bit tag written into an object id.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Group => 0,
            Self::Dataset => 1,
            Self::NamedType => 2,
            Self::Map => 3,
        }
    }

    /// Parse a tag. Values outside the known set are an error, never a
    /// default kind.
    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        match tag {
            0 => Ok(Self::Group),
            1 => Ok(Self::Dataset),
            2 => Ok(Self::NamedType),
            3 => Ok(Self::Map),
            other => Err(TypeError::UnknownNodeKind(other)),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::Dataset => write!(f, "dataset"),
            Self::NamedType => write!(f, "named-type"),
            Self::Map => write!(f, "map"),
        }
    }
}

/// Source of the `hi` word of an object id.
///
/// The store owns the high half of every identifier (object class, layout
/// hints); callers only choose the `lo` word.
pub trait IdGenerator {
    /// Produce the full identifier for a caller-chosen `lo` word.
    fn generate(&self, lo: u64) -> ObjectId;
}

/// 128-bit identifier of a store object.
///
/// The `lo` word carries the [`NodeKind`] tag in its top two bits and a
/// monotonically assigned index in the low 62 bits. The `hi` word is filled
/// in by the store's [`IdGenerator`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub lo: u64,
    pub hi: u64,
}

impl ObjectId {
    /// Size of the wire form.
    pub const ENCODED_LEN: usize = 16;

    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Build the `lo` word for a node kind and index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit in 62 bits. Indices come from the
    /// container counter, so an overflow here is a logic error.
    pub fn encode_lo(kind: NodeKind, index: u64) -> u64 {
        assert!(
            index <= INDEX_MASK,
            "object index {index:#x} does not fit in {INDEX_BITS} bits"
        );
        (u64::from(kind.tag()) << INDEX_BITS) | (index & INDEX_MASK)
    }

    /// Encode a node kind and index into a full id using the store's
    /// generator for the `hi` word.
    pub fn encode<G: IdGenerator + ?Sized>(kind: NodeKind, index: u64, generator: &G) -> Self {
        generator.generate(Self::encode_lo(kind, index))
    }

    /// The node kind tagged into this id.
    pub fn decode_kind(&self) -> Result<NodeKind, TypeError> {
        NodeKind::from_tag((self.lo >> INDEX_BITS) as u8)
    }

    /// The 62-bit index.
    pub fn index(&self) -> u64 {
        self.lo & INDEX_MASK
    }

    /// Wire form: `lo` then `hi`, each little-endian.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.lo.to_le_bytes());
        out[8..].copy_from_slice(&self.hi.to_le_bytes());
        out
    }

    /// Parse the wire form. `bytes` must hold at least 16 bytes; extra bytes
    /// are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            lo: u64::from_le_bytes(lo),
            hi: u64::from_le_bytes(hi),
        })
    }

    /// Hex-encoded wire form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse from the hex-encoded wire form.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != Self::ENCODED_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode_kind() {
            Ok(kind) => write!(f, "ObjectId({kind}#{} hi={:#x})", self.index(), self.hi),
            Err(_) => write!(f, "ObjectId({:#018x}:{:#018x})", self.lo, self.hi),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}.{:016x}", self.hi, self.lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct ClassGenerator(u64);

    impl IdGenerator for ClassGenerator {
        fn generate(&self, lo: u64) -> ObjectId {
            ObjectId::new(lo, self.0 << 32)
        }
    }

    fn kind_strategy() -> impl Strategy<Value = NodeKind> {
        prop::sample::select(NodeKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn kind_survives_encoding(kind in kind_strategy(), index in 0..=INDEX_MASK) {
            let id = ObjectId::encode(kind, index, &ClassGenerator(7));
            prop_assert_eq!(id.decode_kind().unwrap(), kind);
            prop_assert_eq!(id.index(), index);
        }

        #[test]
        fn wire_form_is_lo_then_hi(lo: u64, hi: u64) {
            let id = ObjectId::new(lo, hi);
            let bytes = id.to_bytes();
            prop_assert_eq!(&bytes[..8], &lo.to_le_bytes()[..]);
            prop_assert_eq!(&bytes[8..], &hi.to_le_bytes()[..]);
            prop_assert_eq!(ObjectId::from_bytes(&bytes).unwrap(), id);
        }
    }

    #[test]
    fn tag_occupies_top_bits() {
        let lo = ObjectId::encode_lo(NodeKind::Map, 5);
        assert_eq!(lo >> 62, 3);
        assert_eq!(lo & INDEX_MASK, 5);
    }

    #[test]
    fn hi_word_comes_from_generator() {
        let id = ObjectId::encode(NodeKind::Dataset, 5, &ClassGenerator(0xab));
        assert_eq!(id.hi, 0xab << 32);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn oversized_index_panics() {
        ObjectId::encode_lo(NodeKind::Group, INDEX_MASK + 1);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert_eq!(NodeKind::from_tag(4), Err(TypeError::UnknownNodeKind(4)));
    }

    #[test]
    fn short_wire_form_rejected() {
        let err = ObjectId::from_bytes(&[0u8; 15]).unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 16, actual: 15 });
    }

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::new(0x4000_0000_0000_0005, 0x1234);
        assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ObjectId::new(42, 43);
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
