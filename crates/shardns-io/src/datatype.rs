use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IoError, IoResult};

/// Size of an in-memory variable-length sequence descriptor.
pub const VL_DESCRIPTOR_SIZE: usize = 16;
/// Size of an in-memory variable-length string descriptor.
pub const VL_STRING_DESCRIPTOR_SIZE: usize = 8;
/// Size of an object reference.
pub const REFERENCE_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// A named member of a compound type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub offset: usize,
    pub ty: Datatype,
}

impl Member {
    pub fn new(name: impl Into<String>, offset: usize, ty: Datatype) -> Self {
        Self {
            name: name.into(),
            offset,
            ty,
        }
    }

    fn end(&self) -> usize {
        self.offset + self.ty.size()
    }
}

/// Element type descriptor for datasets, attributes and map keys/values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    Integer {
        size: usize,
        signed: bool,
        order: ByteOrder,
    },
    Float {
        size: usize,
        order: ByteOrder,
    },
    /// NUL-padded string of fixed width.
    FixedString { size: usize },
    /// Variable-length string.
    VarString,
    /// Variable-length sequence of `base` elements.
    VarLen { base: Box<Datatype> },
    Compound { size: usize, members: Vec<Member> },
    Array { dims: Vec<u64>, base: Box<Datatype> },
    Opaque { size: usize, tag: String },
    /// Reference to another object.
    Reference,
}

impl Datatype {
    /// Little-endian integer of `size` bytes.
    pub fn int(size: usize, signed: bool) -> Self {
        Self::Integer {
            size,
            signed,
            order: ByteOrder::Little,
        }
    }

    /// Little-endian float of `size` bytes (4 or 8).
    pub fn float(size: usize) -> Self {
        Self::Float {
            size,
            order: ByteOrder::Little,
        }
    }

    pub fn vlen(base: Datatype) -> Self {
        Self::VarLen {
            base: Box::new(base),
        }
    }

    pub fn array(dims: impl Into<Vec<u64>>, base: Datatype) -> Self {
        Self::Array {
            dims: dims.into(),
            base: Box::new(base),
        }
    }

    /// Bytes per element in a flat buffer. Variable-length classes report
    /// the size of their in-memory descriptor.
    pub fn size(&self) -> usize {
        match self {
            Self::Integer { size, .. }
            | Self::Float { size, .. }
            | Self::FixedString { size }
            | Self::Compound { size, .. }
            | Self::Opaque { size, .. } => *size,
            Self::VarString => VL_STRING_DESCRIPTOR_SIZE,
            Self::VarLen { .. } => VL_DESCRIPTOR_SIZE,
            Self::Array { dims, base } => dims.iter().product::<u64>() as usize * base.size(),
            Self::Reference => REFERENCE_SIZE,
        }
    }

    /// Returns `true` for types whose elements are stored one record each.
    pub fn is_variable_len(&self) -> bool {
        matches!(self, Self::VarString | Self::VarLen { .. })
    }

    /// Returns `true` if this type, or any type nested in it, is
    /// variable-length.
    pub fn contains_variable_len(&self) -> bool {
        match self {
            Self::VarString | Self::VarLen { .. } => true,
            Self::Compound { members, .. } => members.iter().any(|m| m.ty.contains_variable_len()),
            Self::Array { base, .. } => base.contains_variable_len(),
            _ => false,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Integer { .. } => "integer",
            Self::Float { .. } => "float",
            Self::FixedString { .. } => "string",
            Self::VarString => "variable-length string",
            Self::VarLen { .. } => "variable-length sequence",
            Self::Compound { .. } => "compound",
            Self::Array { .. } => "array",
            Self::Opaque { .. } => "opaque",
            Self::Reference => "reference",
        }
    }

    /// Check structural invariants: known integer/float widths, compound
    /// members inside the compound and not overlapping.
    pub fn validate(&self) -> IoResult<()> {
        match self {
            Self::Integer { size, .. } if !(1..=8).contains(size) => Err(IoError::Unsupported(
                format!("integer of {size} bytes"),
            )),
            Self::Float { size, .. } if *size != 4 && *size != 8 => {
                Err(IoError::Unsupported(format!("float of {size} bytes")))
            }
            Self::VarLen { base } | Self::Array { base, .. } => base.validate(),
            Self::Compound { size, members } => {
                let mut spans: Vec<(usize, usize)> = Vec::with_capacity(members.len());
                for member in members {
                    member.ty.validate()?;
                    if member.end() > *size {
                        return Err(IoError::Unsupported(format!(
                            "member {} ends at {} past compound size {size}",
                            member.name,
                            member.end()
                        )));
                    }
                    spans.push((member.offset, member.end()));
                }
                spans.sort_unstable();
                if spans.windows(2).any(|w| w[0].1 > w[1].0) {
                    return Err(IoError::Unsupported("overlapping compound members".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Serialize for storage.
    pub fn encode(&self) -> IoResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| IoError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> IoResult<Self> {
        bincode::deserialize(bytes).map_err(|e| IoError::Codec(e.to_string()))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { size, signed, .. } => {
                write!(f, "{}{}", if *signed { "i" } else { "u" }, size * 8)
            }
            Self::Float { size, .. } => write!(f, "f{}", size * 8),
            Self::FixedString { size } => write!(f, "str[{size}]"),
            Self::VarString => write!(f, "vstr"),
            Self::VarLen { base } => write!(f, "vlen<{base}>"),
            Self::Compound { members, .. } => {
                write!(f, "{{")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.ty)?;
                }
                write!(f, "}}")
            }
            Self::Array { dims, base } => write!(f, "{base}{dims:?}"),
            Self::Opaque { size, tag } => write!(f, "opaque[{size}]({tag})"),
            Self::Reference => write!(f, "ref"),
        }
    }
}
