use std::fmt;

use serde::{Deserialize, Serialize};

/// Record size value asking the store to report the stored size.
pub const RECORD_SIZE_ANY: u64 = 0;

/// Access mode for an opened object or container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Opaque handle to an opened store object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({})", self.0)
    }
}

/// A contiguous run of records, in record units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One past the last record of the run.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Shape of a field within a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldShape {
    /// One value, read and written whole.
    Single,
    /// An array of fixed-size records addressed by extents.
    Array(Vec<Extent>),
}

/// Descriptor for one field of a record in a fetch or update.
///
/// On fetch, `record_size` may be [`RECORD_SIZE_ANY`]; the store overwrites it
/// with the stored size (0 when the field is absent).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIo {
    pub name: Vec<u8>,
    pub shape: FieldShape,
    pub record_size: u64,
}

impl FieldIo {
    /// A single-value field.
    pub fn single(name: impl Into<Vec<u8>>, record_size: u64) -> Self {
        Self {
            name: name.into(),
            shape: FieldShape::Single,
            record_size,
        }
    }

    /// An array field covering `extents`.
    pub fn array(name: impl Into<Vec<u8>>, record_size: u64, extents: Vec<Extent>) -> Self {
        Self {
            name: name.into(),
            shape: FieldShape::Array(extents),
            record_size,
        }
    }

    /// Bytes moved by this field at its current `record_size`.
    pub fn transfer_len(&self) -> u64 {
        match &self.shape {
            FieldShape::Single => self.record_size,
            FieldShape::Array(extents) => {
                extents.iter().map(|e| e.len).sum::<u64>() * self.record_size
            }
        }
    }
}

/// Position in a record-key enumeration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyCursor {
    last: Option<Vec<u8>>,
    eof: bool,
}

impl KeyCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the enumeration has returned every key.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// The last key returned, if any.
    pub fn last(&self) -> Option<&[u8]> {
        self.last.as_deref()
    }

    /// Advance past `key`.
    pub fn advance(&mut self, key: Vec<u8>) {
        self.last = Some(key);
    }

    pub fn finish(&mut self) {
        self.eof = true;
    }
}
