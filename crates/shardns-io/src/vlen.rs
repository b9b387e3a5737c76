use shardns_store::{FieldIo, RECORD_SIZE_ANY};
use tracing::trace;

use crate::datatype::Datatype;
use crate::error::{IoError, IoResult};
use crate::transfer::RecordTarget;

/// Stored form of an empty string, told apart from a null one.
const EMPTY_STRING: &[u8] = &[0];

/// How variable-length elements map to stored bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VlKind {
    /// Strings: empty is stored as a single NUL, null as nothing. Strings
    /// holding a NUL are rejected on write, since a lone NUL is the empty
    /// string.
    String,
    /// Sequences of fixed-size base elements; empty and null are both
    /// stored as nothing and read back as empty.
    Sequence { base_size: usize },
}

impl VlKind {
    pub fn of(ty: &Datatype) -> IoResult<Self> {
        match ty {
            Datatype::VarString => Ok(Self::String),
            Datatype::VarLen { base } if !base.contains_variable_len() => Ok(Self::Sequence {
                base_size: base.size(),
            }),
            other => Err(IoError::Unsupported(format!(
                "{other} is not a variable-length element type"
            ))),
        }
    }
}

/// Field name of element `index`: the prefix followed by the index as a
/// little-endian u64.
pub fn element_key(prefix: &[u8], index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&index.to_le_bytes());
    key
}

/// Write variable-length elements, one field per element.
///
/// `target.field` is the key prefix; element `i` of `elements` goes to
/// linear index `indices[i]`. A `None` element removes any stored value.
pub fn write_vlen(
    target: &RecordTarget<'_>,
    kind: VlKind,
    indices: &[u64],
    elements: &[Option<&[u8]>],
) -> IoResult<()> {
    if indices.len() != elements.len() {
        return Err(IoError::SelectionMismatch {
            file: indices.len() as u64,
            mem: elements.len() as u64,
        });
    }
    if indices.is_empty() {
        return Ok(());
    }

    let mut fields = Vec::with_capacity(elements.len());
    let mut sources: Vec<&[u8]> = Vec::with_capacity(elements.len());
    for (&index, &element) in indices.iter().zip(elements) {
        let bytes: &[u8] = match (kind, element) {
            (_, None) => &[],
            (VlKind::String, Some(s)) if s.is_empty() => EMPTY_STRING,
            (VlKind::String, Some(s)) if s.contains(&0) => {
                return Err(IoError::InvalidElement(format!(
                    "string element {index} contains NUL"
                )));
            }
            (VlKind::String, Some(s)) => s,
            (VlKind::Sequence { base_size }, Some(seq)) => {
                if base_size == 0 || seq.len() % base_size != 0 {
                    return Err(IoError::InvalidElement(format!(
                        "sequence of {} bytes is not a whole number of {base_size}-byte elements",
                        seq.len()
                    )));
                }
                seq
            }
        };
        fields.push(FieldIo::single(
            element_key(target.field, index),
            bytes.len() as u64,
        ));
        sources.push(bytes);
    }
    target
        .store
        .update(target.handle, target.key, &fields, &sources)?;
    Ok(())
}

/// Read variable-length elements at `indices`.
///
/// Sizes are probed first; only non-empty elements get a buffer and are
/// fetched, in one compacted request.
pub fn read_vlen(
    target: &RecordTarget<'_>,
    kind: VlKind,
    indices: &[u64],
) -> IoResult<Vec<Option<Vec<u8>>>> {
    if indices.is_empty() {
        return Ok(Vec::new());
    }
    let mut probe: Vec<FieldIo> = indices
        .iter()
        .map(|&i| FieldIo::single(element_key(target.field, i), RECORD_SIZE_ANY))
        .collect();
    target
        .store
        .fetch(target.handle, target.key, &mut probe, None)?;

    let present: Vec<usize> = (0..probe.len())
        .filter(|&i| probe[i].record_size > 0)
        .collect();
    let mut buffers: Vec<Vec<u8>> = present
        .iter()
        .map(|&i| vec![0u8; probe[i].record_size as usize])
        .collect();
    if !present.is_empty() {
        let mut fields: Vec<FieldIo> = present.iter().map(|&i| probe[i].clone()).collect();
        let mut sinks: Vec<&mut [u8]> = buffers.iter_mut().map(Vec::as_mut_slice).collect();
        target
            .store
            .fetch(target.handle, target.key, &mut fields, Some(sinks.as_mut_slice()))?;
    }
    trace!(
        elements = indices.len(),
        present = present.len(),
        "variable-length elements read"
    );

    let mut out: Vec<Option<Vec<u8>>> = vec![None; indices.len()];
    for (i, bytes) in present.into_iter().zip(buffers) {
        out[i] = Some(bytes);
    }
    Ok(out
        .into_iter()
        .map(|element| match (kind, element) {
            (VlKind::String, Some(bytes)) if bytes == EMPTY_STRING => Some(Vec::new()),
            (VlKind::Sequence { .. }, None) => Some(Vec::new()),
            (_, element) => element,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardns_store::{InMemoryRecordStore, ObjectHandle, OpenMode, RecordStore};
    use shardns_types::ObjectId;

    fn setup() -> (InMemoryRecordStore, ObjectHandle) {
        let store = InMemoryRecordStore::new(1);
        let oh = store.open(ObjectId::new(9, 0), OpenMode::ReadWrite).unwrap();
        (store, oh)
    }

    fn target(store: &InMemoryRecordStore, oh: ObjectHandle) -> RecordTarget<'_> {
        RecordTarget {
            store,
            handle: oh,
            key: b"raw",
            field: b"V-",
        }
    }

    #[test]
    fn key_is_prefix_then_le_index() {
        assert_eq!(element_key(b"V-", 258), b"V-\x02\x01\0\0\0\0\0\0".to_vec());
    }

    #[test]
    fn empty_and_null_strings_are_distinct() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        write_vlen(&t, VlKind::String, &[0, 1, 2], &[Some(&b"abc"[..]), Some(&b""[..]), None]).unwrap();

        let mut sizes = [
            FieldIo::single(element_key(b"V-", 1), RECORD_SIZE_ANY),
            FieldIo::single(element_key(b"V-", 2), RECORD_SIZE_ANY),
        ];
        store.fetch(oh, b"raw", &mut sizes, None).unwrap();
        assert_eq!(sizes[0].record_size, 1);
        assert_eq!(sizes[1].record_size, 0);

        let read = read_vlen(&t, VlKind::String, &[0, 1, 2]).unwrap();
        assert_eq!(read, vec![Some(b"abc".to_vec()), Some(Vec::new()), None]);
    }

    #[test]
    fn strings_with_nul_are_rejected_before_any_write() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        let err = write_vlen(&t, VlKind::String, &[0, 1], &[Some(&b"ok"[..]), Some(&b"\0"[..])])
            .unwrap_err();
        assert!(matches!(err, IoError::InvalidElement(_)));
        assert_eq!(store.stats().updates, 0);
        assert_eq!(read_vlen(&t, VlKind::String, &[0]).unwrap(), vec![None]);
    }

    #[test]
    fn null_overwrites_previous_value() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        write_vlen(&t, VlKind::String, &[4], &[Some(&b"old"[..])]).unwrap();
        write_vlen(&t, VlKind::String, &[4], &[None]).unwrap();
        assert_eq!(read_vlen(&t, VlKind::String, &[4]).unwrap(), vec![None]);
    }

    #[test]
    fn only_present_elements_are_fetched() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        write_vlen(&t, VlKind::String, &[0, 3], &[Some(&b"x"[..]), Some(&b"yy"[..])]).unwrap();
        store.reset_stats();
        let read = read_vlen(&t, VlKind::String, &[0, 1, 2, 3]).unwrap();
        assert_eq!(read[3].as_deref(), Some(&b"yy"[..]));
        let stats = store.stats();
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.fetches_of(&element_key(b"V-", 0)), 2);
        assert_eq!(stats.fetches_of(&element_key(b"V-", 1)), 1);
    }

    #[test]
    fn all_null_skips_second_fetch() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        let read = read_vlen(&t, VlKind::String, &[0, 1]).unwrap();
        assert_eq!(read, vec![None, None]);
        assert_eq!(store.stats().fetches, 1);
    }

    #[test]
    fn sequences_check_base_size() {
        let (store, oh) = setup();
        let t = target(&store, oh);
        let kind = VlKind::of(&Datatype::vlen(Datatype::int(2, false))).unwrap();
        write_vlen(&t, kind, &[0, 1], &[Some(&[1u8, 0, 2, 0][..]), None]).unwrap();
        let read = read_vlen(&t, kind, &[0, 1]).unwrap();
        assert_eq!(read, vec![Some(vec![1, 0, 2, 0]), Some(Vec::new())]);
        let err = write_vlen(&t, kind, &[2], &[Some(&[1u8, 2, 3][..])]).unwrap_err();
        assert!(matches!(err, IoError::InvalidElement(_)));
    }

    #[test]
    fn fixed_types_are_not_vl_kinds() {
        assert!(VlKind::of(&Datatype::int(4, true)).is_err());
        assert_eq!(VlKind::of(&Datatype::VarString).unwrap(), VlKind::String);
    }
}
