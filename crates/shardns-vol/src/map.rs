use std::borrow::Cow;
use std::sync::Arc;

use shardns_io::Datatype;
use shardns_store::{fetch_single, FieldIo, KeyCursor, RECORD_SIZE_ANY};
use shardns_types::ObjectId;
use tracing::trace;

use crate::error::{StoreContext, VolError, VolResult};
use crate::keys::{ATTRIBUTES, INTERNAL_METADATA, MAP_VALUE};
use crate::node::Node;
use crate::object::segment;

/// Record keys listed per batch when counting entries.
const MAP_COUNT_BATCH: usize = 128;

/// Check that `ty` can key or fill a map.
///
/// Variable-length strings, sequences of fixed-size elements and fixed-size
/// types qualify; anything holding nested variable-length data does not.
pub(crate) fn check_map_type(ty: &Datatype) -> VolResult<()> {
    match ty {
        Datatype::VarString => Ok(()),
        Datatype::VarLen { base } if !base.contains_variable_len() => Ok(base.validate()?),
        other if !other.contains_variable_len() => Ok(other.validate()?),
        other => Err(VolError::Unsupported(format!(
            "{other} as a map key or value"
        ))),
    }
}

/// Bytes stored for a key or value of type `ty`: strings gain a trailing
/// NUL, sequences must be whole elements, fixed types exactly one element.
fn stored_form<'a>(ty: &Datatype, bytes: &'a [u8], what: &str) -> VolResult<Cow<'a, [u8]>> {
    match ty {
        Datatype::VarString => {
            if bytes.contains(&0) {
                return Err(VolError::Argument(format!("{what} string contains NUL")));
            }
            let mut stored = Vec::with_capacity(bytes.len() + 1);
            stored.extend_from_slice(bytes);
            stored.push(0);
            Ok(Cow::Owned(stored))
        }
        Datatype::VarLen { base } => {
            let size = base.size();
            if bytes.is_empty() || size == 0 || bytes.len() % size != 0 {
                return Err(VolError::Argument(format!(
                    "{what} of {} bytes is not a non-empty sequence of {size}-byte elements",
                    bytes.len()
                )));
            }
            Ok(Cow::Borrowed(bytes))
        }
        fixed => {
            if bytes.len() != fixed.size() {
                return Err(VolError::Argument(format!(
                    "{what} of {} bytes, {fixed} takes {}",
                    bytes.len(),
                    fixed.size()
                )));
            }
            Ok(Cow::Borrowed(bytes))
        }
    }
}

#[derive(Debug)]
struct MapMeta {
    key_type: Datatype,
    value_type: Datatype,
}

/// An open map: typed key/value entries, one record per key.
#[derive(Debug)]
pub struct Map {
    node: Node,
    meta: Arc<MapMeta>,
}

impl Map {
    pub(crate) fn from_segments(node: Node, segments: Vec<Vec<u8>>) -> VolResult<Self> {
        let meta = MapMeta {
            key_type: Datatype::decode(segment(&segments, 0)?)?,
            value_type: Datatype::decode(segment(&segments, 1)?)?,
        };
        Ok(Self {
            node,
            meta: Arc::new(meta),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.node.id()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn key_type(&self) -> &Datatype {
        &self.meta.key_type
    }

    pub fn value_type(&self) -> &Datatype {
        &self.meta.value_type
    }

    /// Key and value types.
    pub fn types(&self) -> (&Datatype, &Datatype) {
        (&self.meta.key_type, &self.meta.value_type)
    }

    pub fn acquire(&self) -> Self {
        Self {
            node: self.node.acquire(),
            meta: Arc::clone(&self.meta),
        }
    }

    pub fn close(self) -> VolResult<()> {
        self.node.close()
    }

    fn record_key<'a>(&self, key: &'a [u8]) -> VolResult<Cow<'a, [u8]>> {
        let record = stored_form(&self.meta.key_type, key, "key")?;
        if record.as_ref() == INTERNAL_METADATA || record.as_ref() == ATTRIBUTES {
            return Err(VolError::Argument(format!(
                "key \"{}\" names a reserved record",
                String::from_utf8_lossy(&record)
            )));
        }
        Ok(record)
    }

    /// Insert or replace the entry for `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> VolResult<()> {
        self.node.container().require_writable("set map entry")?;
        let record = self.record_key(key)?;
        let value = stored_form(&self.meta.value_type, value, "value")?;
        self.node
            .store()
            .update(
                self.node.handle(),
                &record,
                &[FieldIo::single(MAP_VALUE, value.len() as u64)],
                &[value.as_ref()],
            )
            .context("can't write map entry")?;
        trace!(oid = %self.id(), bytes = value.len(), "map entry set");
        Ok(())
    }

    /// The value stored for `key`, if any. Strings come back without their
    /// trailing NUL.
    pub fn get(&self, key: &[u8]) -> VolResult<Option<Vec<u8>>> {
        let record = self.record_key(key)?;
        let store = self.node.store();
        let value_type = &self.meta.value_type;

        if !value_type.is_variable_len() {
            let size = value_type.size();
            let mut value = vec![0u8; size];
            let mut fields = [FieldIo::single(MAP_VALUE, size as u64)];
            store
                .fetch(self.node.handle(), &record, &mut fields, Some(&mut [&mut value[..]]))
                .context("can't read map entry")?;
            return match fields[0].record_size {
                0 => Ok(None),
                n if n == size as u64 => Ok(Some(value)),
                n => Err(VolError::Argument(format!(
                    "stored value holds {n} bytes, {value_type} takes {size}"
                ))),
            };
        }

        let mut scratch = vec![0u8; self.node.container().config().link_buffer_size];
        let value = fetch_single(store, self.node.handle(), &record, MAP_VALUE, &mut scratch)
            .context("can't read map entry")?;
        Ok(value.map(|mut v| {
            if *value_type == Datatype::VarString && v.last() == Some(&0) {
                v.pop();
            }
            v
        }))
    }

    /// Returns `true` if an entry for `key` exists. Probes the size only.
    pub fn exists(&self, key: &[u8]) -> VolResult<bool> {
        let record = self.record_key(key)?;
        let mut fields = [FieldIo::single(MAP_VALUE, RECORD_SIZE_ANY)];
        self.node
            .store()
            .fetch(self.node.handle(), &record, &mut fields, None)
            .context("can't probe map entry")?;
        Ok(fields[0].record_size > 0)
    }

    /// Number of entries.
    pub fn count(&self) -> VolResult<u64> {
        let mut cursor = KeyCursor::new();
        let mut count = 0u64;
        while !cursor.is_eof() {
            let keys = self
                .node
                .store()
                .list_keys(self.node.handle(), &mut cursor, MAP_COUNT_BATCH)
                .context("can't list map entries")?;
            count += keys
                .iter()
                .filter(|k| k.as_slice() != INTERNAL_METADATA && k.as_slice() != ATTRIBUTES)
                .count() as u64;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::testing::{run_group, single};
    use shardns_store::{InMemoryPool, RecordStore};

    #[test]
    fn fixed_keys_and_values() {
        let (_pool, container) = single("map-fixed");
        let root = container.root().unwrap();
        let m = root
            .create_map("m", &Datatype::int(4, false), &Datatype::float(8))
            .unwrap();
        m.set(&7u32.to_le_bytes(), &1.5f64.to_le_bytes()).unwrap();
        m.set(&9u32.to_le_bytes(), &2.5f64.to_le_bytes()).unwrap();
        m.set(&7u32.to_le_bytes(), &3.5f64.to_le_bytes()).unwrap();

        assert_eq!(
            m.get(&7u32.to_le_bytes()).unwrap(),
            Some(3.5f64.to_le_bytes().to_vec())
        );
        assert_eq!(m.get(&8u32.to_le_bytes()).unwrap(), None);
        assert!(m.exists(&9u32.to_le_bytes()).unwrap());
        assert!(!m.exists(&1u32.to_le_bytes()).unwrap());
        assert_eq!(m.count().unwrap(), 2);
    }

    #[test]
    fn string_keys_gain_a_nul() {
        let (pool, container) = single("map-strings");
        let root = container.root().unwrap();
        let m = root
            .create_map("m", &Datatype::VarString, &Datatype::VarString)
            .unwrap();
        m.set(b"", b"empty key").unwrap();
        m.set(b"k", &[b'v'; 600]).unwrap();

        assert_eq!(m.get(b"").unwrap(), Some(b"empty key".to_vec()));
        assert_eq!(m.get(b"k").unwrap(), Some(vec![b'v'; 600]));
        assert_eq!(m.get(b"other").unwrap(), None);
        assert_eq!(m.count().unwrap(), 2);

        let store = pool.store(container.uuid()).unwrap();
        let mut fields = [FieldIo::single(MAP_VALUE, RECORD_SIZE_ANY)];
        store.fetch(m.node().handle(), b"k\0", &mut fields, None).unwrap();
        assert_eq!(fields[0].record_size, 601);
        assert!(matches!(m.set(b"a\0b", b"x"), Err(VolError::Argument(_))));
    }

    #[test]
    fn keys_naming_reserved_records_are_rejected() {
        let (_pool, container) = single("map-reserved");
        let root = container.root().unwrap();
        let short = root
            .create_map("short", &Datatype::FixedString { size: 10 }, &Datatype::int(1, false))
            .unwrap();
        assert!(matches!(short.set(ATTRIBUTES, &[1]), Err(VolError::Argument(_))));
        assert!(matches!(short.get(ATTRIBUTES), Err(VolError::Argument(_))));
        short.set(b"/Attributf", &[2]).unwrap();
        assert_eq!(short.count().unwrap(), 1);

        let long = root
            .create_map("long", &Datatype::FixedString { size: 18 }, &Datatype::int(1, false))
            .unwrap();
        assert!(matches!(
            long.set(INTERNAL_METADATA, &[1]),
            Err(VolError::Argument(_))
        ));
        assert_eq!(long.count().unwrap(), 0);
        assert_eq!(long.key_type(), &Datatype::FixedString { size: 18 });
    }

    #[test]
    fn sequences_are_whole_elements() {
        let (_pool, container) = single("map-seq");
        let root = container.root().unwrap();
        let m = root
            .create_map("m", &Datatype::int(1, false), &Datatype::vlen(Datatype::int(2, false)))
            .unwrap();
        m.set(&[1], &[1, 0, 2, 0]).unwrap();
        assert_eq!(m.get(&[1]).unwrap(), Some(vec![1, 0, 2, 0]));
        assert!(matches!(m.set(&[2], &[1, 0, 2]), Err(VolError::Argument(_))));
        assert!(matches!(m.set(&[1, 2], &[1, 0]), Err(VolError::Argument(_))));
    }

    #[test]
    fn nested_variable_length_is_unsupported() {
        let (_pool, container) = single("map-nested");
        let root = container.root().unwrap();
        let nested = Datatype::vlen(Datatype::VarString);
        assert!(matches!(
            root.create_map("m", &Datatype::int(4, true), &nested),
            Err(VolError::Unsupported(_))
        ));
    }

    #[test]
    fn types_reach_every_rank() {
        let pool = InMemoryPool::default();
        let seen = run_group(&pool, 3, "map-types", ConnectorConfig::default(), |c| {
            let root = c.root().unwrap();
            root.create_map("m", &Datatype::VarString, &Datatype::int(8, true))
                .unwrap();
            let m = root.open_map("m").unwrap();
            let (k, v) = m.types();
            (k.clone(), v.clone())
        });
        for (k, v) in seen {
            assert_eq!(k, Datatype::VarString);
            assert_eq!(v, Datatype::int(8, true));
        }
    }
}
