use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use shardns_types::{ContainerUuid, IdGenerator, ObjectId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreOp, StoreResult};
use crate::record::{FieldIo, FieldShape, KeyCursor, ObjectHandle, OpenMode, RECORD_SIZE_ANY};
use crate::traits::{RecordPool, RecordStore};

/// Stored contents of one field.
#[derive(Clone, Debug)]
enum FieldValue {
    Single(Vec<u8>),
    Array {
        record_size: u64,
        records: BTreeMap<u64, Vec<u8>>,
    },
}

type Record = BTreeMap<Vec<u8>, FieldValue>;
type Object = BTreeMap<Vec<u8>, Record>;

/// Operation counters, for tests that assert on I/O patterns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub opens: usize,
    pub closes: usize,
    pub fetches: usize,
    pub updates: usize,
    pub lists: usize,
    /// Fetch calls that included each field name.
    pub field_fetches: HashMap<Vec<u8>, usize>,
}

impl StoreStats {
    /// Number of fetch calls that touched `field`.
    pub fn fetches_of(&self, field: &[u8]) -> usize {
        self.field_fetches.get(field).copied().unwrap_or(0)
    }
}

/// A scheduled failure: the `skip + 1`-th call of `op` fails with `code`.
#[derive(Clone, Debug)]
struct Fault {
    op: StoreOp,
    skip: usize,
    code: i32,
}

/// In-memory record store.
///
/// Intended for tests and embedding. Objects, records and fields live in
/// nested `BTreeMap`s behind a `RwLock`; handles are tracked so that use of a
/// closed handle fails the way a real backend would. Failures can be
/// scheduled with [`InMemoryRecordStore::inject_fault`].
pub struct InMemoryRecordStore {
    object_class: u32,
    objects: RwLock<HashMap<ObjectId, Object>>,
    handles: RwLock<HashMap<u64, (ObjectId, OpenMode)>>,
    next_handle: AtomicU64,
    faults: Mutex<Vec<Fault>>,
    stats: Mutex<StoreStats>,
}

impl InMemoryRecordStore {
    /// Create an empty store whose generated ids carry `object_class` in the
    /// high word.
    pub fn new(object_class: u32) -> Self {
        Self {
            object_class,
            objects: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            faults: Mutex::new(Vec::new()),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// Fail the `(skip + 1)`-th future call of `op` with `code`.
    pub fn inject_fault(&self, op: StoreOp, skip: usize, code: i32) {
        self.faults
            .lock()
            .expect("lock poisoned")
            .push(Fault { op, skip, code });
    }

    /// Drop any faults that have not fired. Returns how many were pending.
    pub fn clear_faults(&self) -> usize {
        let mut faults = self.faults.lock().expect("lock poisoned");
        let pending = faults.len();
        faults.clear();
        pending
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().expect("lock poisoned").clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().expect("lock poisoned") = StoreStats::default();
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.read().expect("lock poisoned").len()
    }

    /// Number of objects holding at least one record.
    pub fn object_count(&self) -> usize {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|o| !o.is_empty())
            .count()
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock().expect("lock poisoned");
        let mut fired = None;
        for (i, fault) in faults.iter_mut().enumerate() {
            if fault.op != op {
                continue;
            }
            if fault.skip == 0 {
                fired = Some(i);
                break;
            }
            fault.skip -= 1;
        }
        if let Some(i) = fired {
            let fault = faults.remove(i);
            warn!(op = %op, code = fault.code, "injected store fault");
            return Err(StoreError::Backend {
                op,
                code: fault.code,
            });
        }
        Ok(())
    }

    fn resolve(&self, op: StoreOp, handle: ObjectHandle) -> StoreResult<(ObjectId, OpenMode)> {
        self.handles
            .read()
            .expect("lock poisoned")
            .get(&handle.raw())
            .copied()
            .ok_or(StoreError::BadHandle {
                op,
                handle: handle.raw(),
            })
    }

    fn bump(&self, f: impl FnOnce(&mut StoreStats)) {
        f(&mut self.stats.lock().expect("lock poisoned"));
    }
}

impl IdGenerator for InMemoryRecordStore {
    fn generate(&self, lo: u64) -> ObjectId {
        ObjectId::new(lo, u64::from(self.object_class) << 32)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn open(&self, id: ObjectId, mode: OpenMode) -> StoreResult<ObjectHandle> {
        self.check_fault(StoreOp::Open)?;
        self.bump(|s| s.opens += 1);
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles
            .write()
            .expect("lock poisoned")
            .insert(raw, (id, mode));
        debug!(oid = %id, handle = raw, ?mode, "object opened");
        Ok(ObjectHandle::from_raw(raw))
    }

    fn close(&self, handle: ObjectHandle) -> StoreResult<()> {
        self.check_fault(StoreOp::Close)?;
        self.bump(|s| s.closes += 1);
        self.handles
            .write()
            .expect("lock poisoned")
            .remove(&handle.raw())
            .map(|_| ())
            .ok_or(StoreError::BadHandle {
                op: StoreOp::Close,
                handle: handle.raw(),
            })
    }

    fn fetch(
        &self,
        handle: ObjectHandle,
        key: &[u8],
        fields: &mut [FieldIo],
        mut sinks: Option<&mut [&mut [u8]]>,
    ) -> StoreResult<()> {
        const OP: StoreOp = StoreOp::Fetch;
        self.check_fault(OP)?;
        let (id, _) = self.resolve(OP, handle)?;
        self.bump(|s| {
            s.fetches += 1;
            for field in fields.iter() {
                *s.field_fetches.entry(field.name.clone()).or_insert(0) += 1;
            }
        });
        if let Some(sinks) = sinks.as_deref() {
            if sinks.len() != fields.len() {
                return Err(StoreError::invalid(
                    OP,
                    format!("{} sinks for {} fields", sinks.len(), fields.len()),
                ));
            }
        }

        let objects = self.objects.read().expect("lock poisoned");
        let record = objects.get(&id).and_then(|o| o.get(key));

        for (i, field) in fields.iter_mut().enumerate() {
            let stored = record.and_then(|r| r.get(&field.name));
            let sink = sinks.as_deref_mut().map(|s| &mut *s[i]);
            match (&field.shape, stored) {
                (_, None) => field.record_size = 0,
                (FieldShape::Single, Some(FieldValue::Single(value))) => {
                    field.record_size = value.len() as u64;
                    if let Some(sink) = sink {
                        if sink.len() >= value.len() {
                            sink[..value.len()].copy_from_slice(value);
                        }
                    }
                }
                (
                    FieldShape::Array(extents),
                    Some(FieldValue::Array {
                        record_size,
                        records,
                    }),
                ) => {
                    let Some(sink) = sink else {
                        field.record_size = *record_size;
                        continue;
                    };
                    if field.record_size == RECORD_SIZE_ANY {
                        field.record_size = *record_size;
                        continue;
                    }
                    if field.record_size != *record_size {
                        return Err(StoreError::invalid(
                            OP,
                            format!(
                                "record size {} does not match stored size {}",
                                field.record_size, record_size
                            ),
                        ));
                    }
                    let rs = *record_size as usize;
                    let needed = field.transfer_len() as usize;
                    if sink.len() < needed {
                        return Err(StoreError::invalid(
                            OP,
                            format!("sink holds {} bytes, extents need {needed}", sink.len()),
                        ));
                    }
                    let mut pos = 0usize;
                    for extent in extents {
                        for idx in extent.offset..extent.end() {
                            if let Some(bytes) = records.get(&idx) {
                                sink[pos..pos + rs].copy_from_slice(bytes);
                            }
                            pos += rs;
                        }
                    }
                }
                _ => {
                    return Err(StoreError::invalid(
                        OP,
                        "field shape does not match stored value",
                    ))
                }
            }
        }
        Ok(())
    }

    fn update(
        &self,
        handle: ObjectHandle,
        key: &[u8],
        fields: &[FieldIo],
        sources: &[&[u8]],
    ) -> StoreResult<()> {
        const OP: StoreOp = StoreOp::Update;
        self.check_fault(OP)?;
        let (id, mode) = self.resolve(OP, handle)?;
        if !mode.is_writable() {
            return Err(StoreError::ReadOnly { op: OP });
        }
        if sources.len() != fields.len() {
            return Err(StoreError::invalid(
                OP,
                format!("{} sources for {} fields", sources.len(), fields.len()),
            ));
        }
        for (field, source) in fields.iter().zip(sources) {
            if field.transfer_len() != source.len() as u64 {
                return Err(StoreError::invalid(
                    OP,
                    format!(
                        "field needs {} bytes, source has {}",
                        field.transfer_len(),
                        source.len()
                    ),
                ));
            }
        }
        self.bump(|s| s.updates += 1);

        let mut objects = self.objects.write().expect("lock poisoned");
        let record = objects
            .entry(id)
            .or_default()
            .entry(key.to_vec())
            .or_default();

        for (field, source) in fields.iter().zip(sources) {
            match &field.shape {
                FieldShape::Single if field.record_size == 0 => {
                    record.remove(&field.name);
                }
                FieldShape::Single => {
                    record.insert(field.name.clone(), FieldValue::Single(source.to_vec()));
                }
                FieldShape::Array(extents) => {
                    if field.record_size == 0 {
                        return Err(StoreError::invalid(OP, "array update with record size 0"));
                    }
                    let value = record
                        .entry(field.name.clone())
                        .or_insert_with(|| FieldValue::Array {
                            record_size: field.record_size,
                            records: BTreeMap::new(),
                        });
                    let FieldValue::Array {
                        record_size,
                        records,
                    } = value
                    else {
                        return Err(StoreError::invalid(OP, "array update over single value"));
                    };
                    if *record_size != field.record_size {
                        return Err(StoreError::invalid(
                            OP,
                            format!(
                                "record size {} does not match stored size {}",
                                field.record_size, record_size
                            ),
                        ));
                    }
                    let rs = field.record_size as usize;
                    let mut chunks = source.chunks_exact(rs);
                    for extent in extents {
                        for idx in extent.offset..extent.end() {
                            if let Some(bytes) = chunks.next() {
                                records.insert(idx, bytes.to_vec());
                            }
                        }
                    }
                }
            }
        }
        if record.is_empty() {
            if let Some(object) = objects.get_mut(&id) {
                object.remove(key);
            }
        }
        Ok(())
    }

    fn list_keys(
        &self,
        handle: ObjectHandle,
        cursor: &mut KeyCursor,
        max: usize,
    ) -> StoreResult<Vec<Vec<u8>>> {
        const OP: StoreOp = StoreOp::ListKeys;
        self.check_fault(OP)?;
        let (id, _) = self.resolve(OP, handle)?;
        self.bump(|s| s.lists += 1);
        if max == 0 {
            return Err(StoreError::invalid(OP, "key batch size must be positive"));
        }
        if cursor.is_eof() {
            return Ok(Vec::new());
        }

        let objects = self.objects.read().expect("lock poisoned");
        let Some(object) = objects.get(&id) else {
            cursor.finish();
            return Ok(Vec::new());
        };
        let mut keys = Vec::with_capacity(max);
        let after = cursor.last().map(<[u8]>::to_vec);
        let mut iter = object
            .keys()
            .filter(|k| after.as_ref().map_or(true, |a| k.as_slice() > a.as_slice()));
        for key in iter.by_ref().take(max) {
            keys.push(key.clone());
        }
        if iter.next().is_none() {
            cursor.finish();
        }
        if let Some(last) = keys.last() {
            cursor.advance(last.clone());
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("object_class", &self.object_class)
            .field("object_count", &self.object_count())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

/// Configuration for [`InMemoryPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPoolConfig {
    /// Object class written into the high word of generated ids.
    pub object_class: u32,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self { object_class: 0x10 }
    }
}

/// Pool of in-memory containers shared by every process of a test group.
#[derive(Debug, Default)]
pub struct InMemoryPool {
    config: MemoryPoolConfig,
    containers: RwLock<HashMap<ContainerUuid, Arc<InMemoryRecordStore>>>,
}

impl InMemoryPool {
    pub fn new(config: MemoryPoolConfig) -> Self {
        Self {
            config,
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Direct access to a container's store, for fault injection and stats.
    pub fn store(&self, uuid: &ContainerUuid) -> Option<Arc<InMemoryRecordStore>> {
        self.containers
            .read()
            .expect("lock poisoned")
            .get(uuid)
            .cloned()
    }
}

impl RecordPool for InMemoryPool {
    fn connect(
        &self,
        uuid: &ContainerUuid,
        mode: OpenMode,
        create: bool,
    ) -> StoreResult<Arc<dyn RecordStore>> {
        let mut containers = self.containers.write().expect("lock poisoned");
        let store = match (containers.get(uuid), create) {
            (Some(_), true) => return Err(StoreError::ContainerExists { uuid: *uuid }),
            (Some(store), false) => Arc::clone(store),
            (None, true) => {
                let store = Arc::new(InMemoryRecordStore::new(self.config.object_class));
                containers.insert(*uuid, Arc::clone(&store));
                store
            }
            (None, false) => return Err(StoreError::NoContainer { uuid: *uuid }),
        };
        debug!(%uuid, ?mode, create, "container connected");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::record::Extent;
    use shardns_types::NodeKind;

    fn store_with_handle() -> (InMemoryRecordStore, ObjectHandle) {
        let store = InMemoryRecordStore::new(1);
        let id = ObjectId::encode(NodeKind::Group, 1, &store);
        let oh = store.open(id, OpenMode::ReadWrite).unwrap();
        (store, oh)
    }

    // -----------------------------------------------------------------------
    // Single-value fields
    // -----------------------------------------------------------------------

    #[test]
    fn single_value_roundtrip() {
        let (store, oh) = store_with_handle();
        store
            .update(oh, b"md", &[FieldIo::single("T", 5)], &[b"hello"])
            .unwrap();

        let mut fields = [FieldIo::single("T", RECORD_SIZE_ANY)];
        let mut buf = [0u8; 16];
        store
            .fetch(oh, b"md", &mut fields, Some(&mut [&mut buf[..]]))
            .unwrap();
        assert_eq!(fields[0].record_size, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn absent_field_reports_zero() {
        let (store, oh) = store_with_handle();
        let mut fields = [FieldIo::single("missing", RECORD_SIZE_ANY)];
        store.fetch(oh, b"md", &mut fields, None).unwrap();
        assert_eq!(fields[0].record_size, 0);
    }

    #[test]
    fn short_sink_reports_size_without_copy() {
        let (store, oh) = store_with_handle();
        store
            .update(oh, b"md", &[FieldIo::single("T", 5)], &[b"hello"])
            .unwrap();
        let mut fields = [FieldIo::single("T", RECORD_SIZE_ANY)];
        let mut buf = [0u8; 2];
        store
            .fetch(oh, b"md", &mut fields, Some(&mut [&mut buf[..]]))
            .unwrap();
        assert_eq!(fields[0].record_size, 5);
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn zero_size_update_removes_value() {
        let (store, oh) = store_with_handle();
        store
            .update(oh, b"md", &[FieldIo::single("T", 1)], &[b"x"])
            .unwrap();
        store
            .update(oh, b"md", &[FieldIo::single("T", 0)], &[b""])
            .unwrap();
        let mut fields = [FieldIo::single("T", RECORD_SIZE_ANY)];
        store.fetch(oh, b"md", &mut fields, None).unwrap();
        assert_eq!(fields[0].record_size, 0);
    }

    // -----------------------------------------------------------------------
    // Array fields
    // -----------------------------------------------------------------------

    #[test]
    fn array_extents_roundtrip() {
        let (store, oh) = store_with_handle();
        let write = FieldIo::array("D", 2, vec![Extent::new(4, 2), Extent::new(10, 1)]);
        store.update(oh, b"raw", &[write], &[b"aabbcc"]).unwrap();

        let mut fields = [FieldIo::array("D", 2, vec![Extent::new(3, 3)])];
        let mut buf = [b'-'; 6];
        store
            .fetch(oh, b"raw", &mut fields, Some(&mut [&mut buf[..]]))
            .unwrap();
        // Record 3 is a hole and keeps the sink's previous contents.
        assert_eq!(&buf, b"--aabb");
    }

    #[test]
    fn array_size_probe_reports_record_size() {
        let (store, oh) = store_with_handle();
        let write = FieldIo::array("D", 8, vec![Extent::new(0, 1)]);
        store.update(oh, b"raw", &[write], &[&[0u8; 8]]).unwrap();
        let mut fields = [FieldIo::array("D", RECORD_SIZE_ANY, vec![Extent::new(0, 1)])];
        store.fetch(oh, b"raw", &mut fields, None).unwrap();
        assert_eq!(fields[0].record_size, 8);
    }

    #[test]
    fn array_record_size_mismatch_rejected() {
        let (store, oh) = store_with_handle();
        let write = FieldIo::array("D", 4, vec![Extent::new(0, 1)]);
        store.update(oh, b"raw", &[write], &[&[0u8; 4]]).unwrap();
        let bad = FieldIo::array("D", 2, vec![Extent::new(0, 2)]);
        let err = store.update(oh, b"raw", &[bad], &[&[0u8; 4]]).unwrap_err();
        assert_eq!(err.code(), codes::INVAL);
    }

    // -----------------------------------------------------------------------
    // Handles, modes and faults
    // -----------------------------------------------------------------------

    #[test]
    fn read_only_handle_rejects_update() {
        let store = InMemoryRecordStore::new(1);
        let oh = store.open(ObjectId::new(1, 0), OpenMode::ReadOnly).unwrap();
        let err = store
            .update(oh, b"k", &[FieldIo::single("f", 1)], &[b"x"])
            .unwrap_err();
        assert_eq!(err.code(), codes::NO_PERM);
    }

    #[test]
    fn closed_handle_is_invalid() {
        let (store, oh) = store_with_handle();
        store.close(oh).unwrap();
        let err = store.close(oh).unwrap_err();
        assert_eq!(err.code(), codes::NO_HDL);
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn injected_fault_fires_once_after_skip() {
        let (store, oh) = store_with_handle();
        store.inject_fault(StoreOp::Fetch, 1, codes::IO);
        let mut fields = [FieldIo::single("f", RECORD_SIZE_ANY)];
        store.fetch(oh, b"k", &mut fields, None).unwrap();
        let err = store.fetch(oh, b"k", &mut fields, None).unwrap_err();
        assert_eq!(err.code(), codes::IO);
        store.fetch(oh, b"k", &mut fields, None).unwrap();
        assert_eq!(store.clear_faults(), 0);
    }

    #[test]
    fn stats_count_field_fetches() {
        let (store, oh) = store_with_handle();
        let mut fields = [
            FieldIo::single("a", RECORD_SIZE_ANY),
            FieldIo::single("b", RECORD_SIZE_ANY),
        ];
        store.fetch(oh, b"k", &mut fields, None).unwrap();
        let stats = store.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.fetches_of(b"a"), 1);
        assert_eq!(stats.fetches_of(b"c"), 0);
    }

    #[test]
    fn generated_ids_carry_object_class() {
        let store = InMemoryRecordStore::new(0x22);
        let id = store.generate(7);
        assert_eq!(id.lo, 7);
        assert_eq!(id.hi, 0x22 << 32);
    }

    // -----------------------------------------------------------------------
    // Key listing
    // -----------------------------------------------------------------------

    #[test]
    fn list_keys_in_batches() {
        let (store, oh) = store_with_handle();
        for key in ["a", "b", "c", "d", "e"] {
            store
                .update(oh, key.as_bytes(), &[FieldIo::single("v", 1)], &[b"x"])
                .unwrap();
        }
        let mut cursor = KeyCursor::new();
        let mut all = Vec::new();
        let mut batches = 0;
        while !cursor.is_eof() {
            all.extend(store.list_keys(oh, &mut cursor, 2).unwrap());
            batches += 1;
        }
        assert_eq!(batches, 3);
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn removed_records_are_not_listed() {
        let (store, oh) = store_with_handle();
        store
            .update(oh, b"gone", &[FieldIo::single("v", 1)], &[b"x"])
            .unwrap();
        store
            .update(oh, b"gone", &[FieldIo::single("v", 0)], &[b""])
            .unwrap();
        let mut cursor = KeyCursor::new();
        assert!(store.list_keys(oh, &mut cursor, 8).unwrap().is_empty());
        assert!(cursor.is_eof());
    }

    // -----------------------------------------------------------------------
    // Pool
    // -----------------------------------------------------------------------

    #[test]
    fn pool_create_then_connect() {
        let pool = InMemoryPool::default();
        let uuid = ContainerUuid::from_name("c");
        assert!(pool.connect(&uuid, OpenMode::ReadWrite, true).is_ok());
        assert!(pool.connect(&uuid, OpenMode::ReadOnly, false).is_ok());
        let err = pool.connect(&uuid, OpenMode::ReadWrite, true).err();
        assert_eq!(err.map(|e| e.code()), Some(codes::EXIST));
        assert!(pool.store(&uuid).is_some());
    }

    #[test]
    fn pool_connect_missing_container() {
        let pool = InMemoryPool::default();
        let err = pool
            .connect(&ContainerUuid::from_name("nope"), OpenMode::ReadOnly, false)
            .err();
        assert_eq!(err.map(|e| e.code()), Some(codes::NONEXIST));
    }
}
