use std::sync::Arc;

use shardns_types::{ContainerUuid, IdGenerator, ObjectId};

use crate::error::StoreResult;
use crate::record::{FieldIo, KeyCursor, ObjectHandle, OpenMode};

/// Client for one container of a shard-addressed key-value object store.
///
/// Objects hold records addressed by a record key; each record holds named
/// fields that are sized independently. Objects need no explicit creation:
/// the first update through a writable handle materializes them.
///
/// All calls are synchronous from the caller's point of view.
pub trait RecordStore: IdGenerator + Send + Sync {
    /// Open an object and return a handle to it.
    fn open(&self, id: ObjectId, mode: OpenMode) -> StoreResult<ObjectHandle>;

    /// Release a handle.
    fn close(&self, handle: ObjectHandle) -> StoreResult<()>;

    /// Read fields of one record.
    ///
    /// Each field's `record_size` is overwritten with the stored size (0 if
    /// the field is absent). When `sinks` is `None` only sizes are reported.
    /// When it is `Some`, it holds one buffer per field; a single-value field
    /// is copied only if its buffer is large enough, so a short buffer
    /// yields the size and no data.
    fn fetch(
        &self,
        handle: ObjectHandle,
        key: &[u8],
        fields: &mut [FieldIo],
        sinks: Option<&mut [&mut [u8]]>,
    ) -> StoreResult<()>;

    /// Write fields of one record, one source buffer per field.
    ///
    /// A single-value field written with size 0 is removed.
    fn update(
        &self,
        handle: ObjectHandle,
        key: &[u8],
        fields: &[FieldIo],
        sources: &[&[u8]],
    ) -> StoreResult<()>;

    /// Enumerate up to `max` record keys after `cursor`, in key order.
    fn list_keys(
        &self,
        handle: ObjectHandle,
        cursor: &mut KeyCursor,
        max: usize,
    ) -> StoreResult<Vec<Vec<u8>>>;
}

/// Connection to a pool of containers.
pub trait RecordPool: Send + Sync {
    /// Connect to a container, creating it first when `create` is set.
    fn connect(
        &self,
        uuid: &ContainerUuid,
        mode: OpenMode,
        create: bool,
    ) -> StoreResult<Arc<dyn RecordStore>>;
}
