use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shardns_store::{FieldIo, ObjectHandle, OpenMode, RecordStore, RECORD_SIZE_ANY};
use shardns_types::ObjectId;
use tracing::{debug, warn};

use crate::container::Container;
use crate::error::{StoreContext, VolError, VolResult};
use crate::keys::INTERNAL_METADATA;

/// A store handle that is closed on drop unless handed off.
///
/// Used while an operation is still assembling a node, so a failure on the
/// way releases the handle.
pub(crate) struct OwnedHandle {
    store: Arc<dyn RecordStore>,
    raw: ObjectHandle,
    armed: bool,
}

impl OwnedHandle {
    pub(crate) fn open(
        store: &Arc<dyn RecordStore>,
        id: ObjectId,
        mode: OpenMode,
    ) -> VolResult<Self> {
        let raw = store.open(id, mode).context("can't open object")?;
        Ok(Self {
            store: Arc::clone(store),
            raw,
            armed: true,
        })
    }

    pub(crate) fn raw(&self) -> ObjectHandle {
        self.raw
    }

    pub(crate) fn into_raw(mut self) -> ObjectHandle {
        self.armed = false;
        self.raw
    }

    pub(crate) fn close(mut self) -> VolResult<()> {
        self.armed = false;
        self.store.close(self.raw).context("can't close object")
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.store.close(self.raw) {
                warn!(handle = self.raw.raw(), error = %e, "failed to release object handle");
            }
        }
    }
}

struct NodeShared {
    id: ObjectId,
    handle: ObjectHandle,
    container: Container,
    live: AtomicUsize,
}

/// One live handle to an open node.
///
/// Handles to the same node share one store handle and a count of live
/// handles. The store handle is closed when the last live handle goes away:
/// through [`Node::close`], which reports store errors, or on drop, which
/// only logs them.
pub struct Node {
    shared: Arc<NodeShared>,
    released: bool,
}

impl Node {
    pub(crate) fn new(container: Container, id: ObjectId, handle: ObjectHandle) -> Self {
        Self {
            shared: Arc::new(NodeShared {
                id,
                handle,
                container,
                live: AtomicUsize::new(1),
            }),
            released: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.shared.id
    }

    pub fn container(&self) -> &Container {
        &self.shared.container
    }

    /// Number of live handles to this node, this one included.
    pub fn live_handles(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Take another live handle to the same node.
    pub fn acquire(&self) -> Node {
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        Node {
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }

    /// Give up this handle, closing the store handle if it was the last.
    pub fn close(mut self) -> VolResult<()> {
        self.release()
    }

    pub(crate) fn handle(&self) -> ObjectHandle {
        self.shared.handle
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.shared.container.store().as_ref()
    }

    fn release(&mut self) -> VolResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if self.shared.live.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(());
        }
        debug!(oid = %self.shared.id, "closing node");
        self.store()
            .close(self.shared.handle)
            .context("can't close object")
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(oid = %self.shared.id, error = %e, "failed to close node");
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.shared.id)
            .field("live", &self.live_handles())
            .finish()
    }
}

/// Read internal metadata fields of unknown size.
pub(crate) fn read_metadata(
    store: &dyn RecordStore,
    handle: ObjectHandle,
    fields: &[&[u8]],
) -> VolResult<Vec<Vec<u8>>> {
    read_fields(store, handle, INTERNAL_METADATA, fields)
}

/// Read single-value fields of unknown size from record `key`: one request
/// for all the sizes, then one for the values into exactly sized buffers.
pub(crate) fn read_fields(
    store: &dyn RecordStore,
    handle: ObjectHandle,
    key: &[u8],
    fields: &[&[u8]],
) -> VolResult<Vec<Vec<u8>>> {
    let mut probe: Vec<FieldIo> = fields
        .iter()
        .map(|&name| FieldIo::single(name, RECORD_SIZE_ANY))
        .collect();
    store
        .fetch(handle, key, &mut probe, None)
        .context("can't read metadata sizes")?;
    if let Some(missing) = probe.iter().find(|f| f.record_size == 0) {
        return Err(VolError::NotFound(format!(
            "metadata field \"{}\"",
            String::from_utf8_lossy(&missing.name)
        )));
    }

    let mut values: Vec<Vec<u8>> = probe
        .iter()
        .map(|f| vec![0u8; f.record_size as usize])
        .collect();
    let mut sinks: Vec<&mut [u8]> = values.iter_mut().map(Vec::as_mut_slice).collect();
    store
        .fetch(handle, key, &mut probe, Some(sinks.as_mut_slice()))
        .context("can't read metadata")?;
    Ok(values)
}

pub(crate) fn write_metadata(
    store: &dyn RecordStore,
    handle: ObjectHandle,
    fields: &[&[u8]],
    values: &[Vec<u8>],
) -> VolResult<()> {
    write_fields(store, handle, INTERNAL_METADATA, fields, values)
}

pub(crate) fn write_fields(
    store: &dyn RecordStore,
    handle: ObjectHandle,
    key: &[u8],
    fields: &[&[u8]],
    values: &[Vec<u8>],
) -> VolResult<()> {
    let io: Vec<FieldIo> = fields
        .iter()
        .zip(values)
        .map(|(&name, value)| FieldIo::single(name, value.len() as u64))
        .collect();
    let sources: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
    store
        .update(handle, key, &io, &sources)
        .context("can't write metadata")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::single;

    #[test]
    fn last_close_releases_the_store_handle() {
        let (pool, container) = single("node-close");
        let store = pool.store(container.uuid()).unwrap();
        let before = store.open_handles();

        let root = container.root().unwrap();
        let node = root.node().acquire();
        assert_eq!(node.live_handles(), 2);
        assert_eq!(store.open_handles(), before + 1);

        root.close().unwrap();
        assert_eq!(node.live_handles(), 1);
        assert_eq!(store.open_handles(), before + 1);

        node.close().unwrap();
        assert_eq!(store.open_handles(), before);
    }

    #[test]
    fn drop_closes_quietly() {
        let (pool, container) = single("node-drop");
        let store = pool.store(container.uuid()).unwrap();
        let before = store.open_handles();
        {
            let root = container.root().unwrap();
            let _extra = root.node().acquire();
        }
        assert_eq!(store.open_handles(), before);
    }

    #[test]
    fn close_reports_store_errors() {
        let (pool, container) = single("node-close-fault");
        let store = pool.store(container.uuid()).unwrap();
        let root = container.root().unwrap();
        store.inject_fault(shardns_store::StoreOp::Close, 0, shardns_store::codes::IO);
        let err = root.close().unwrap_err();
        assert!(matches!(err, VolError::Store { code: shardns_store::codes::IO, .. }));
    }

    #[test]
    fn metadata_fields_are_probed_then_fetched() {
        let (pool, container) = single("node-md");
        let store = pool.store(container.uuid()).unwrap();
        let root = container.root().unwrap();
        let node = root.node();
        write_metadata(
            node.store(),
            node.handle(),
            &[b"a", b"b"],
            &[vec![1; 3], vec![2; 700]],
        )
        .unwrap();
        store.reset_stats();
        let values = read_metadata(node.store(), node.handle(), &[b"a", b"b"]).unwrap();
        assert_eq!(values, vec![vec![1; 3], vec![2; 700]]);
        assert_eq!(store.stats().fetches, 2);

        let err = read_metadata(node.store(), node.handle(), &[b"a", b"missing"]).unwrap_err();
        assert!(matches!(err, VolError::NotFound(_)));
    }
}
