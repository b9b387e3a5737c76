use std::sync::{Arc, Mutex};

use shardns_collective::{exchange, Communicator, Envelope, Exchanged};
use shardns_store::{FieldIo, ObjectHandle, OpenMode, RecordPool, RecordStore};
use shardns_types::{ContainerUuid, NodeKind, ObjectId, INDEX_MASK, ROOT_INDEX};
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{StoreContext, VolError, VolResult};
use crate::group::Group;
use crate::keys::{GROUP_PROPS, INTERNAL_METADATA, MAX_INDEX};
use crate::node::{read_metadata, write_metadata, Node, OwnedHandle};
use crate::object::segment;
use crate::props::PropertyList;

/// Segments of the container bootstrap envelope: root group properties and
/// the highest allocated index.
const BOOTSTRAP_SEGMENTS: usize = 2;

/// Index of the object holding container-wide metadata.
const GLOBAL_METADATA_INDEX: u64 = 0;

struct ContainerInner {
    name: String,
    uuid: ContainerUuid,
    store: Arc<dyn RecordStore>,
    comm: Arc<dyn Communicator>,
    mode: OpenMode,
    config: ConnectorConfig,
    max_index: Mutex<u64>,
    metadata: ObjectHandle,
    metadata_closed: bool,
    root_id: ObjectId,
    root_props: PropertyList,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if self.metadata_closed {
            return;
        }
        if let Err(e) = self.store.close(self.metadata) {
            warn!(container = %self.name, error = %e, "failed to close container metadata");
        }
    }
}

/// A container opened by every member of a group.
///
/// Cloning is cheap; every clone and every node opened through it shares the
/// same store connection and index counter.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// Store state the leader hands over to its own container after bootstrap.
struct Bootstrap {
    store: Arc<dyn RecordStore>,
    metadata: OwnedHandle,
}

impl Container {
    /// Create a container named `name` with an empty root group.
    ///
    /// Collective: every member of `comm` calls this with the same arguments.
    pub fn create(
        pool: &dyn RecordPool,
        name: &str,
        comm: Arc<dyn Communicator>,
        config: ConnectorConfig,
        root_props: &PropertyList,
    ) -> VolResult<Self> {
        config.validate()?;
        let uuid = ContainerUuid::from_name(name);
        let props = root_props.encode()?;

        let exchanged = exchange(comm.as_ref(), true, BOOTSTRAP_SEGMENTS, || {
            let store = pool
                .connect(&uuid, OpenMode::ReadWrite, true)
                .context("can't create container")?;
            let metadata = OwnedHandle::open(
                &store,
                global_metadata_id(store.as_ref()),
                OpenMode::ReadWrite,
            )?;
            write_max_index(store.as_ref(), metadata.raw(), ROOT_INDEX)?;

            let root_id = ObjectId::encode(NodeKind::Group, ROOT_INDEX, store.as_ref());
            let root = OwnedHandle::open(&store, root_id, OpenMode::ReadWrite)?;
            write_metadata(
                store.as_ref(),
                root.raw(),
                &[GROUP_PROPS],
                std::slice::from_ref(&props),
            )?;
            root.close()?;

            let envelope = Envelope::new(
                root_id,
                vec![props.clone(), ROOT_INDEX.to_le_bytes().to_vec()],
            );
            Ok::<_, VolError>((envelope, Bootstrap { store, metadata }))
        })?;
        let container =
            Self::assemble(pool, name, uuid, comm, config, OpenMode::ReadWrite, exchanged)?;
        info!(container = name, %uuid, "container created");
        Ok(container)
    }

    /// Open an existing container.
    ///
    /// Collective: every member of `comm` calls this with the same arguments.
    pub fn open(
        pool: &dyn RecordPool,
        name: &str,
        mode: OpenMode,
        comm: Arc<dyn Communicator>,
        config: ConnectorConfig,
    ) -> VolResult<Self> {
        config.validate()?;
        let uuid = ContainerUuid::from_name(name);

        let exchanged = exchange(comm.as_ref(), true, BOOTSTRAP_SEGMENTS, || {
            let store = pool
                .connect(&uuid, mode, false)
                .context("can't open container")?;
            let metadata = OwnedHandle::open(&store, global_metadata_id(store.as_ref()), mode)?;
            let max_index = read_max_index(store.as_ref(), metadata.raw())?;

            let root_id = ObjectId::encode(NodeKind::Group, ROOT_INDEX, store.as_ref());
            let root = OwnedHandle::open(&store, root_id, mode)?;
            let mut values = read_metadata(store.as_ref(), root.raw(), &[GROUP_PROPS])?;
            root.close()?;

            let envelope = Envelope::new(
                root_id,
                vec![values.swap_remove(0), max_index.to_le_bytes().to_vec()],
            );
            Ok::<_, VolError>((envelope, Bootstrap { store, metadata }))
        })?;
        let container = Self::assemble(pool, name, uuid, comm, config, mode, exchanged)?;
        info!(container = name, %uuid, ?mode, "container opened");
        Ok(container)
    }

    fn assemble(
        pool: &dyn RecordPool,
        name: &str,
        uuid: ContainerUuid,
        comm: Arc<dyn Communicator>,
        config: ConnectorConfig,
        mode: OpenMode,
        exchanged: Exchanged<Bootstrap>,
    ) -> VolResult<Self> {
        let Exchanged { envelope, local } = exchanged;
        let root_props = PropertyList::decode(segment(&envelope.segments, 0)?)?;
        let max_index = decode_index(segment(&envelope.segments, 1)?)?;
        let (store, metadata) = match local {
            Some(Bootstrap { store, metadata }) => (store, metadata.into_raw()),
            None => {
                let store = pool
                    .connect(&uuid, mode, false)
                    .context("can't connect to container")?;
                let metadata =
                    OwnedHandle::open(&store, global_metadata_id(store.as_ref()), mode)?;
                (store, metadata.into_raw())
            }
        };
        debug!(rank = comm.rank(), root = %envelope.id, max_index, "container assembled");
        Ok(Self {
            inner: Arc::new(ContainerInner {
                name: name.to_owned(),
                uuid,
                store,
                comm,
                mode,
                config,
                max_index: Mutex::new(max_index),
                metadata,
                metadata_closed: false,
                root_id: envelope.id,
                root_props,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uuid(&self) -> &ContainerUuid {
        &self.inner.uuid
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.inner.comm.as_ref()
    }

    pub fn root_id(&self) -> ObjectId {
        self.inner.root_id
    }

    /// Highest object index this process knows to be allocated.
    pub fn max_index(&self) -> u64 {
        *self.inner.max_index.lock().expect("lock poisoned")
    }

    /// Open the root group. Local: no group interaction.
    pub fn root(&self) -> VolResult<Group> {
        let node = self.open_node(self.inner.root_id)?;
        Ok(Group::from_parts(node, self.inner.root_props.clone()))
    }

    /// Close the container. Store errors are reported only when this is the
    /// last reference; nodes still open keep the container alive.
    pub fn close(self) -> VolResult<()> {
        let Ok(mut inner) = Arc::try_unwrap(self.inner) else {
            return Ok(());
        };
        inner.metadata_closed = true;
        inner
            .store
            .close(inner.metadata)
            .context("can't close container metadata")?;
        info!(container = %inner.name, "container closed");
        Ok(())
    }

    pub(crate) fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    pub(crate) fn require_writable(&self, what: &str) -> VolResult<()> {
        if self.inner.mode.is_writable() {
            Ok(())
        } else {
            Err(VolError::Access(format!(
                "can't {what}: container {} is open read-only",
                self.inner.name
            )))
        }
    }

    /// Open a store handle to `id` in the container's mode. Local.
    pub(crate) fn open_handle(&self, id: ObjectId) -> VolResult<OwnedHandle> {
        OwnedHandle::open(&self.inner.store, id, self.inner.mode)
    }

    pub(crate) fn open_node(&self, id: ObjectId) -> VolResult<Node> {
        let handle = self.open_handle(id)?;
        Ok(Node::new(self.clone(), id, handle.into_raw()))
    }

    /// Reserve the next object index. Leader only; the new maximum is stored
    /// before the caller writes anything that depends on it.
    pub(crate) fn allocate_index(&self) -> VolResult<u64> {
        let mut max = self.inner.max_index.lock().expect("lock poisoned");
        let next = *max + 1;
        if next > INDEX_MASK {
            return Err(VolError::Unsupported("object index space exhausted".into()));
        }
        write_max_index(self.inner.store.as_ref(), self.inner.metadata, next)?;
        *max = next;
        debug!(index = next, "object index allocated");
        Ok(next)
    }

    /// Record an index allocated by the leader.
    pub(crate) fn observe_index(&self, index: u64) {
        let mut max = self.inner.max_index.lock().expect("lock poisoned");
        *max = (*max).max(index);
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.name)
            .field("uuid", &self.inner.uuid)
            .field("mode", &self.inner.mode)
            .field("rank", &self.inner.comm.rank())
            .finish()
    }
}

fn global_metadata_id(store: &dyn RecordStore) -> ObjectId {
    ObjectId::encode(NodeKind::Group, GLOBAL_METADATA_INDEX, store)
}

fn write_max_index(store: &dyn RecordStore, handle: ObjectHandle, index: u64) -> VolResult<()> {
    let bytes = index.to_le_bytes();
    store
        .update(
            handle,
            INTERNAL_METADATA,
            &[FieldIo::single(MAX_INDEX, bytes.len() as u64)],
            &[&bytes[..]],
        )
        .context("can't write max object index")
}

fn read_max_index(store: &dyn RecordStore, handle: ObjectHandle) -> VolResult<u64> {
    let mut bytes = [0u8; 8];
    let mut fields = [FieldIo::single(MAX_INDEX, bytes.len() as u64)];
    store
        .fetch(handle, INTERNAL_METADATA, &mut fields, Some(&mut [&mut bytes[..]]))
        .context("can't read max object index")?;
    match fields[0].record_size {
        0 => Err(VolError::NotFound("container has no max object index".into())),
        8 => Ok(u64::from_le_bytes(bytes)),
        n => Err(VolError::Argument(format!("max object index holds {n} bytes"))),
    }
}

fn decode_index(bytes: &[u8]) -> VolResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| VolError::Argument(format!("object index holds {} bytes", bytes.len())))?;
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run_group, single};
    use shardns_collective::{CollectiveError, LocalGroup, SelfComm};
    use shardns_store::{codes, InMemoryPool, StoreOp};

    #[test]
    fn create_then_reopen() {
        let (pool, container) = single("bootstrap");
        let root = container.root_id();
        assert_eq!(root.decode_kind().unwrap(), NodeKind::Group);
        assert_eq!(root.index(), ROOT_INDEX);
        assert_eq!(container.max_index(), ROOT_INDEX);
        container.close().unwrap();

        let reopened = Container::open(
            pool.as_ref(),
            "bootstrap",
            OpenMode::ReadOnly,
            Arc::new(SelfComm),
            ConnectorConfig::default(),
        )
        .unwrap();
        assert_eq!(reopened.root_id(), root);
        assert_eq!(reopened.max_index(), ROOT_INDEX);
        assert!(reopened.root().unwrap().props().is_empty());
    }

    #[test]
    fn create_twice_fails() {
        let (pool, _container) = single("twice");
        let err = Container::create(
            pool.as_ref(),
            "twice",
            Arc::new(SelfComm),
            ConnectorConfig::default(),
            &PropertyList::new(),
        )
        .unwrap_err();
        assert!(matches!(err, VolError::Store { code: codes::EXIST, .. }));
    }

    #[test]
    fn opening_a_missing_container_fails_on_every_rank() {
        let pool = InMemoryPool::default();
        let errors: Vec<VolError> = std::thread::scope(|s| {
            let handles: Vec<_> = LocalGroup::new(3)
                .into_iter()
                .map(|comm| {
                    let pool = &pool;
                    s.spawn(move || {
                        Container::open(
                            pool,
                            "nowhere",
                            OpenMode::ReadOnly,
                            Arc::new(comm),
                            ConnectorConfig::default(),
                        )
                        .unwrap_err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(matches!(errors[0], VolError::Store { code: codes::NONEXIST, .. }));
        for err in &errors[1..] {
            assert!(matches!(err, VolError::Coordination(CollectiveError::LeaderFailed)));
        }
    }

    #[test]
    fn every_rank_agrees_on_bootstrap() {
        let pool = InMemoryPool::default();
        let roots = run_group(&pool, 4, "agree", ConnectorConfig::default(), |c| {
            (c.root_id(), c.max_index(), c.comm().rank())
        });
        for (i, (root, max, rank)) in roots.iter().enumerate() {
            assert_eq!(*root, roots[0].0);
            assert_eq!(*max, ROOT_INDEX);
            assert_eq!(*rank, i);
        }
    }

    #[test]
    fn allocation_persists_before_returning() {
        let (pool, container) = single("alloc");
        let store = pool.store(container.uuid()).unwrap();
        assert_eq!(container.allocate_index().unwrap(), 2);
        assert_eq!(container.allocate_index().unwrap(), 3);
        assert_eq!(
            read_max_index(store.as_ref(), container.inner.metadata).unwrap(),
            3
        );

        store.inject_fault(StoreOp::Update, 0, codes::IO);
        assert!(container.allocate_index().is_err());
        assert_eq!(container.max_index(), 3);
        assert_eq!(container.allocate_index().unwrap(), 4);
    }

    #[test]
    fn observed_indices_only_grow() {
        let (_pool, container) = single("observe");
        container.observe_index(9);
        container.observe_index(5);
        assert_eq!(container.max_index(), 9);
    }

    #[test]
    fn read_only_container_rejects_writes() {
        let (pool, container) = single("ro");
        container.close().unwrap();
        let ro = Container::open(
            pool.as_ref(),
            "ro",
            OpenMode::ReadOnly,
            Arc::new(SelfComm),
            ConnectorConfig::default(),
        )
        .unwrap();
        assert!(matches!(ro.require_writable("create"), Err(VolError::Access(_))));
    }
}
