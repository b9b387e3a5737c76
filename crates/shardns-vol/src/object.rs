//! Create and open flows shared by every node kind, and the [`Object`] sum
//! type returned when the kind is only known at run time.

use shardns_collective::{exchange, Envelope, Exchanged};
use shardns_types::{NodeKind, ObjectId};
use tracing::debug;

use crate::attribute::Attribute;
use crate::container::Container;
use crate::dataset::Dataset;
use crate::error::{VolError, VolResult};
use crate::group::Group;
use crate::keys::{
    DATASET_PROPS, DATASPACE, DATATYPE, GROUP_PROPS, KEY_DATATYPE, TYPE_PROPS, VALUE_DATATYPE,
};
use crate::link::LinkRecord;
use crate::map::Map;
use crate::named_type::NamedType;
use crate::node::{read_metadata, write_metadata, Node};
use crate::path::{follow_link, leaf_name, link_exists, resolve, write_link};

/// Segments broadcast when the kind is not known in advance: enough for the
/// kind with the most metadata fields.
pub(crate) const ANY_KIND_SEGMENTS: usize = 3;

/// Internal metadata fields of each kind, in envelope segment order.
pub(crate) fn metadata_fields(kind: NodeKind) -> &'static [&'static [u8]] {
    match kind {
        NodeKind::Group => &[GROUP_PROPS],
        NodeKind::Dataset => &[DATATYPE, DATASPACE, DATASET_PROPS],
        NodeKind::NamedType => &[DATATYPE, TYPE_PROPS],
        NodeKind::Map => &[KEY_DATATYPE, VALUE_DATATYPE],
    }
}

/// Create a node of `kind` at `path`, relative to `parent`.
///
/// Collective. The leader allocates an index, writes the node's metadata and
/// the hard link to it, then broadcasts the id and `segments`; followers open
/// their own handle to the id. Returns the node and its metadata segments.
pub(crate) fn create_node(
    parent: &Node,
    path: &str,
    kind: NodeKind,
    segments: Vec<Vec<u8>>,
) -> VolResult<(Node, Vec<Vec<u8>>)> {
    let container = parent.container();
    container.require_writable(&format!("create {kind}"))?;
    if leaf_name(path).is_none() {
        return Err(VolError::Argument(format!("\"{path}\" names no link to create")));
    }
    let fields = metadata_fields(kind);

    let exchanged = exchange(container.comm(), true, fields.len(), || {
        let (group, leaf) = resolve(parent, path)?;
        if link_exists(&group, &leaf)? {
            return Err(VolError::Argument(format!("link \"{leaf}\" already exists")));
        }
        let index = container.allocate_index()?;
        let id = ObjectId::encode(kind, index, container.store().as_ref());
        let handle = container.open_handle(id)?;
        write_metadata(container.store().as_ref(), handle.raw(), fields, &segments)?;
        write_link(&group, &leaf, &LinkRecord::Hard(id))?;
        group.close()?;
        debug!(oid = %id, %kind, path, "node created");
        Ok::<_, VolError>((Envelope::new(id, segments.clone()), handle))
    })?;
    finish(container, exchanged, Some(kind))
}

/// Open the node at `path`, relative to `parent`.
///
/// Collective when the container is configured for collective metadata: the
/// leader resolves the path and reads the metadata, everyone else rebuilds
/// the node from the broadcast. With `expect`, any other kind is an
/// argument error.
pub(crate) fn open_node(
    parent: &Node,
    path: &str,
    expect: Option<NodeKind>,
) -> VolResult<(Node, Vec<Vec<u8>>)> {
    let container = parent.container();
    open_with(container, expect, || {
        let (group, leaf) = resolve(parent, path)?;
        let id = if leaf.is_empty() {
            group.id()
        } else {
            follow_link(&group, &leaf, 0)?
        };
        group.close()?;
        Ok(id)
    })
}

/// Open the node with id `id` without any path resolution.
pub(crate) fn open_node_by_id(
    container: &Container,
    id: ObjectId,
    expect: Option<NodeKind>,
) -> VolResult<(Node, Vec<Vec<u8>>)> {
    open_with(container, expect, || Ok(id))
}

fn open_with<F>(
    container: &Container,
    expect: Option<NodeKind>,
    locate: F,
) -> VolResult<(Node, Vec<Vec<u8>>)>
where
    F: FnOnce() -> VolResult<ObjectId>,
{
    let nsegments = expect.map_or(ANY_KIND_SEGMENTS, |k| metadata_fields(k).len());
    let collective = container.config().collective_metadata;

    let exchanged = exchange(container.comm(), collective, nsegments, || {
        let id = locate()?;
        let kind = id.decode_kind()?;
        check_kind(id, kind, expect)?;
        let handle = container.open_handle(id)?;
        let mut segments = read_metadata(
            container.store().as_ref(),
            handle.raw(),
            metadata_fields(kind),
        )?;
        segments.resize(nsegments, Vec::new());
        debug!(oid = %id, %kind, "node opened");
        Ok::<_, VolError>((Envelope::new(id, segments), handle))
    })?;
    finish(container, exchanged, expect)
}

fn check_kind(id: ObjectId, kind: NodeKind, expect: Option<NodeKind>) -> VolResult<()> {
    match expect {
        Some(expected) if expected != kind => Err(VolError::Argument(format!(
            "object {id} is a {kind}, not a {expected}"
        ))),
        _ => Ok(()),
    }
}

fn finish(
    container: &Container,
    exchanged: Exchanged<crate::node::OwnedHandle>,
    expect: Option<NodeKind>,
) -> VolResult<(Node, Vec<Vec<u8>>)> {
    let Exchanged { envelope, local } = exchanged;
    let id = envelope.id;
    check_kind(id, id.decode_kind()?, expect)?;
    container.observe_index(id.index());
    let handle = match local {
        Some(handle) => handle,
        None => container.open_handle(id)?,
    };
    Ok((Node::new(container.clone(), id, handle.into_raw()), envelope.segments))
}

/// Create a link at `path`, relative to `parent`. Collective.
pub(crate) fn create_link(parent: &Node, path: &str, link: LinkRecord) -> VolResult<()> {
    let container = parent.container();
    container.require_writable("create link")?;
    if leaf_name(path).is_none() {
        return Err(VolError::Argument(format!("\"{path}\" names no link to create")));
    }
    if matches!(&link, LinkRecord::Soft(target) if target.is_empty()) {
        return Err(VolError::Argument("soft link target is empty".into()));
    }
    let record = link.encode();

    exchange(container.comm(), true, 1, || {
        let (group, leaf) = resolve(parent, path)?;
        if link_exists(&group, &leaf)? {
            return Err(VolError::Argument(format!("link \"{leaf}\" already exists")));
        }
        write_link(&group, &leaf, &link)?;
        let holder = group.id();
        group.close()?;
        debug!(group = %holder, link = %leaf, "link created");
        Ok::<_, VolError>((Envelope::new(holder, vec![record.clone()]), ()))
    })?;
    Ok(())
}

/// Segment `i` of a decoded envelope.
pub(crate) fn segment(segments: &[Vec<u8>], i: usize) -> VolResult<&[u8]> {
    segments
        .get(i)
        .map(Vec::as_slice)
        .ok_or_else(|| VolError::Argument(format!("metadata segment {i} missing")))
}

/// Any open node.
#[derive(Debug)]
pub enum Object {
    Group(Group),
    Dataset(Dataset),
    NamedType(NamedType),
    Map(Map),
    Attribute(Attribute),
}

impl Object {
    /// Build the typed node matching the kind encoded in `node`'s id.
    pub(crate) fn from_parts(node: Node, segments: Vec<Vec<u8>>) -> VolResult<Self> {
        Ok(match node.id().decode_kind()? {
            NodeKind::Group => Self::Group(Group::from_segments(node, segments)?),
            NodeKind::Dataset => Self::Dataset(Dataset::from_segments(node, segments)?),
            NodeKind::NamedType => Self::NamedType(NamedType::from_segments(node, segments)?),
            NodeKind::Map => Self::Map(Map::from_segments(node, segments)?),
        })
    }

    /// The node's id; for an attribute, the id of the object holding it.
    pub fn id(&self) -> ObjectId {
        self.node().id()
    }

    pub fn node(&self) -> &Node {
        match self {
            Self::Group(g) => g.node(),
            Self::Dataset(d) => d.node(),
            Self::NamedType(t) => t.node(),
            Self::Map(m) => m.node(),
            Self::Attribute(a) => a.node(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Dataset(_) => "dataset",
            Self::NamedType(_) => "named-type",
            Self::Map(_) => "map",
            Self::Attribute(_) => "attribute",
        }
    }

    pub fn close(self) -> VolResult<()> {
        match self {
            Self::Group(g) => g.close(),
            Self::Dataset(d) => d.close(),
            Self::NamedType(t) => t.close(),
            Self::Map(m) => m.close(),
            Self::Attribute(a) => a.close(),
        }
    }
}

impl Container {
    /// Open any node by id. Collective like every open.
    pub fn open_object_by_id(&self, id: ObjectId) -> VolResult<Object> {
        let (node, segments) = open_node_by_id(self, id, None)?;
        Object::from_parts(node, segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::HasAttributes;
    use crate::config::ConnectorConfig;
    use crate::testing::{run_group, run_group_timed, single};
    use crate::PropertyList;
    use std::sync::Barrier;
    use std::time::Duration;
    use shardns_collective::CollectiveError;
    use shardns_io::{Dataspace, Datatype};
    use shardns_store::{codes, InMemoryPool, StoreOp};
    use shardns_types::ContainerUuid;

    #[test]
    fn open_object_dispatches_on_kind() {
        let (_pool, container) = single("dispatch");
        let root = container.root().unwrap();
        root.create_group("g", &PropertyList::new()).unwrap();
        root.create_dataset("d", &Datatype::float(8), &Dataspace::new([2]), &PropertyList::new())
            .unwrap();
        root.commit_datatype("t", &Datatype::int(2, false), &PropertyList::new())
            .unwrap();
        root.create_map("m", &Datatype::int(4, false), &Datatype::VarString)
            .unwrap();

        let kinds: Vec<&str> = ["g", "d", "t", "m"]
            .iter()
            .map(|p| root.open_object(p).unwrap().kind_name())
            .collect();
        assert_eq!(kinds, ["group", "dataset", "named-type", "map"]);
    }

    #[test]
    fn open_by_id_skips_resolution() {
        let (pool, container) = single("by-id");
        let root = container.root().unwrap();
        let d = root
            .create_dataset("d", &Datatype::int(8, true), &Dataspace::new([3, 3]), &PropertyList::new())
            .unwrap();
        let store = pool.store(container.uuid()).unwrap();
        store.reset_stats();
        match container.open_object_by_id(d.id()).unwrap() {
            Object::Dataset(opened) => assert_eq!(opened.space(), &Dataspace::new([3, 3])),
            other => panic!("unexpected {}", other.kind_name()),
        }
        assert_eq!(store.stats().fetches_of(crate::keys::LINK), 0);
    }

    #[test]
    fn wrong_kind_is_an_argument_error() {
        let (_pool, container) = single("wrong-kind");
        let root = container.root().unwrap();
        root.create_group("g", &PropertyList::new()).unwrap();
        assert!(matches!(root.open_dataset("g"), Err(VolError::Argument(_))));
    }

    #[test]
    fn duplicate_link_is_rejected_before_allocation() {
        let (_pool, container) = single("dup");
        let root = container.root().unwrap();
        root.create_group("g", &PropertyList::new()).unwrap();
        let max = container.max_index();
        assert!(matches!(
            root.create_group("g", &PropertyList::new()),
            Err(VolError::Argument(_))
        ));
        assert_eq!(container.max_index(), max);
    }

    #[test]
    fn create_without_leaf_is_local_error() {
        let (_pool, container) = single("no-leaf");
        let root = container.root().unwrap();
        assert!(matches!(
            root.create_group("/", &PropertyList::new()),
            Err(VolError::Argument(_))
        ));
    }

    #[test]
    fn collective_create_agrees_on_ids() {
        let pool = InMemoryPool::default();
        let ids = run_group(&pool, 4, "agree-ids", ConnectorConfig::default(), |c| {
            let root = c.root().unwrap();
            let g = root.create_group("g", &PropertyList::new()).unwrap();
            let d = g
                .create_dataset("d", &Datatype::int(4, true), &Dataspace::new([8]), &PropertyList::new())
                .unwrap();
            (g.id(), d.id(), c.max_index())
        });
        for entry in &ids {
            assert_eq!(entry, &ids[0]);
        }
        assert_eq!(ids[0].2, 3);

        // Only the leader writes: the index and root at bootstrap, then the
        // index, metadata record and link of each node.
        let store = pool.store(&ContainerUuid::from_name("agree-ids")).unwrap();
        assert_eq!(store.stats().updates, 2 + 2 * 3);
    }

    #[test]
    fn failed_create_does_not_reuse_index() {
        let (pool, container) = single("no-reuse");
        let store = pool.store(container.uuid()).unwrap();
        let root = container.root().unwrap();
        // The index update goes through, the metadata write fails.
        store.inject_fault(StoreOp::Update, 1, codes::IO);
        let err = root.create_group("a", &PropertyList::new()).unwrap_err();
        assert!(matches!(err, VolError::Store { code: codes::IO, .. }));
        assert_eq!(container.max_index(), 2);

        let g = root.create_group("a", &PropertyList::new()).unwrap();
        assert_eq!(g.id().index(), 3);
    }

    #[test]
    fn followers_see_leader_failure_and_stay_in_step() {
        let pool = InMemoryPool::default();
        let outcomes = run_group(&pool, 3, "leader-fails", ConnectorConfig::default(), |c| {
            if c.comm().is_leader() {
                let store = pool.store(c.uuid()).unwrap();
                store.inject_fault(StoreOp::Update, 1, codes::IO);
            }
            let root = c.root().unwrap();
            let first = root.create_group("a", &PropertyList::new()).err();
            let second = root
                .create_group("b", &PropertyList::new())
                .map(|g| g.id().index());
            (first, second)
        });

        assert!(matches!(outcomes[0].0, Some(VolError::Store { code: codes::IO, .. })));
        for (first, _) in &outcomes[1..] {
            assert!(matches!(
                first,
                Some(VolError::Coordination(CollectiveError::LeaderFailed))
            ));
        }
        for (_, second) in &outcomes {
            assert_eq!(second.as_ref().unwrap(), &3);
        }
    }

    #[test]
    fn independent_opens_read_the_store_everywhere() {
        let pool = InMemoryPool::default();
        let config = ConnectorConfig {
            collective_metadata: false,
            ..Default::default()
        };
        let ids = run_group(&pool, 3, "independent", config, |c| {
            let root = c.root().unwrap();
            let id = root.create_group("g", &PropertyList::new()).unwrap().id();
            let opened = root.open_group("g").unwrap().id();
            assert_eq!(id, opened);
            opened
        });
        assert!(ids.iter().all(|id| *id == ids[0]));
        let store = pool.store(&ContainerUuid::from_name("independent")).unwrap();
        assert_eq!(store.stats().fetches_of(crate::keys::GROUP_PROPS), 2 * 3);
    }

    #[derive(Clone, Copy, Debug)]
    enum Step {
        CreateThroughSoftLink,
        OpenThroughSoftLink,
        CreateAttribute,
        CreateAbsolute,
    }

    fn run_step(root: &Group, dataset: &Dataset, step: Step) -> VolResult<()> {
        let int = Datatype::int(4, true);
        match step {
            Step::CreateThroughSoftLink => {
                root.create_group("s/new", &PropertyList::new()).map(drop)
            }
            Step::OpenThroughSoftLink => root.open_dataset("s/d").map(drop),
            Step::CreateAttribute => dataset
                .create_attribute("a", &int, &Dataspace::scalar())
                .map(drop),
            Step::CreateAbsolute => root
                .create_dataset("/g/e", &int, &Dataspace::new([4]), &PropertyList::new())
                .map(drop),
        }
    }

    #[test]
    fn store_faults_before_broadcast_never_strand_followers() {
        let steps = [
            Step::CreateThroughSoftLink,
            Step::OpenThroughSoftLink,
            Step::CreateAttribute,
            Step::CreateAbsolute,
        ];
        let ops = [StoreOp::Open, StoreOp::Fetch, StoreOp::Update, StoreOp::Close];
        for step in steps {
            for op in ops {
                for skip in 0..8 {
                    let pool = InMemoryPool::default();
                    let ready = Barrier::new(3);
                    let name = format!("fault-{step:?}-{op}-{skip}");
                    let outcomes = run_group_timed(&pool, 3, &name, Duration::from_secs(10), |c| {
                        let root = c.root().unwrap();
                        let g = root.create_group("g", &PropertyList::new()).unwrap();
                        root.link_soft("s", "/g").unwrap();
                        let d = g
                            .create_dataset(
                                "d",
                                &Datatype::int(4, true),
                                &Dataspace::new([4]),
                                &PropertyList::new(),
                            )
                            .unwrap();
                        g.close().unwrap();
                        ready.wait();
                        if c.comm().is_leader() {
                            pool.store(c.uuid())
                                .unwrap()
                                .inject_fault(op, skip, codes::IO);
                        }
                        ready.wait();
                        run_step(&root, &d, step)
                    });

                    let case = format!("{step:?} {op} skip {skip}");
                    for outcome in &outcomes {
                        assert!(
                            !matches!(
                                outcome,
                                Err(VolError::Coordination(CollectiveError::Timeout { .. }))
                            ),
                            "{case}: a rank timed out"
                        );
                    }
                    if outcomes[0].is_err() {
                        for follower in &outcomes[1..] {
                            assert!(
                                matches!(
                                    follower,
                                    Err(VolError::Coordination(CollectiveError::LeaderFailed))
                                ),
                                "{case}: follower got {follower:?}"
                            );
                        }
                    }
                }
            }
        }
    }
}
