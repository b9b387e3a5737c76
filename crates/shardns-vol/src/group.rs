use std::sync::Arc;

use shardns_io::{Dataspace, Datatype};
use shardns_types::{NodeKind, ObjectId};

use crate::dataset::Dataset;
use crate::error::{VolError, VolResult};
use crate::link::LinkRecord;
use crate::map::{check_map_type, Map};
use crate::named_type::NamedType;
use crate::node::Node;
use crate::object::{create_link, create_node, open_node, segment, Object};
use crate::path::{list_links, read_link};
use crate::props::PropertyList;

/// An open group: a node holding named links to other nodes.
///
/// Paths given to a group's methods are resolved relative to it, or from the
/// container root if they start with `/`.
#[derive(Debug)]
pub struct Group {
    node: Node,
    props: Arc<PropertyList>,
}

impl Group {
    pub(crate) fn from_parts(node: Node, props: PropertyList) -> Self {
        Self {
            node,
            props: Arc::new(props),
        }
    }

    pub(crate) fn from_segments(node: Node, segments: Vec<Vec<u8>>) -> VolResult<Self> {
        let props = PropertyList::decode(segment(&segments, 0)?)?;
        Ok(Self::from_parts(node, props))
    }

    pub fn id(&self) -> ObjectId {
        self.node.id()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Creation properties the group was created with.
    pub fn props(&self) -> &PropertyList {
        &self.props
    }

    pub fn acquire(&self) -> Self {
        Self {
            node: self.node.acquire(),
            props: Arc::clone(&self.props),
        }
    }

    pub fn close(self) -> VolResult<()> {
        self.node.close()
    }

    // -----------------------------------------------------------------------
    // Collective creation
    // -----------------------------------------------------------------------

    pub fn create_group(&self, path: &str, props: &PropertyList) -> VolResult<Group> {
        let (node, segments) = create_node(&self.node, path, NodeKind::Group, vec![props.encode()?])?;
        Group::from_segments(node, segments)
    }

    pub fn create_dataset(
        &self,
        path: &str,
        datatype: &Datatype,
        space: &Dataspace,
        props: &PropertyList,
    ) -> VolResult<Dataset> {
        datatype.validate()?;
        let segments = vec![datatype.encode()?, space.encode()?, props.encode()?];
        let (node, segments) = create_node(&self.node, path, NodeKind::Dataset, segments)?;
        Dataset::from_segments(node, segments)
    }

    /// Store `datatype` as a named type at `path`.
    pub fn commit_datatype(
        &self,
        path: &str,
        datatype: &Datatype,
        props: &PropertyList,
    ) -> VolResult<NamedType> {
        datatype.validate()?;
        let segments = vec![datatype.encode()?, props.encode()?];
        let (node, segments) = create_node(&self.node, path, NodeKind::NamedType, segments)?;
        NamedType::from_segments(node, segments)
    }

    pub fn create_map(
        &self,
        path: &str,
        key_type: &Datatype,
        value_type: &Datatype,
    ) -> VolResult<Map> {
        check_map_type(key_type)?;
        check_map_type(value_type)?;
        let segments = vec![key_type.encode()?, value_type.encode()?];
        let (node, segments) = create_node(&self.node, path, NodeKind::Map, segments)?;
        Map::from_segments(node, segments)
    }

    // -----------------------------------------------------------------------
    // Opening
    // -----------------------------------------------------------------------

    pub fn open_group(&self, path: &str) -> VolResult<Group> {
        let (node, segments) = open_node(&self.node, path, Some(NodeKind::Group))?;
        Group::from_segments(node, segments)
    }

    pub fn open_dataset(&self, path: &str) -> VolResult<Dataset> {
        let (node, segments) = open_node(&self.node, path, Some(NodeKind::Dataset))?;
        Dataset::from_segments(node, segments)
    }

    pub fn open_datatype(&self, path: &str) -> VolResult<NamedType> {
        let (node, segments) = open_node(&self.node, path, Some(NodeKind::NamedType))?;
        NamedType::from_segments(node, segments)
    }

    pub fn open_map(&self, path: &str) -> VolResult<Map> {
        let (node, segments) = open_node(&self.node, path, Some(NodeKind::Map))?;
        Map::from_segments(node, segments)
    }

    /// Open whatever `path` names, whichever kind it is.
    pub fn open_object(&self, path: &str) -> VolResult<Object> {
        let (node, segments) = open_node(&self.node, path, None)?;
        Object::from_parts(node, segments)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Create a hard link at `path` to the node `target`. Collective.
    pub fn link_hard(&self, path: &str, target: ObjectId) -> VolResult<()> {
        target.decode_kind()?;
        create_link(&self.node, path, LinkRecord::Hard(target))
    }

    /// Create a soft link at `path` holding `target`. The target is not
    /// checked; it is resolved each time the link is followed. Collective.
    pub fn link_soft(&self, path: &str, target: &str) -> VolResult<()> {
        create_link(&self.node, path, LinkRecord::Soft(target.to_owned()))
    }

    /// The link named `name` in this group, without following it.
    pub fn link(&self, name: &str) -> VolResult<LinkRecord> {
        read_link(&self.node, name)?.ok_or_else(|| VolError::NotFound(format!("link \"{name}\"")))
    }

    /// Names of the links in this group, sorted bytewise.
    pub fn links(&self) -> VolResult<Vec<String>> {
        list_links(&self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::testing::{run_group, single};
    use shardns_collective::CollectiveError;
    use shardns_store::InMemoryPool;

    #[test]
    fn nested_groups_by_relative_and_absolute_path() {
        let (_pool, container) = single("nested");
        let root = container.root().unwrap();
        let a = root
            .create_group("a", &PropertyList::new().with("tracking", vec![1]))
            .unwrap();
        let b = a.create_group("b", &PropertyList::new()).unwrap();
        let c = root.create_group("/a/b/c", &PropertyList::new()).unwrap();

        assert_eq!(root.open_group("a/b").unwrap().id(), b.id());
        assert_eq!(a.open_group("/a/b/c").unwrap().id(), c.id());
        assert_eq!(b.open_group("c").unwrap().id(), c.id());
        assert_eq!(
            root.open_group("/a").unwrap().props().get("tracking"),
            Some(&[1u8][..])
        );
        assert_eq!(root.open_group("/").unwrap().id(), container.root_id());
    }

    #[test]
    fn ids_carry_kind_and_increasing_index() {
        let (_pool, container) = single("kinds");
        let root = container.root().unwrap();
        let g = root.create_group("g", &PropertyList::new()).unwrap();
        let t = root
            .commit_datatype("t", &Datatype::int(4, true), &PropertyList::new())
            .unwrap();
        assert_eq!(g.id().decode_kind().unwrap(), NodeKind::Group);
        assert_eq!(t.id().decode_kind().unwrap(), NodeKind::NamedType);
        assert_eq!(t.id().index(), g.id().index() + 1);
    }

    #[test]
    fn hard_links_share_the_node() {
        let (_pool, container) = single("hard");
        let root = container.root().unwrap();
        let g = root.create_group("g", &PropertyList::new()).unwrap();
        root.create_group("other", &PropertyList::new()).unwrap();
        root.link_hard("other/alias", g.id()).unwrap();

        assert_eq!(root.open_group("other/alias").unwrap().id(), g.id());
        let other = root.open_group("other").unwrap();
        assert_eq!(other.link("alias").unwrap(), LinkRecord::Hard(g.id()));
    }

    #[test]
    fn soft_links_resolve_on_use() {
        let (_pool, container) = single("soft");
        let root = container.root().unwrap();
        root.link_soft("later", "/x/y").unwrap();
        assert!(matches!(root.open_group("later"), Err(VolError::NotFound(_))));

        let x = root.create_group("x", &PropertyList::new()).unwrap();
        let y = x.create_group("y", &PropertyList::new()).unwrap();
        assert_eq!(root.open_group("later").unwrap().id(), y.id());

        // Relative targets resolve from the group holding the link.
        x.link_soft("up", "y").unwrap();
        assert_eq!(root.open_group("/x/up").unwrap().id(), y.id());
        // A soft link in the middle of a path is traversed too.
        root.link_soft("xs", "x").unwrap();
        assert_eq!(root.open_group("xs/y").unwrap().id(), y.id());
    }

    #[test]
    fn empty_soft_target_is_rejected() {
        let (_pool, container) = single("empty-soft");
        let root = container.root().unwrap();
        assert!(matches!(root.link_soft("s", ""), Err(VolError::Argument(_))));
    }

    #[test]
    fn read_only_container_refuses_creation_on_every_rank() {
        let pool = InMemoryPool::default();
        run_group(&pool, 2, "ro-group", ConnectorConfig::default(), |c| {
            c.root().unwrap().create_group("g", &PropertyList::new()).unwrap();
        });
        let errors = crate::testing::reopen_group(
            &pool,
            2,
            "ro-group",
            shardns_store::OpenMode::ReadOnly,
            ConnectorConfig::default(),
            |c| {
                let root = c.root().unwrap();
                let err = root.create_group("h", &PropertyList::new()).unwrap_err();
                // The group is still in step after the local failure.
                let g = root.open_group("g").unwrap().id();
                (err, g)
            },
        );
        for (err, g) in &errors {
            assert!(matches!(err, VolError::Access(_)));
            assert_eq!(*g, errors[0].1);
        }
    }

    #[test]
    fn missing_link_fails_the_whole_group() {
        let pool = InMemoryPool::default();
        let errors = run_group(&pool, 3, "missing", ConnectorConfig::default(), |c| {
            c.root().unwrap().open_group("absent").unwrap_err()
        });
        assert!(matches!(errors[0], VolError::NotFound(_)));
        for err in &errors[1..] {
            assert!(matches!(err, VolError::Coordination(CollectiveError::LeaderFailed)));
        }
    }
}
