use std::sync::Arc;

use shardns_io::Datatype;
use shardns_types::ObjectId;

use crate::error::VolResult;
use crate::node::Node;
use crate::object::segment;
use crate::props::PropertyList;

#[derive(Debug)]
struct NamedTypeMeta {
    datatype: Datatype,
    props: PropertyList,
}

/// A datatype committed to the namespace under a name.
#[derive(Debug)]
pub struct NamedType {
    node: Node,
    meta: Arc<NamedTypeMeta>,
}

impl NamedType {
    pub(crate) fn from_segments(node: Node, segments: Vec<Vec<u8>>) -> VolResult<Self> {
        let meta = NamedTypeMeta {
            datatype: Datatype::decode(segment(&segments, 0)?)?,
            props: PropertyList::decode(segment(&segments, 1)?)?,
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

    pub fn datatype(&self) -> &Datatype {
        &self.meta.datatype
    }

    pub fn props(&self) -> &PropertyList {
        &self.meta.props
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::testing::run_group;
    use shardns_io::Member;
    use shardns_store::InMemoryPool;

    #[test]
    fn committed_type_is_shared_by_the_group() {
        let point = Datatype::Compound {
            size: 12,
            members: vec![
                Member::new("x", 0, Datatype::float(4)),
                Member::new("y", 4, Datatype::float(4)),
                Member::new("z", 8, Datatype::float(4)),
            ],
        };
        let pool = InMemoryPool::default();
        let seen = run_group(&pool, 2, "named-type", ConnectorConfig::default(), |c| {
            let root = c.root().unwrap();
            let committed = root
                .commit_datatype("point", &point, &PropertyList::new().with("v", vec![2]))
                .unwrap();
            let opened = root.open_datatype("/point").unwrap();
            assert_eq!(opened.id(), committed.id());
            (opened.datatype().clone(), opened.props().get("v").map(<[u8]>::to_vec))
        });
        for (ty, v) in seen {
            assert_eq!(ty, point);
            assert_eq!(v, Some(vec![2]));
        }
    }

    #[test]
    fn invalid_types_are_not_committed() {
        let (_pool, container) = crate::testing::single("bad-type");
        let root = container.root().unwrap();
        let max = container.max_index();
        assert!(root
            .commit_datatype("f", &Datatype::float(3), &PropertyList::new())
            .is_err());
        assert_eq!(container.max_index(), max);
    }
}
