use std::sync::Arc;

use shardns_io::{
    read_fixed, read_vlen, write_fixed, write_vlen, Dataspace, Datatype, ElementLayout,
    RecordTarget, Selection, VlKind,
};
use shardns_types::ObjectId;
use tracing::trace;

use crate::error::VolResult;
use crate::keys::{RAW_DATA, RAW_FIELD, RAW_VLEN_PREFIX};
use crate::node::Node;
use crate::object::segment;
use crate::props::PropertyList;

#[derive(Debug)]
struct DatasetMeta {
    datatype: Datatype,
    space: Dataspace,
    props: PropertyList,
}

/// An open dataset: a typed, shaped array of elements.
///
/// Fixed-size elements live in one array field addressed by element index;
/// variable-length elements get one field each.
#[derive(Debug)]
pub struct Dataset {
    node: Node,
    meta: Arc<DatasetMeta>,
}

impl Dataset {
    pub(crate) fn from_segments(node: Node, segments: Vec<Vec<u8>>) -> VolResult<Self> {
        let meta = DatasetMeta {
            datatype: Datatype::decode(segment(&segments, 0)?)?,
            space: Dataspace::decode(segment(&segments, 1)?)?,
            props: PropertyList::decode(segment(&segments, 2)?)?,
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

    pub fn space(&self) -> &Dataspace {
        &self.meta.space
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

    fn target<'a>(&'a self, field: &'a [u8]) -> RecordTarget<'a> {
        RecordTarget {
            store: self.node.store(),
            handle: self.node.handle(),
            key: RAW_DATA,
            field,
        }
    }

    fn file_layout<'a>(&'a self, selection: &'a Selection) -> ElementLayout<'a> {
        ElementLayout {
            ty: &self.meta.datatype,
            space: &self.meta.space,
            selection,
        }
    }

    /// Read the elements selected by `file_selection` into `buf`, laid out
    /// as `mem` describes and converted to its type.
    pub fn read(
        &self,
        mem: ElementLayout<'_>,
        file_selection: &Selection,
        buf: &mut [u8],
    ) -> VolResult<()> {
        let opts = self.node.container().config().transfer_options();
        read_fixed(
            &self.target(RAW_FIELD),
            self.file_layout(file_selection),
            mem,
            buf,
            &opts,
        )?;
        trace!(oid = %self.id(), "dataset read");
        Ok(())
    }

    /// Write the elements of `buf` selected by `mem` to the elements
    /// selected by `file_selection`.
    pub fn write(
        &self,
        mem: ElementLayout<'_>,
        file_selection: &Selection,
        buf: &[u8],
    ) -> VolResult<()> {
        self.node.container().require_writable("write dataset")?;
        let opts = self.node.container().config().transfer_options();
        write_fixed(
            &self.target(RAW_FIELD),
            self.file_layout(file_selection),
            mem,
            buf,
            &opts,
        )?;
        trace!(oid = %self.id(), "dataset written");
        Ok(())
    }

    /// Read variable-length elements, one per selected point in row-major
    /// order. `None` is a null string.
    pub fn read_vlen(&self, file_selection: &Selection) -> VolResult<Vec<Option<Vec<u8>>>> {
        let kind = VlKind::of(&self.meta.datatype)?;
        let indices = file_selection.offsets(&self.meta.space)?;
        Ok(read_vlen(&self.target(RAW_VLEN_PREFIX), kind, &indices)?)
    }

    /// Write variable-length elements, one per selected point in row-major
    /// order. `None` removes the stored element.
    pub fn write_vlen(
        &self,
        file_selection: &Selection,
        elements: &[Option<&[u8]>],
    ) -> VolResult<()> {
        self.node.container().require_writable("write dataset")?;
        let kind = VlKind::of(&self.meta.datatype)?;
        let indices = file_selection.offsets(&self.meta.space)?;
        write_vlen(&self.target(RAW_VLEN_PREFIX), kind, &indices, elements)?;
        Ok(())
    }
}
