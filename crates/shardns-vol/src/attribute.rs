use std::sync::Arc;

use shardns_collective::{exchange, Envelope};
use shardns_io::{
    read_vlen, read_whole, write_vlen, write_whole, Dataspace, Datatype, RecordTarget, VlKind,
};
use shardns_store::{FieldIo, RECORD_SIZE_ANY};
use shardns_types::ObjectId;
use tracing::debug;

use crate::dataset::Dataset;
use crate::error::{StoreContext, VolError, VolResult};
use crate::group::Group;
use crate::keys::{attr_data, attr_space, attr_type, ATTRIBUTES};
use crate::map::Map;
use crate::named_type::NamedType;
use crate::node::{read_fields, write_fields, Node};
use crate::object::segment;

#[derive(Debug)]
struct AttributeMeta {
    name: String,
    datatype: Datatype,
    space: Dataspace,
    data_field: Vec<u8>,
}

/// A small named value attached to a node.
///
/// Attributes live in one record of the node holding them; the attribute
/// keeps a live handle to that node until it is closed.
#[derive(Debug)]
pub struct Attribute {
    node: Node,
    meta: Arc<AttributeMeta>,
}

/// Nodes that can carry attributes.
pub trait HasAttributes {
    /// The node the attributes are stored on.
    fn attribute_holder(&self) -> &Node;

    /// Create attribute `name`. Collective.
    fn create_attribute(
        &self,
        name: &str,
        datatype: &Datatype,
        space: &Dataspace,
    ) -> VolResult<Attribute> {
        Attribute::create(self.attribute_holder(), name, datatype, space)
    }

    /// Open attribute `name`. Collective when metadata is.
    fn open_attribute(&self, name: &str) -> VolResult<Attribute> {
        Attribute::open(self.attribute_holder(), name)
    }

    /// Returns `true` if attribute `name` exists. Local.
    fn attribute_exists(&self, name: &str) -> VolResult<bool> {
        let holder = self.attribute_holder();
        let mut fields = [FieldIo::single(attr_type(name), RECORD_SIZE_ANY)];
        holder
            .store()
            .fetch(holder.handle(), ATTRIBUTES, &mut fields, None)
            .context("can't probe attribute")?;
        Ok(fields[0].record_size > 0)
    }
}

macro_rules! has_attributes {
    ($($ty:ty),*) => {
        $(impl HasAttributes for $ty {
            fn attribute_holder(&self) -> &Node {
                self.node()
            }
        })*
    };
}

has_attributes!(Group, Dataset, NamedType, Map);

impl Attribute {
    fn create(holder: &Node, name: &str, datatype: &Datatype, space: &Dataspace) -> VolResult<Self> {
        let container = holder.container();
        container.require_writable("create attribute")?;
        if name.is_empty() {
            return Err(VolError::Argument("attribute name is empty".into()));
        }
        datatype.validate()?;
        let segments = vec![datatype.encode()?, space.encode()?];
        let (type_field, space_field) = (attr_type(name), attr_space(name));

        exchange(container.comm(), true, segments.len(), || {
            let mut probe = [FieldIo::single(type_field.as_slice(), RECORD_SIZE_ANY)];
            holder
                .store()
                .fetch(holder.handle(), ATTRIBUTES, &mut probe, None)
                .context("can't probe attribute")?;
            if probe[0].record_size > 0 {
                return Err(VolError::Argument(format!("attribute \"{name}\" already exists")));
            }
            write_fields(
                holder.store(),
                holder.handle(),
                ATTRIBUTES,
                &[type_field.as_slice(), space_field.as_slice()],
                &segments,
            )?;
            debug!(oid = %holder.id(), attribute = name, "attribute created");
            Ok::<_, VolError>((Envelope::new(holder.id(), segments.clone()), ()))
        })?;
        Ok(Self::from_parts(
            holder.acquire(),
            name,
            datatype.clone(),
            space.clone(),
        ))
    }

    fn open(holder: &Node, name: &str) -> VolResult<Self> {
        let container = holder.container();
        let (type_field, space_field) = (attr_type(name), attr_space(name));
        let exchanged = exchange(
            container.comm(),
            container.config().collective_metadata,
            2,
            || {
                let segments = read_fields(
                    holder.store(),
                    holder.handle(),
                    ATTRIBUTES,
                    &[type_field.as_slice(), space_field.as_slice()],
                )
                .map_err(|e| match e {
                    VolError::NotFound(_) => VolError::NotFound(format!("attribute \"{name}\"")),
                    other => other,
                })?;
                Ok::<_, VolError>((Envelope::new(holder.id(), segments), ()))
            },
        )?;
        let segments = exchanged.envelope.segments;
        Ok(Self::from_parts(
            holder.acquire(),
            name,
            Datatype::decode(segment(&segments, 0)?)?,
            Dataspace::decode(segment(&segments, 1)?)?,
        ))
    }

    fn from_parts(node: Node, name: &str, datatype: Datatype, space: Dataspace) -> Self {
        Self {
            node,
            meta: Arc::new(AttributeMeta {
                name: name.to_owned(),
                datatype,
                space,
                data_field: attr_data(name),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Id of the node holding the attribute.
    pub fn holder_id(&self) -> ObjectId {
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

    pub fn acquire(&self) -> Self {
        Self {
            node: self.node.acquire(),
            meta: Arc::clone(&self.meta),
        }
    }

    pub fn close(self) -> VolResult<()> {
        self.node.close()
    }

    fn target(&self) -> RecordTarget<'_> {
        RecordTarget {
            store: self.node.store(),
            handle: self.node.handle(),
            key: ATTRIBUTES,
            field: &self.meta.data_field,
        }
    }

    fn nelem(&self) -> usize {
        self.meta.space.npoints() as usize
    }

    fn check_fixed(&self, mem_type: &Datatype) -> VolResult<()> {
        if self.meta.datatype.contains_variable_len() || mem_type.contains_variable_len() {
            return Err(VolError::Unsupported(
                "variable-length attribute data through the fixed-size path".into(),
            ));
        }
        Ok(())
    }

    /// Read the whole attribute into `buf` as elements of `mem_type`.
    pub fn read(&self, mem_type: &Datatype, buf: &mut [u8]) -> VolResult<()> {
        self.check_fixed(mem_type)?;
        read_whole(&self.target(), &self.meta.datatype, mem_type, self.nelem(), buf)?;
        Ok(())
    }

    /// Write the whole attribute from `buf`, elements of `mem_type`.
    pub fn write(&self, mem_type: &Datatype, buf: &[u8]) -> VolResult<()> {
        self.node.container().require_writable("write attribute")?;
        self.check_fixed(mem_type)?;
        write_whole(&self.target(), &self.meta.datatype, mem_type, self.nelem(), buf)?;
        Ok(())
    }

    /// Read every variable-length element, in row-major order.
    pub fn read_vlen(&self) -> VolResult<Vec<Option<Vec<u8>>>> {
        let kind = VlKind::of(&self.meta.datatype)?;
        let indices: Vec<u64> = (0..self.meta.space.npoints()).collect();
        Ok(read_vlen(&self.target(), kind, &indices)?)
    }

    /// Write every variable-length element, in row-major order.
    pub fn write_vlen(&self, elements: &[Option<&[u8]>]) -> VolResult<()> {
        self.node.container().require_writable("write attribute")?;
        let kind = VlKind::of(&self.meta.datatype)?;
        let indices: Vec<u64> = (0..self.meta.space.npoints()).collect();
        write_vlen(&self.target(), kind, &indices, elements)?;
        Ok(())
    }
}
