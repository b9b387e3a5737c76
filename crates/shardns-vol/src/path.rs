//! Path resolution and link traversal.
//!
//! A path is a `/`-separated list of link names. Absolute paths start at the
//! container root, relative ones at the group they are resolved against.
//! Every component but the last must lead to a group; the last one (the
//! leaf) is returned unresolved so the caller can create, open or link it.

use shardns_store::{fetch_single, FieldIo, KeyCursor};
use shardns_types::{NodeKind, ObjectId};
use tracing::trace;

use crate::error::{StoreContext, VolError, VolResult};
use crate::keys::{is_reserved, LINK};
use crate::link::LinkRecord;
use crate::node::Node;

/// Record keys listed per batch when enumerating links.
const LINK_LIST_BATCH: usize = 64;

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Last component of `path`, or `None` if the path names no link.
pub(crate) fn leaf_name(path: &str) -> Option<&str> {
    components(path).last()
}

/// Resolve every component of `path` but the last, starting at `start`.
///
/// Returns the group holding the leaf and the leaf name. The leaf is empty
/// when the path has no components, as in `"/"` or `"."`.
pub(crate) fn resolve(start: &Node, path: &str) -> VolResult<(Node, String)> {
    resolve_at(start, path, 0)
}

fn resolve_at(start: &Node, path: &str, depth: usize) -> VolResult<(Node, String)> {
    let mut current = if path.starts_with('/') {
        let container = start.container();
        container.open_node(container.root_id())?
    } else {
        start.acquire()
    };
    let parts: Vec<&str> = components(path).collect();
    let Some((leaf, intermediate)) = parts.split_last() else {
        return Ok((current, String::new()));
    };

    for &name in intermediate {
        let id = follow_link(&current, name, depth)?;
        if id.decode_kind()? != NodeKind::Group {
            return Err(VolError::Argument(format!(
                "\"{name}\" in \"{path}\" is not a group"
            )));
        }
        let next = current.container().open_node(id)?;
        let previous = std::mem::replace(&mut current, next);
        previous.close()?;
    }
    Ok((current, (*leaf).to_owned()))
}

/// Read the link `name` in `group`, if present.
///
/// The value is read speculatively into a buffer of the configured link
/// buffer size and fetched again only if it did not fit.
pub(crate) fn read_link(group: &Node, name: &str) -> VolResult<Option<LinkRecord>> {
    let mut scratch = vec![0u8; group.container().config().link_buffer_size];
    let value = fetch_single(group.store(), group.handle(), name.as_bytes(), LINK, &mut scratch)
        .context("can't read link")?;
    value.as_deref().map(LinkRecord::decode).transpose()
}

/// Returns `true` if `group` holds a link named `name`. Probes the size only.
pub(crate) fn link_exists(group: &Node, name: &str) -> VolResult<bool> {
    let mut fields = [FieldIo::single(LINK, shardns_store::RECORD_SIZE_ANY)];
    group
        .store()
        .fetch(group.handle(), name.as_bytes(), &mut fields, None)
        .context("can't probe link")?;
    Ok(fields[0].record_size > 0)
}

pub(crate) fn write_link(group: &Node, name: &str, link: &LinkRecord) -> VolResult<()> {
    let value = link.encode();
    group
        .store()
        .update(
            group.handle(),
            name.as_bytes(),
            &[FieldIo::single(LINK, value.len() as u64)],
            &[value.as_slice()],
        )
        .context("can't write link")
}

/// Follow the link `name` in `group` to the id it ultimately names.
///
/// Soft links are resolved again from the group holding them; `depth` is the
/// number of soft links already followed on the way here.
pub(crate) fn follow_link(group: &Node, name: &str, depth: usize) -> VolResult<ObjectId> {
    let link = read_link(group, name)?
        .ok_or_else(|| VolError::NotFound(format!("link \"{name}\"")))?;
    match link {
        LinkRecord::Hard(id) => Ok(id),
        LinkRecord::Soft(target) => {
            let depth = depth + 1;
            if let Some(max) = group.container().config().max_link_depth {
                if depth > max {
                    return Err(VolError::LinkDepthExceeded { depth: max });
                }
            }
            trace!(name, target = %target, depth, "following soft link");
            let (holder, leaf) = resolve_at(group, &target, depth)?;
            let id = if leaf.is_empty() {
                holder.id()
            } else {
                follow_link(&holder, &leaf, depth)?
            };
            holder.close()?;
            Ok(id)
        }
    }
}

/// Names of the links in `group`, in key order.
pub(crate) fn list_links(group: &Node) -> VolResult<Vec<String>> {
    let mut cursor = KeyCursor::new();
    let mut names = Vec::new();
    while !cursor.is_eof() {
        let keys = group
            .store()
            .list_keys(group.handle(), &mut cursor, LINK_LIST_BATCH)
            .context("can't list links")?;
        names.extend(
            keys.into_iter()
                .filter(|k| !is_reserved(k))
                .map(|k| String::from_utf8_lossy(&k).into_owned()),
        );
    }
    Ok(names)
}
