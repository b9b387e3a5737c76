use std::ops::Range;

use shardns_store::Extent;
use tracing::trace;

use crate::error::IoResult;
use crate::selection::{Dataspace, Selection};

/// Runs pulled from a selection per batch.
pub const DEFAULT_SELECTION_BATCH: usize = 128;

/// Unit of the offsets and lengths produced by [`to_extents`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtentUnits {
    /// Scaled by the element size.
    Bytes,
    /// One unit per element; the record size carries the element size.
    Elements,
}

/// Translate a selection into store extents.
///
/// Runs are pulled from the selection `batch` at a time and the output grows
/// by doubling.
pub fn to_extents(
    selection: &Selection,
    space: &Dataspace,
    elem_size: u64,
    units: ExtentUnits,
    batch: usize,
) -> IoResult<Vec<Extent>> {
    let scale = match units {
        ExtentUnits::Bytes => elem_size,
        ExtentUnits::Elements => 1,
    };
    let batch = batch.max(1);
    let mut runs = selection.runs(space)?;
    let mut out: Vec<Extent> = Vec::with_capacity(batch);
    let mut batches = 0usize;
    loop {
        let before = out.len();
        for (offset, len) in runs.by_ref().take(batch) {
            if out.len() == out.capacity() {
                out.reserve_exact(out.capacity());
            }
            out.push(Extent::new(offset * scale, len * scale));
        }
        batches += 1;
        if out.len() - before < batch {
            break;
        }
    }
    trace!(extents = out.len(), batches, "selection translated");
    Ok(out)
}

/// Byte ranges of a memory buffer covered by a selection, in selection order.
pub fn byte_ranges(
    selection: &Selection,
    space: &Dataspace,
    elem_size: usize,
    batch: usize,
) -> IoResult<Vec<Range<usize>>> {
    Ok(
        to_extents(selection, space, elem_size as u64, ExtentUnits::Bytes, batch)?
            .into_iter()
            .map(|e| e.offset as usize..e.end() as usize)
            .collect(),
    )
}
