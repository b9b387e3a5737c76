use tracing::trace;

use crate::error::StoreResult;
use crate::record::{FieldIo, ObjectHandle, RECORD_SIZE_ANY};
use crate::traits::RecordStore;

/// Read a single-value field of unknown size.
///
/// The first fetch goes speculatively into `scratch`. If the stored value
/// fits, it is returned from there; otherwise a second fetch reads it into a
/// buffer of exactly the reported size. Returns `None` if the field is
/// absent.
pub fn fetch_single(
    store: &dyn RecordStore,
    handle: ObjectHandle,
    key: &[u8],
    field: &[u8],
    scratch: &mut [u8],
) -> StoreResult<Option<Vec<u8>>> {
    let mut fields = [FieldIo::single(field, RECORD_SIZE_ANY)];
    store.fetch(handle, key, &mut fields, Some(&mut [&mut scratch[..]]))?;
    let size = fields[0].record_size as usize;
    if size == 0 {
        return Ok(None);
    }
    if size <= scratch.len() {
        return Ok(Some(scratch[..size].to_vec()));
    }

    trace!(size, scratch = scratch.len(), "value outgrew scratch buffer, refetching");
    let mut value = vec![0u8; size];
    let mut fields = [FieldIo::single(field, size as u64)];
    store.fetch(handle, key, &mut fields, Some(&mut [&mut value[..]]))?;
    value.truncate(fields[0].record_size as usize);
    Ok(Some(value))
}
