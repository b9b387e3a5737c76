use std::ops::Range;

use shardns_store::{FieldIo, ObjectHandle, RecordStore};
use tracing::{debug, trace};

use crate::convert::{convert, needs_background};
use crate::datatype::Datatype;
use crate::error::{IoError, IoResult};
use crate::extent::{byte_ranges, to_extents, ExtentUnits, DEFAULT_SELECTION_BATCH};
use crate::selection::{Dataspace, Selection};

/// Where element data lives: one field of one record of an open object.
#[derive(Clone, Copy)]
pub struct RecordTarget<'a> {
    pub store: &'a dyn RecordStore,
    pub handle: ObjectHandle,
    pub key: &'a [u8],
    pub field: &'a [u8],
}

/// Type, shape and selection on one side of a transfer.
#[derive(Clone, Copy, Debug)]
pub struct ElementLayout<'a> {
    pub ty: &'a Datatype,
    pub space: &'a Dataspace,
    pub selection: &'a Selection,
}

#[derive(Clone, Copy, Debug)]
pub struct TransferOptions {
    /// Runs pulled from a selection per batch.
    pub batch: usize,
    /// Convert in the caller's buffer when it is contiguous and large enough.
    pub reuse_caller_buffers: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch: DEFAULT_SELECTION_BATCH,
            reuse_caller_buffers: true,
        }
    }
}

struct Plan {
    nelem: usize,
    file_size: usize,
    mem_size: usize,
    field: FieldIo,
    mem_ranges: Vec<Range<usize>>,
    convert: bool,
}

impl Plan {
    fn new(
        file: &ElementLayout<'_>,
        mem: &ElementLayout<'_>,
        field: &[u8],
        buf_len: usize,
        opts: &TransferOptions,
    ) -> IoResult<Self> {
        if file.ty.contains_variable_len() || mem.ty.contains_variable_len() {
            return Err(IoError::Unsupported(
                "variable-length elements on the fixed-size path".into(),
            ));
        }
        let file_n = file.selection.npoints(file.space);
        let mem_n = mem.selection.npoints(mem.space);
        if file_n != mem_n {
            return Err(IoError::SelectionMismatch {
                file: file_n,
                mem: mem_n,
            });
        }
        let (file_size, mem_size) = (file.ty.size(), mem.ty.size());
        let extents = to_extents(
            file.selection,
            file.space,
            file_size as u64,
            ExtentUnits::Elements,
            opts.batch,
        )?;
        let mem_ranges = byte_ranges(mem.selection, mem.space, mem_size, opts.batch)?;
        let needed = mem_ranges.iter().map(|r| r.end).max().unwrap_or(0);
        if needed > buf_len {
            return Err(IoError::BufferTooSmall {
                needed,
                actual: buf_len,
            });
        }
        Ok(Self {
            nelem: file_n as usize,
            file_size,
            mem_size,
            field: FieldIo::array(field, file_size as u64, extents),
            mem_ranges,
            convert: file.ty != mem.ty,
        })
    }

    fn contiguous(&self) -> Option<Range<usize>> {
        match self.mem_ranges.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }
}

fn fetch_into(target: &RecordTarget<'_>, field: &FieldIo, sink: &mut [u8]) -> IoResult<()> {
    // Records never written read back as zeros.
    sink.fill(0);
    let mut fields = [field.clone()];
    target
        .store
        .fetch(target.handle, target.key, &mut fields, Some(&mut [sink]))?;
    Ok(())
}

fn gather(buf: &[u8], ranges: &[Range<usize>], out: &mut [u8]) {
    let mut pos = 0;
    for range in ranges {
        out[pos..pos + range.len()].copy_from_slice(&buf[range.clone()]);
        pos += range.len();
    }
}

fn scatter(packed: &[u8], ranges: &[Range<usize>], buf: &mut [u8]) {
    let mut pos = 0;
    for range in ranges {
        buf[range.clone()].copy_from_slice(&packed[pos..pos + range.len()]);
        pos += range.len();
    }
}

/// Read selected fixed-size elements from the store into `buf`.
///
/// File elements are fetched as an array field with record size equal to the
/// file element size, converted to the memory type if the types differ, and
/// scattered into `buf` according to the memory selection.
pub fn read_fixed(
    target: &RecordTarget<'_>,
    file: ElementLayout<'_>,
    mem: ElementLayout<'_>,
    buf: &mut [u8],
    opts: &TransferOptions,
) -> IoResult<()> {
    let plan = Plan::new(&file, &mem, target.field, buf.len(), opts)?;
    if plan.nelem == 0 {
        return Ok(());
    }
    let file_bytes = plan.nelem * plan.file_size;

    if !plan.convert {
        if let Some(range) = plan.contiguous() {
            trace!(bytes = file_bytes, "reading directly into caller buffer");
            return fetch_into(target, &plan.field, &mut buf[range]);
        }
        let mut packed = vec![0u8; file_bytes];
        fetch_into(target, &plan.field, &mut packed)?;
        scatter(&packed, &plan.mem_ranges, buf);
        return Ok(());
    }

    // Reading converts file elements into the memory type.
    let background = if needs_background(file.ty, mem.ty)? {
        let mut bkg = vec![0u8; plan.nelem * plan.mem_size];
        gather(buf, &plan.mem_ranges, &mut bkg);
        Some(bkg)
    } else {
        None
    };

    if let Some(range) = plan.contiguous() {
        if opts.reuse_caller_buffers && plan.mem_size >= plan.file_size {
            debug!(nelem = plan.nelem, "converting in caller buffer");
            let region = &mut buf[range];
            fetch_into(target, &plan.field, &mut region[..file_bytes])?;
            return convert(file.ty, mem.ty, region, plan.nelem, background.as_deref());
        }
    }

    let mut tconv = vec![0u8; plan.nelem * plan.file_size.max(plan.mem_size)];
    fetch_into(target, &plan.field, &mut tconv[..file_bytes])?;
    convert(file.ty, mem.ty, &mut tconv, plan.nelem, background.as_deref())?;
    scatter(&tconv[..plan.nelem * plan.mem_size], &plan.mem_ranges, buf);
    Ok(())
}

/// Write selected fixed-size elements from `buf` to the store.
///
/// Memory elements are gathered according to the memory selection, converted
/// to the file type if the types differ (reading the current file elements
/// as background when the conversion needs it), and written as an array
/// field.
pub fn write_fixed(
    target: &RecordTarget<'_>,
    file: ElementLayout<'_>,
    mem: ElementLayout<'_>,
    buf: &[u8],
    opts: &TransferOptions,
) -> IoResult<()> {
    let plan = Plan::new(&file, &mem, target.field, buf.len(), opts)?;
    if plan.nelem == 0 {
        return Ok(());
    }
    let file_bytes = plan.nelem * plan.file_size;

    if !plan.convert {
        if let Some(range) = plan.contiguous() {
            target
                .store
                .update(target.handle, target.key, &[plan.field], &[&buf[range]])?;
            return Ok(());
        }
    }

    let mut tconv = vec![0u8; plan.nelem * plan.file_size.max(plan.mem_size)];
    gather(buf, &plan.mem_ranges, &mut tconv);
    if plan.convert {
        // Writing converts memory elements into the file type.
        let background = if needs_background(mem.ty, file.ty)? {
            let mut bkg = vec![0u8; file_bytes];
            fetch_into(target, &plan.field, &mut bkg)?;
            Some(bkg)
        } else {
            None
        };
        convert(mem.ty, file.ty, &mut tconv, plan.nelem, background.as_deref())?;
    }
    target
        .store
        .update(target.handle, target.key, &[plan.field], &[&tconv[..file_bytes]])?;
    Ok(())
}

/// Read `nelem` elements stored whole as one single-value field.
pub fn read_whole(
    target: &RecordTarget<'_>,
    file_ty: &Datatype,
    mem_ty: &Datatype,
    nelem: usize,
    buf: &mut [u8],
) -> IoResult<()> {
    let (fs, ms) = (file_ty.size(), mem_ty.size());
    if buf.len() < nelem * ms {
        return Err(IoError::BufferTooSmall {
            needed: nelem * ms,
            actual: buf.len(),
        });
    }
    let file_bytes = nelem * fs;
    let mut tconv = vec![0u8; nelem * fs.max(ms)];
    let mut fields = [FieldIo::single(target.field, file_bytes as u64)];
    target.store.fetch(
        target.handle,
        target.key,
        &mut fields,
        Some(&mut [&mut tconv[..file_bytes]]),
    )?;
    let stored = fields[0].record_size;
    if stored != 0 && stored != file_bytes as u64 {
        return Err(IoError::RecordSize {
            expected: file_bytes as u64,
            actual: stored,
        });
    }
    let background = if file_ty != mem_ty && needs_background(file_ty, mem_ty)? {
        Some(buf[..nelem * ms].to_vec())
    } else {
        None
    };
    convert(file_ty, mem_ty, &mut tconv, nelem, background.as_deref())?;
    buf[..nelem * ms].copy_from_slice(&tconv[..nelem * ms]);
    Ok(())
}

/// Write `nelem` elements whole as one single-value field.
pub fn write_whole(
    target: &RecordTarget<'_>,
    file_ty: &Datatype,
    mem_ty: &Datatype,
    nelem: usize,
    buf: &[u8],
) -> IoResult<()> {
    let (fs, ms) = (file_ty.size(), mem_ty.size());
    if buf.len() < nelem * ms {
        return Err(IoError::BufferTooSmall {
            needed: nelem * ms,
            actual: buf.len(),
        });
    }
    let file_bytes = nelem * fs;
    if file_ty == mem_ty {
        let fields = [FieldIo::single(target.field, file_bytes as u64)];
        target
            .store
            .update(target.handle, target.key, &fields, &[&buf[..file_bytes]])?;
        return Ok(());
    }
    let background = if needs_background(mem_ty, file_ty)? {
        let mut bkg = vec![0u8; file_bytes];
        let mut fields = [FieldIo::single(target.field, file_bytes as u64)];
        target
            .store
            .fetch(target.handle, target.key, &mut fields, Some(&mut [&mut bkg[..]]))?;
        Some(bkg)
    } else {
        None
    };
    let mut tconv = vec![0u8; nelem * fs.max(ms)];
    tconv[..nelem * ms].copy_from_slice(&buf[..nelem * ms]);
    convert(mem_ty, file_ty, &mut tconv, nelem, background.as_deref())?;
    let fields = [FieldIo::single(target.field, file_bytes as u64)];
    target
        .store
        .update(target.handle, target.key, &fields, &[&tconv[..file_bytes]])?;
    Ok(())
}
