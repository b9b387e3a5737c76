use crate::datatype::{ByteOrder, Datatype};
use crate::error::{IoError, IoResult};

/// Whether converting `src` elements into `dst` needs the destination's
/// current contents as a background.
///
/// `dst` is always the type being written into: the memory type on read, the
/// file type on write. A compound destination needs a background when one of
/// its members has no same-named source member, when its members leave
/// bytes uncovered, or when a matched member needs one itself.
pub fn needs_background(src: &Datatype, dst: &Datatype) -> IoResult<bool> {
    match (src, dst) {
        (Datatype::Reference, _) | (_, Datatype::Reference) => {
            Err(IoError::Unsupported("conversion of reference types".into()))
        }
        (s, d) if s.is_variable_len() || d.is_variable_len() => Err(IoError::Unsupported(
            "conversion of variable-length types".into(),
        )),
        (
            Datatype::Compound {
                members: src_members,
                ..
            },
            Datatype::Compound {
                size,
                members: dst_members,
            },
        ) => {
            let mut covered = 0usize;
            for member in dst_members {
                let Some(src_member) = src_members.iter().find(|m| m.name == member.name) else {
                    return Ok(true);
                };
                if needs_background(&src_member.ty, &member.ty)? {
                    return Ok(true);
                }
                covered += member.ty.size();
            }
            Ok(covered < *size)
        }
        (Datatype::Array { base: sb, .. }, Datatype::Array { base: db, .. }) => {
            needs_background(sb, db)
        }
        _ => Ok(false),
    }
}

/// Convert `nelem` packed `src` elements in `buf` to packed `dst` elements,
/// in place.
///
/// `buf` must hold `nelem * max(src.size(), dst.size())` bytes. When
/// `background` is given it holds `nelem` packed `dst` elements that seed
/// each output element before conversion, so destination bytes the source
/// does not cover keep their previous value.
pub fn convert(
    src: &Datatype,
    dst: &Datatype,
    buf: &mut [u8],
    nelem: usize,
    background: Option<&[u8]>,
) -> IoResult<()> {
    src.validate()?;
    dst.validate()?;
    let (ss, ds) = (src.size(), dst.size());
    let needed = nelem * ss.max(ds);
    if buf.len() < needed {
        return Err(IoError::BufferTooSmall {
            needed,
            actual: buf.len(),
        });
    }
    if let Some(bkg) = background {
        if bkg.len() < nelem * ds {
            return Err(IoError::BufferTooSmall {
                needed: nelem * ds,
                actual: bkg.len(),
            });
        }
    }
    if src == dst {
        return Ok(());
    }

    let mut elem_in = vec![0u8; ss];
    let mut elem_out = vec![0u8; ds];
    let mut step = |i: usize| -> IoResult<()> {
        elem_in.copy_from_slice(&buf[i * ss..(i + 1) * ss]);
        match background {
            Some(bkg) => elem_out.copy_from_slice(&bkg[i * ds..(i + 1) * ds]),
            None => elem_out.fill(0),
        }
        convert_element(src, dst, &elem_in, &mut elem_out)?;
        buf[i * ds..(i + 1) * ds].copy_from_slice(&elem_out);
        Ok(())
    };
    // Growing elements are written back to front so unread source elements
    // are never overwritten.
    if ds > ss {
        (0..nelem).rev().try_for_each(&mut step)
    } else {
        (0..nelem).try_for_each(&mut step)
    }
}

/// Convert a whole packed buffer into a newly allocated one.
pub fn convert_to_vec(
    src: &Datatype,
    dst: &Datatype,
    data: &[u8],
    nelem: usize,
    background: Option<&[u8]>,
) -> IoResult<Vec<u8>> {
    let mut buf = vec![0u8; nelem * src.size().max(dst.size())];
    let have = data.len().min(nelem * src.size());
    buf[..have].copy_from_slice(&data[..have]);
    convert(src, dst, &mut buf, nelem, background)?;
    buf.truncate(nelem * dst.size());
    Ok(buf)
}

fn unsupported(src: &Datatype, dst: &Datatype) -> IoError {
    IoError::Unsupported(format!("conversion from {src} to {dst}"))
}

fn convert_element(src: &Datatype, dst: &Datatype, input: &[u8], out: &mut [u8]) -> IoResult<()> {
    if src == dst {
        out.copy_from_slice(input);
        return Ok(());
    }
    match (src, dst) {
        (
            Datatype::Integer {
                signed: s_signed,
                order: s_order,
                ..
            },
            Datatype::Integer {
                signed, order, ..
            },
        ) => {
            let v = read_int(input, *s_signed, *s_order);
            write_int(v, out, *signed, *order);
        }
        (Datatype::Float { order: s_order, .. }, Datatype::Float { order, .. }) => {
            write_float(read_float(input, *s_order), out, *order);
        }
        (
            Datatype::Integer {
                signed: s_signed,
                order: s_order,
                ..
            },
            Datatype::Float { order, .. },
        ) => {
            let v = read_int(input, *s_signed, *s_order);
            write_float(v as f64, out, *order);
        }
        (
            Datatype::Float { order: s_order, .. },
            Datatype::Integer {
                signed, order, ..
            },
        ) => {
            // Float-to-int casts saturate and map NaN to zero.
            let v = read_float(input, *s_order) as i128;
            write_int(v, out, *signed, *order);
        }
        (Datatype::FixedString { .. }, Datatype::FixedString { .. }) => {
            let n = input.len().min(out.len());
            out[..n].copy_from_slice(&input[..n]);
            out[n..].fill(0);
        }
        (Datatype::Opaque { size: ss, tag: st }, Datatype::Opaque { size, tag })
            if ss == size && st == tag =>
        {
            out.copy_from_slice(input);
        }
        (
            Datatype::Compound {
                members: src_members,
                ..
            },
            Datatype::Compound {
                members: dst_members,
                ..
            },
        ) => {
            for member in dst_members {
                let Some(s) = src_members.iter().find(|m| m.name == member.name) else {
                    continue;
                };
                convert_element(
                    &s.ty,
                    &member.ty,
                    &input[s.offset..s.offset + s.ty.size()],
                    &mut out[member.offset..member.offset + member.ty.size()],
                )?;
            }
        }
        (
            Datatype::Array {
                dims: s_dims,
                base: s_base,
            },
            Datatype::Array { dims, base },
        ) => {
            let n: u64 = dims.iter().product();
            if s_dims.iter().product::<u64>() != n {
                return Err(unsupported(src, dst));
            }
            let (sb, db) = (s_base.size(), base.size());
            for i in 0..n as usize {
                convert_element(
                    s_base,
                    base,
                    &input[i * sb..(i + 1) * sb],
                    &mut out[i * db..(i + 1) * db],
                )?;
            }
        }
        _ => return Err(unsupported(src, dst)),
    }
    Ok(())
}

fn read_int(bytes: &[u8], signed: bool, order: ByteOrder) -> i128 {
    let mut raw = [0u8; 16];
    let n = bytes.len();
    match order {
        ByteOrder::Little => raw[..n].copy_from_slice(bytes),
        ByteOrder::Big => {
            for (i, b) in bytes.iter().rev().enumerate() {
                raw[i] = *b;
            }
        }
    }
    let negative = signed && raw[n - 1] & 0x80 != 0;
    if negative {
        raw[n..].fill(0xff);
    }
    i128::from_le_bytes(raw)
}

fn write_int(v: i128, out: &mut [u8], signed: bool, order: ByteOrder) {
    let bits = out.len() as u32 * 8;
    let (min, max) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    let raw = v.clamp(min, max).to_le_bytes();
    let n = out.len();
    match order {
        ByteOrder::Little => out.copy_from_slice(&raw[..n]),
        ByteOrder::Big => {
            for (i, b) in raw[..n].iter().rev().enumerate() {
                out[i] = *b;
            }
        }
    }
}

fn ordered<const N: usize>(bytes: &[u8], order: ByteOrder) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(bytes);
    if order == ByteOrder::Big {
        raw.reverse();
    }
    raw
}

fn read_float(bytes: &[u8], order: ByteOrder) -> f64 {
    match bytes.len() {
        4 => f64::from(f32::from_le_bytes(ordered::<4>(bytes, order))),
        _ => f64::from_le_bytes(ordered::<8>(bytes, order)),
    }
}

fn write_float(v: f64, out: &mut [u8], order: ByteOrder) {
    let mut raw = match out.len() {
        4 => (v as f32).to_le_bytes().to_vec(),
        _ => v.to_le_bytes().to_vec(),
    };
    if order == ByteOrder::Big {
        raw.reverse();
    }
    out.copy_from_slice(&raw);
}
