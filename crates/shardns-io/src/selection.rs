use serde::{Deserialize, Serialize};

use crate::error::{IoError, IoResult};

/// Shape of a dataset or attribute: current extent per dimension.
///
/// A rank-0 dataspace is a scalar holding exactly one element.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dataspace {
    pub dims: Vec<u64>,
}

impl Dataspace {
    pub fn new(dims: impl Into<Vec<u64>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements.
    pub fn npoints(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Serialize for storage.
    pub fn encode(&self) -> IoResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| IoError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> IoResult<Self> {
        bincode::deserialize(bytes).map_err(|e| IoError::Codec(e.to_string()))
    }

    /// Row-major element pitch of each dimension.
    fn pitches(&self) -> Vec<u64> {
        let mut pitches = vec![1u64; self.dims.len()];
        for d in (0..self.dims.len().saturating_sub(1)).rev() {
            pitches[d] = pitches[d + 1] * self.dims[d + 1];
        }
        pitches
    }
}

/// One dimension of a hyperslab: `count` blocks of `block` elements, the
/// first at `start`, each `stride` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HyperslabDim {
    pub start: u64,
    pub stride: u64,
    pub count: u64,
    pub block: u64,
}

impl HyperslabDim {
    pub const fn new(start: u64, stride: u64, count: u64, block: u64) -> Self {
        Self {
            start,
            stride,
            count,
            block,
        }
    }

    /// A single contiguous run of `len` elements at `start`.
    pub const fn range(start: u64, len: u64) -> Self {
        Self::new(start, len, 1, len)
    }

    fn npoints(&self) -> u64 {
        self.count * self.block
    }

    /// Coordinate of the `pos`-th selected element in this dimension.
    fn coord(&self, pos: u64) -> u64 {
        self.start + (pos / self.block) * self.stride + pos % self.block
    }
}

/// Elements chosen from a [`Dataspace`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    All,
    None,
    /// Regular hyperslab, one entry per dimension.
    Hyperslab(Vec<HyperslabDim>),
    /// Explicit coordinates, visited in the order given.
    Points(Vec<Vec<u64>>),
}

impl Selection {
    /// Check the selection against `space`.
    pub fn validate(&self, space: &Dataspace) -> IoResult<()> {
        match self {
            Self::All | Self::None => Ok(()),
            Self::Hyperslab(dims) => {
                if dims.len() != space.rank() || dims.is_empty() {
                    return Err(IoError::InvalidSelection(format!(
                        "hyperslab of rank {} on dataspace of rank {}",
                        dims.len(),
                        space.rank()
                    )));
                }
                for (d, (slab, &extent)) in dims.iter().zip(&space.dims).enumerate() {
                    if slab.npoints() == 0 {
                        continue;
                    }
                    if slab.count > 1 && slab.stride < slab.block {
                        return Err(IoError::InvalidSelection(format!(
                            "dimension {d}: stride {} overlaps block {}",
                            slab.stride, slab.block
                        )));
                    }
                    let end = slab.coord(slab.npoints() - 1) + 1;
                    if end > extent {
                        return Err(IoError::InvalidSelection(format!(
                            "dimension {d}: selection ends at {end}, extent is {extent}"
                        )));
                    }
                }
                Ok(())
            }
            Self::Points(points) => {
                for point in points {
                    if point.len() != space.rank()
                        || point.iter().zip(&space.dims).any(|(&c, &e)| c >= e)
                    {
                        return Err(IoError::InvalidSelection(format!(
                            "point {point:?} outside dataspace {:?}",
                            space.dims
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Number of selected elements.
    pub fn npoints(&self, space: &Dataspace) -> u64 {
        match self {
            Self::All => space.npoints(),
            Self::None => 0,
            Self::Hyperslab(dims) => dims.iter().map(HyperslabDim::npoints).product(),
            Self::Points(points) => points.len() as u64,
        }
    }

    /// Iterate the selection as `(offset, length)` runs of linear element
    /// offsets in row-major order, adjacent runs merged.
    pub fn runs<'a>(&'a self, space: &'a Dataspace) -> IoResult<Runs<'a>> {
        self.validate(space)?;
        let raw = match self {
            Self::All => {
                let n = space.npoints();
                RawRuns::Single((n > 0).then_some((0, n)))
            }
            Self::None => RawRuns::Single(None),
            Self::Hyperslab(dims) => RawRuns::Slab(SlabRuns::new(dims, space)),
            Self::Points(points) => RawRuns::Points {
                points: points.iter(),
                pitches: space.pitches(),
            },
        };
        Ok(Runs { raw, pending: None })
    }

    /// Linear offsets of every selected element, in selection order.
    pub fn offsets(&self, space: &Dataspace) -> IoResult<Vec<u64>> {
        let mut out = Vec::with_capacity(self.npoints(space) as usize);
        for (offset, len) in self.runs(space)? {
            out.extend(offset..offset + len);
        }
        Ok(out)
    }
}

/// Run iterator over a [`Selection`].
pub struct Runs<'a> {
    raw: RawRuns<'a>,
    pending: Option<(u64, u64)>,
}

impl Iterator for Runs<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        loop {
            match self.raw.next() {
                Some((offset, len)) => match self.pending {
                    Some((p_off, p_len)) if p_off + p_len == offset => {
                        self.pending = Some((p_off, p_len + len));
                    }
                    Some(done) => {
                        self.pending = Some((offset, len));
                        return Some(done);
                    }
                    None => self.pending = Some((offset, len)),
                },
                None => return self.pending.take(),
            }
        }
    }
}

enum RawRuns<'a> {
    Single(Option<(u64, u64)>),
    Slab(SlabRuns<'a>),
    Points {
        points: std::slice::Iter<'a, Vec<u64>>,
        pitches: Vec<u64>,
    },
}

impl RawRuns<'_> {
    fn next(&mut self) -> Option<(u64, u64)> {
        match self {
            Self::Single(run) => run.take(),
            Self::Slab(slab) => slab.next(),
            Self::Points { points, pitches } => {
                let point = points.next()?;
                let offset = point.iter().zip(pitches.iter()).map(|(c, p)| c * p).sum();
                Some((offset, 1))
            }
        }
    }
}

/// Unmerged runs of a hyperslab: one per block of the fastest dimension.
struct SlabRuns<'a> {
    dims: &'a [HyperslabDim],
    pitches: Vec<u64>,
    /// Position within each outer dimension, and block index in the last.
    cursor: Vec<u64>,
    done: bool,
}

impl<'a> SlabRuns<'a> {
    fn new(dims: &'a [HyperslabDim], space: &Dataspace) -> Self {
        Self {
            dims,
            pitches: space.pitches(),
            cursor: vec![0; dims.len()],
            done: dims.iter().any(|d| d.npoints() == 0),
        }
    }

    fn next(&mut self) -> Option<(u64, u64)> {
        if self.done {
            return None;
        }
        let last = self.dims.len() - 1;
        let fast = &self.dims[last];
        let mut offset = (fast.start + self.cursor[last] * fast.stride) * self.pitches[last];
        for d in 0..last {
            offset += self.dims[d].coord(self.cursor[d]) * self.pitches[d];
        }
        let run = (offset, fast.block);

        // Advance: last dimension steps by block, outer ones by element.
        let mut d = last;
        loop {
            self.cursor[d] += 1;
            let limit = if d == last {
                self.dims[d].count
            } else {
                self.dims[d].npoints()
            };
            if self.cursor[d] < limit {
                break;
            }
            self.cursor[d] = 0;
            if d == 0 {
                self.done = true;
                break;
            }
            d -= 1;
        }
        Some(run)
    }
}
