use shardns_types::ObjectId;

use crate::error::{CollectiveError, CollectiveResult};

/// Size of the fixed prefix every member receives in the first broadcast.
pub const STATIC_BUF_SIZE: usize = 1024;

/// Width of one segment length in the envelope header.
const LEN_WIDTH: usize = 8;

/// Metadata for one node, as broadcast from the leader to its followers.
///
/// Wire layout: `[ObjectId 16][N x u64 LE segment lengths][segments...]`.
/// The segment count is not transmitted; both sides know it from the
/// operation. A zero first length marks a leader failure, so the first
/// segment of every real envelope is non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub id: ObjectId,
    pub segments: Vec<Vec<u8>>,
}

impl Envelope {
    pub fn new(id: ObjectId, segments: Vec<Vec<u8>>) -> Self {
        Self { id, segments }
    }

    /// Bytes taken by the id and length table for `nsegments` segments.
    pub const fn header_len(nsegments: usize) -> usize {
        ObjectId::ENCODED_LEN + nsegments * LEN_WIDTH
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        Self::header_len(self.segments.len()) + self.segments.iter().map(Vec::len).sum::<usize>()
    }

    /// Encode to the wire layout.
    pub fn encode(&self) -> CollectiveResult<Vec<u8>> {
        match self.segments.first() {
            None => return Err(CollectiveError::Malformed("envelope has no segments".into())),
            Some(first) if first.is_empty() => return Err(CollectiveError::EmptyFirstSegment),
            Some(_) => {}
        }
        if Self::header_len(self.segments.len()) > STATIC_BUF_SIZE {
            return Err(CollectiveError::Malformed(format!(
                "{} segments do not fit the fixed prefix",
                self.segments.len()
            )));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.id.to_bytes());
        for segment in &self.segments {
            buf.extend_from_slice(&(segment.len() as u64).to_le_bytes());
        }
        for segment in &self.segments {
            buf.extend_from_slice(segment);
        }
        Ok(buf)
    }

    /// Read the header of an envelope with `nsegments` segments.
    ///
    /// Returns the id and segment lengths. A zero first length yields
    /// [`CollectiveError::LeaderFailed`] without looking at anything else.
    pub fn decode_header(data: &[u8], nsegments: usize) -> CollectiveResult<(ObjectId, Vec<usize>)> {
        let header = Self::header_len(nsegments);
        if nsegments == 0 || data.len() < header {
            return Err(CollectiveError::Malformed(format!(
                "need {header} header bytes, have {}",
                data.len()
            )));
        }
        let lens: Vec<usize> = data[ObjectId::ENCODED_LEN..header]
            .chunks_exact(LEN_WIDTH)
            .map(|c| {
                let mut raw = [0u8; LEN_WIDTH];
                raw.copy_from_slice(c);
                u64::from_le_bytes(raw) as usize
            })
            .collect();
        if lens[0] == 0 {
            return Err(CollectiveError::LeaderFailed);
        }
        let id = ObjectId::from_bytes(&data[..ObjectId::ENCODED_LEN])
            .map_err(|e| CollectiveError::Malformed(e.to_string()))?;
        Ok((id, lens))
    }

    /// Total encoded size announced by a header's segment lengths.
    pub fn total_len(lens: &[usize]) -> CollectiveResult<usize> {
        lens.iter()
            .try_fold(Self::header_len(lens.len()), |acc, &len| acc.checked_add(len))
            .ok_or_else(|| CollectiveError::Malformed("segment lengths overflow".into()))
    }

    /// Decode a complete envelope with `nsegments` segments.
    pub fn decode(data: &[u8], nsegments: usize) -> CollectiveResult<Self> {
        let (id, lens) = Self::decode_header(data, nsegments)?;
        let total = Self::total_len(&lens)?;
        if data.len() < total {
            return Err(CollectiveError::Malformed(format!(
                "truncated: have {}, need {total}",
                data.len()
            )));
        }
        let mut pos = Self::header_len(nsegments);
        let segments = lens
            .iter()
            .map(|&len| {
                let segment = data[pos..pos + len].to_vec();
                pos += len;
                segment
            })
            .collect();
        Ok(Self { id, segments })
    }
}
