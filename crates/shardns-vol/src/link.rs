use shardns_types::ObjectId;

use crate::error::{VolError, VolResult};

const HARD_TAG: u8 = 0;
const SOFT_TAG: u8 = 1;

/// A named reference stored in a group.
///
/// Hard links hold the target's id; soft links hold a path that is resolved
/// again on every use, relative to the group holding the link unless it
/// starts with `/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRecord {
    Hard(ObjectId),
    Soft(String),
}

impl LinkRecord {
    /// `[0][id: 16 bytes]` or `[1][path bytes]`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Hard(id) => {
                let mut buf = Vec::with_capacity(1 + ObjectId::ENCODED_LEN);
                buf.push(HARD_TAG);
                buf.extend_from_slice(&id.to_bytes());
                buf
            }
            Self::Soft(path) => {
                let mut buf = Vec::with_capacity(1 + path.len());
                buf.push(SOFT_TAG);
                buf.extend_from_slice(path.as_bytes());
                buf
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> VolResult<Self> {
        match bytes.split_first() {
            Some((&HARD_TAG, rest)) => {
                if rest.len() != ObjectId::ENCODED_LEN {
                    return Err(VolError::Argument(format!(
                        "hard link holds {} bytes, expected {}",
                        rest.len(),
                        ObjectId::ENCODED_LEN
                    )));
                }
                Ok(Self::Hard(ObjectId::from_bytes(rest)?))
            }
            Some((&SOFT_TAG, rest)) => {
                let path = std::str::from_utf8(rest)
                    .map_err(|e| VolError::Argument(format!("soft link path: {e}")))?;
                Ok(Self::Soft(path.to_owned()))
            }
            Some((&tag, _)) => Err(VolError::Argument(format!("unknown link type {tag}"))),
            None => Err(VolError::Argument("empty link record".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link_layout() {
        let id = ObjectId::new(0x4000_0000_0000_0007, 0x10_0000_0000);
        let bytes = LinkRecord::Hard(id).encode();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..], &id.to_bytes());
        assert_eq!(LinkRecord::decode(&bytes).unwrap(), LinkRecord::Hard(id));
    }

    #[test]
    fn soft_link_layout() {
        let bytes = LinkRecord::Soft("/a/b".into()).encode();
        assert_eq!(bytes, b"\x01/a/b".to_vec());
        assert_eq!(
            LinkRecord::decode(&bytes).unwrap(),
            LinkRecord::Soft("/a/b".into())
        );
    }

    #[test]
    fn malformed_records() {
        assert!(LinkRecord::decode(&[]).is_err());
        assert!(LinkRecord::decode(&[7, 1, 2]).is_err());
        assert!(LinkRecord::decode(&[0, 1, 2, 3]).is_err());
        assert!(LinkRecord::decode(&[1, 0xff, 0xfe]).is_err());
    }
}
