use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{VolError, VolResult};

/// Leading byte of every encoded property list.
const FORMAT_VERSION: u8 = 1;

/// Creation properties of a node, stored and broadcast as an opaque blob.
///
/// The connector never interprets entries; it only keeps them with the node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyList {
    entries: BTreeMap<String, Vec<u8>>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Version byte followed by the `bincode` body. Never empty.
    pub fn encode(&self) -> VolResult<Vec<u8>> {
        let body = bincode::serialize(&self.entries)
            .map_err(|e| VolError::Argument(format!("property list: {e}")))?;
        let mut buf = Vec::with_capacity(1 + body.len());
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> VolResult<Self> {
        match bytes.split_first() {
            Some((&FORMAT_VERSION, body)) => {
                let entries = bincode::deserialize(body)
                    .map_err(|e| VolError::Argument(format!("property list: {e}")))?;
                Ok(Self { entries })
            }
            Some((&version, _)) => Err(VolError::Unsupported(format!(
                "property list format {version}"
            ))),
            None => Err(VolError::Argument("empty property list".into())),
        }
    }
}
