use std::path::Path;

use serde::{Deserialize, Serialize};
use shardns_io::{TransferOptions, DEFAULT_SELECTION_BATCH};

use crate::error::{VolError, VolResult};

/// Default size of the speculative link read buffer.
pub const DEFAULT_LINK_BUFFER_SIZE: usize = 256;
/// Default limit on nested soft links.
pub const DEFAULT_MAX_LINK_DEPTH: usize = 32;

/// Tuning for a connector instance.
///
/// Every member of a group must use the same `collective_metadata` setting,
/// otherwise broadcasts fall out of step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Opens run on the leader and are broadcast. When off, every process
    /// reads metadata from the store itself.
    pub collective_metadata: bool,
    /// Scratch size for the first, speculative link value read.
    pub link_buffer_size: usize,
    /// Selection runs turned into extents per batch.
    pub selection_batch: usize,
    /// Maximum soft link nesting; `None` disables the check.
    pub max_link_depth: Option<usize>,
    /// Convert in the caller's buffer when it is contiguous and large enough.
    pub reuse_caller_buffers: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            collective_metadata: true,
            link_buffer_size: DEFAULT_LINK_BUFFER_SIZE,
            selection_batch: DEFAULT_SELECTION_BATCH,
            max_link_depth: Some(DEFAULT_MAX_LINK_DEPTH),
            reuse_caller_buffers: true,
        }
    }
}

impl ConnectorConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> VolResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| VolError::Argument(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> VolResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VolError::Argument(format!("can't read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> VolResult<String> {
        toml::to_string(self).map_err(|e| VolError::Argument(format!("bad config: {e}")))
    }

    pub fn validate(&self) -> VolResult<()> {
        if self.link_buffer_size == 0 {
            return Err(VolError::Argument("link_buffer_size must be positive".into()));
        }
        if self.selection_batch == 0 {
            return Err(VolError::Argument("selection_batch must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            batch: self.selection_batch,
            reuse_caller_buffers: self.reuse_caller_buffers,
        }
    }
}
