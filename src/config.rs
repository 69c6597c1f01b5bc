//! Tool configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) gives the stock behaviour:
//!
//! ```toml
//! id_matching = "full"      # or "low-byte"
//! dry_run = false
//!
//! [key_block]
//! partition = "block1"
//! block_id = 7
//! marker = "1S"
//! marker_offset = 4
//! v1_offset = 14
//! v2_offset = 26
//! ```

use crate::compactor::IdMatching;
use crate::error::{FlashError, Result};
use crate::metadata::KeyBlockConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// How block-type identifiers are compared when purging
    pub id_matching: IdMatching,

    /// Compact and report, but never write to the device
    pub dry_run: bool,

    #[validate(nested)]
    pub key_block: KeyBlockConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| FlashError::Config(e.to_string()))?;
        config
            .validate()
            .map_err(|e| FlashError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FlashError::Config(e.to_string()))
    }
}
