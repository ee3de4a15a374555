//! Patch directory and level tracking configuration

use crate::error::ConfigResult;
use crate::validation::{validate_identifier, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where patches live and where the applied level is recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchesConfig {
    /// Directory holding `{level}-forward.sql` / `{level}-reverse.sql` files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Key/value table holding the tracked level
    #[serde(default = "default_table")]
    pub table: String,

    /// Row key of the tracked level
    #[serde(default = "default_key")]
    pub key: String,
}

impl Default for PatchesConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            table: default_table(),
            key: default_key(),
        }
    }
}

impl Validatable for PatchesConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(self.validation_error("directory cannot be empty"));
        }
        validate_identifier(&self.table, "table", self.domain_name())?;
        validate_required_string(&self.key, "key", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "patches"
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_table() -> String {
    "property".to_string()
}

fn default_key() -> String {
    "patch".to_string()
}
