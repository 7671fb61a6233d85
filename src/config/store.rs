use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The existing store backends. We differentiate them via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, Default)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Session kept in process memory only.
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// Session persisted to a JSON file between invocations.
    #[serde(rename = "file")]
    File(FileStoreConfig),
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FileStoreConfig {
    pub path: PathBuf,
}
