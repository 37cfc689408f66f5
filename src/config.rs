//! Configuration loading
//!
//! Driver configuration lives in YAML files read once at startup; the parsed
//! struct is handed to the driver by value and never mutated afterwards.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;

/// Default location of the logical-volume driver configuration
pub const DEFAULT_LVM_CONFIG_PATH: &str = "/etc/blockplane/driver/lvm.yaml";

/// Default root of the local backup store
pub const DEFAULT_BACKUP_ROOT: &str = "/var/lib/blockplane/backups";

/// Parse a YAML configuration file into `T`.
pub async fn load_config<T: DeserializeOwned>(path: &str) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path, e)))?;
    Ok(serde_yaml::from_str(&text)?)
}
