//! Backend drivers
//!
//! Concrete implementations of the storage driver contract, the external
//! command port they share, and the factory/provider used to resolve one
//! initialized driver instance per pool.

pub mod exec;
pub mod lvm;

pub use exec::{CommandRunner, CommandRunnerRef, ShellRunner};
pub use lvm::{LvmConfig, LvmDriver, PoolProperties};

use crate::backup::BackupDriverRef;
use crate::domain::ports::{DriverProvider, StorageDriver, StorageDriverRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

// =============================================================================
// Driver Factory
// =============================================================================

/// Combined backend configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub lvm: LvmConfig,
}

/// Creates storage drivers by backend type name
pub struct DriverFactory;

impl DriverFactory {
    pub fn create(
        backend: &str,
        config: DriverConfig,
        runner: CommandRunnerRef,
        backup: BackupDriverRef,
    ) -> Result<StorageDriverRef> {
        match backend.to_lowercase().as_str() {
            "lvm" => Ok(Arc::new(LvmDriver::new(config.lvm, runner, backup))),
            _ => Err(Error::BackendUnavailable {
                backend: backend.to_string(),
            }),
        }
    }
}

// =============================================================================
// Static Driver Provider
// =============================================================================

/// Driver-selection collaborator mapping each managed pool to the one
/// initialized driver instance serving it.
#[derive(Default)]
pub struct StaticDriverProvider {
    by_pool: RwLock<BTreeMap<String, StorageDriverRef>>,
}

impl StaticDriverProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Map one pool to a driver.
    pub async fn register_pool(&self, pool_name: &str, driver: StorageDriverRef) {
        self.by_pool
            .write()
            .await
            .insert(pool_name.to_string(), driver);
    }

    /// Map every pool a driver reports to that driver.
    pub async fn register_driver(&self, driver: StorageDriverRef) -> Result<()> {
        for pool in driver.list_pools().await? {
            info!("Pool {} served by {} driver", pool.name, driver.driver_name());
            self.register_pool(&pool.name, driver.clone()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DriverProvider for StaticDriverProvider {
    async fn resolve(&self, pool_name: &str) -> Result<Arc<dyn StorageDriver>> {
        self.by_pool
            .read()
            .await
            .get(pool_name)
            .cloned()
            .ok_or_else(|| Error::BackendUnavailable {
                backend: format!("pool {}", pool_name),
            })
    }
}
