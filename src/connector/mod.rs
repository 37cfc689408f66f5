//! Host-side connectors
//!
//! A connector translates the export descriptor a driver produced into a
//! concrete host device path, and reverses that mapping on teardown. The
//! caller holds the [`ConnectionInfo`] only for the duration of one
//! attach/detach cycle.

pub mod fc;

use crate::domain::model::{ConnectionInfo, InitiatorInfo, Protocol};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A kernel-level device located on the host after an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable by-path device path
    pub path: String,
    /// SCSI WWN of the device
    pub scsi_wwn: String,
}

/// Locates and tears down host-side device paths for one storage protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Discover the host device backing the export.
    async fn attach(&self, conn: &ConnectionInfo) -> Result<DeviceInfo>;

    /// Flush and remove the host devices backing the export.
    async fn detach(&self, conn: &ConnectionInfo) -> Result<()>;

    /// Host-identifying data used to scope an export to this initiator.
    async fn initiator_info(&self) -> Result<InitiatorInfo>;

    fn protocol(&self) -> Protocol;
}

pub type ConnectorRef = Arc<dyn Connector>;

/// Resolve the connector for a protocol tag.
pub fn new_connector(protocol: Protocol) -> Result<ConnectorRef> {
    match protocol {
        Protocol::FibreChannel => Ok(Arc::new(fc::FibreChannelConnector::with_default_host())),
        Protocol::Iscsi => Err(Error::not_implemented("iscsi connector")),
    }
}
