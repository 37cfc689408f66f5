//! Domain Ports - Driver contract and driver selection
//!
//! These traits define the boundary between the orchestration logic and the
//! physical storage backends. A concrete driver is resolved once per request
//! and used polymorphically; new backends register an implementation without
//! modifying the orchestrator.

use crate::domain::model::{
    ConnectionInfo, HostInfo, Metadata, Pool, Snapshot, Volume, VolumeGroup,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Operation Options
// =============================================================================

/// Options for provisioning a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub size_gib: u64,
    pub pool_name: String,
    /// Snapshot to seed the volume from, if any
    pub snapshot_id: Option<String>,
    /// Declared size of the seed snapshot, for block-copy sizing
    pub snapshot_size_gib: u64,
    /// Whether the seed snapshot lives in an object store rather than on the
    /// local backend; the `backupId`/`bucket` keys in `metadata` identify it
    pub snapshot_from_cloud: bool,
    pub metadata: Metadata,
}

/// Options for removing a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeOpts {
    pub id: String,
    pub pool_name: String,
    pub metadata: Metadata,
}

/// Options for growing a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendVolumeOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    /// New size in whole gibibytes
    pub size_gib: u64,
    pub pool_name: String,
    pub metadata: Metadata,
}

/// Options for creating a snapshot of a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSnapshotOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub size_gib: u64,
    pub volume_id: String,
    pub pool_name: String,
    /// Carries the source volume's backend metadata; a `bucket` key requests
    /// an upload of the snapshot content to the object store
    pub metadata: Metadata,
}

/// Options for removing a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteSnapshotOpts {
    pub id: String,
    pub volume_id: String,
    pub pool_name: String,
    pub metadata: Metadata,
}

/// Options for exporting a volume to a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAttachmentOpts {
    pub id: String,
    pub volume_id: String,
    pub pool_name: String,
    pub host_info: HostInfo,
    pub metadata: Metadata,
}

/// Options for unexporting a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteAttachmentOpts {
    pub id: String,
    pub volume_id: String,
    pub pool_name: String,
    pub host_info: HostInfo,
    pub metadata: Metadata,
}

/// Options for exporting/unexporting a snapshot to a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotAttachmentOpts {
    pub snapshot_id: String,
    pub pool_name: String,
    pub host_info: HostInfo,
    pub metadata: Metadata,
}

/// Options for volume-group operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeGroupOpts {
    pub id: String,
    pub name: String,
    pub description: String,
    pub add_volumes: Vec<String>,
    pub remove_volumes: Vec<String>,
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// The complete capability set a storage backend must expose.
///
/// `setup` is idempotent and called once before any other method; `unset`
/// releases backend resources on shutdown. Create-style operations must roll
/// back partially provisioned objects before returning an error, and must
/// return any backend-private metadata needed by later operations on the same
/// resource. Volume-group operations have default `NotImplemented`
/// implementations; that is a legitimate terminal response for backends
/// without grouping support.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Acquire backend configuration and state. Idempotent.
    async fn setup(&self) -> Result<()>;

    /// Release backend resources on shutdown.
    async fn unset(&self) -> Result<()>;

    /// Provision storage of the requested size, optionally seeded from a
    /// snapshot. Returns the authoritative status and backend metadata.
    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<Volume>;

    /// Remove the underlying storage object. Deleting a non-existent volume
    /// is not an error; a volume with dependent snapshots is a conflict.
    async fn delete_volume(&self, opts: &DeleteVolumeOpts) -> Result<()>;

    /// Grow a volume to a new size, deactivating dependent snapshot devices
    /// first where the backend requires it.
    async fn extend_volume(&self, opts: &ExtendVolumeOpts) -> Result<Volume>;

    /// Create a snapshot, optionally uploading its content to an object store
    /// when a `bucket` key is present in the options metadata.
    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<Snapshot>;

    /// Remove a snapshot, removing any uploaded copy first.
    async fn delete_snapshot(&self, opts: &DeleteSnapshotOpts) -> Result<()>;

    /// Export a volume to the requesting host.
    async fn initialize_connection(&self, opts: &CreateAttachmentOpts) -> Result<ConnectionInfo>;

    /// Unexport a volume.
    async fn terminate_connection(&self, opts: &DeleteAttachmentOpts) -> Result<()>;

    /// Export a snapshot to the requesting host.
    async fn initialize_snapshot_connection(
        &self,
        opts: &SnapshotAttachmentOpts,
    ) -> Result<ConnectionInfo>;

    /// Unexport a snapshot.
    async fn terminate_snapshot_connection(&self, opts: &SnapshotAttachmentOpts) -> Result<()>;

    /// Enumerate backend aggregates usable as provisioning targets. Pools not
    /// declared in backend configuration are excluded even if discovered.
    async fn list_pools(&self) -> Result<Vec<Pool>>;

    /// Backend type name this driver serves
    fn driver_name(&self) -> &str;

    async fn create_volume_group(&self, _opts: &VolumeGroupOpts) -> Result<VolumeGroup> {
        Err(Error::not_implemented("create_volume_group"))
    }

    async fn update_volume_group(&self, _opts: &VolumeGroupOpts) -> Result<VolumeGroup> {
        Err(Error::not_implemented("update_volume_group"))
    }

    async fn delete_volume_group(&self, _opts: &VolumeGroupOpts) -> Result<()> {
        Err(Error::not_implemented("delete_volume_group"))
    }
}

// =============================================================================
// Driver Selection Port
// =============================================================================

/// Resolves the initialized driver instance serving a pool/dock.
#[async_trait]
pub trait DriverProvider: Send + Sync {
    /// Return the driver for the given pool, or an error if no backend
    /// serves it.
    async fn resolve(&self, pool_name: &str) -> Result<Arc<dyn StorageDriver>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StorageDriverRef = Arc<dyn StorageDriver>;
pub type DriverProviderRef = Arc<dyn DriverProvider>;
