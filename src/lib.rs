//! Blockplane - Software-Defined Block Storage Control Plane
//!
//! Accepts lifecycle requests for block-storage resources (volumes,
//! snapshots, attachments, pools) and orchestrates their execution against
//! pluggable physical backend drivers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Control Plane                            │
//! │  ┌──────────────────────┐      ┌─────────────────────────┐    │
//! │  │  Provisional Entries │ ───▶ │  Orchestrator ("Brain") │    │
//! │  │  (validate, persist) │      │  (background dispatch)  │    │
//! │  └──────────────────────┘      └────────────┬────────────┘    │
//! ├───────────────────────────────────────────── │ ───────────────┤
//! │                 Driver Contract              ▼                │
//! │  ┌─────────────────────┐   ┌──────────────────────────────┐   │
//! │  │   LVM Driver        │   │   (further backends)         │   │
//! │  │   (iSCSI export)    │   │                              │   │
//! │  └──────────┬──────────┘   └──────────────────────────────┘   │
//! ├─────────────│─────────────────────────────────────────────────┤
//! │             ▼             Host Side                           │
//! │  ┌─────────────────────┐   ┌──────────────────────────────┐   │
//! │  │  iSCSI target tools │   │  Fibre-Channel Connector     │   │
//! │  │                     │   │  (rescan/retry discovery)    │   │
//! │  └─────────────────────┘   └──────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: provisional entries and the orchestrator
//! - [`domain`]: resource model and the driver contract
//! - [`drivers`]: backend drivers and external command execution
//! - [`connector`]: host-side device discovery and teardown
//! - [`store`]: persistence port and in-memory implementation
//! - [`backup`]: object-store collaborator for snapshot upload
//! - [`config`]: YAML configuration loading
//! - [`error`]: error types and handling

pub mod backup;
pub mod config;
pub mod connector;
pub mod controlplane;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use controlplane::{
    completion_channel, CompletionReceiver, CompletionSender, Orchestrator,
    CreateAttachmentRequest, CreateSnapshotRequest, CreateVolumeRequest,
};

pub use domain::model::{
    Attachment, AttachmentStatus, ConnectionInfo, HostInfo, InitiatorInfo, Metadata, Pool,
    Protocol, Snapshot, SnapshotStatus, Volume, VolumeGroup, VolumeStatus,
};

pub use domain::ports::{DriverProvider, DriverProviderRef, StorageDriver, StorageDriverRef};

pub use drivers::{
    CommandRunner, CommandRunnerRef, DriverConfig, DriverFactory, LvmConfig, LvmDriver,
    PoolProperties, ShellRunner, StaticDriverProvider,
};

pub use connector::{new_connector, Connector, ConnectorRef, DeviceInfo};

pub use backup::{new_backup, BackupDriver, BackupDriverRef, BackupSpec, FileBackup};

pub use error::{Error, Result};

pub use store::{Filter, MemoryStore, ResourceStore, ResourceStoreRef};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
