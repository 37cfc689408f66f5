//! Resource model for the block-storage control plane
//!
//! Volumes, snapshots, attachments and pools as the persistence layer owns
//! them. The orchestrator and drivers only read or mutate the fields relevant
//! to their step; in particular the `metadata` map carries backend-private
//! identifiers that must round-trip unchanged between operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form backend-private key/value map carried by every resource.
pub type Metadata = BTreeMap<String, String>;

// =============================================================================
// Statuses
// =============================================================================

/// Volume lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeStatus {
    Creating,
    Available,
    Extending,
    Deleting,
    Error,
    ErrorDeleting,
}

impl VolumeStatus {
    /// A transitional status means a background operation is in flight and the
    /// resource must not be the target of a second management operation.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            VolumeStatus::Creating | VolumeStatus::Extending | VolumeStatus::Deleting
        )
    }
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeStatus::Creating => write!(f, "creating"),
            VolumeStatus::Available => write!(f, "available"),
            VolumeStatus::Extending => write!(f, "extending"),
            VolumeStatus::Deleting => write!(f, "deleting"),
            VolumeStatus::Error => write!(f, "error"),
            VolumeStatus::ErrorDeleting => write!(f, "errorDeleting"),
        }
    }
}

/// Snapshot lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotStatus {
    Creating,
    Available,
    Deleting,
    Error,
    ErrorDeleting,
}

impl SnapshotStatus {
    pub fn is_transitional(&self) -> bool {
        matches!(self, SnapshotStatus::Creating | SnapshotStatus::Deleting)
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStatus::Creating => write!(f, "creating"),
            SnapshotStatus::Available => write!(f, "available"),
            SnapshotStatus::Deleting => write!(f, "deleting"),
            SnapshotStatus::Error => write!(f, "error"),
            SnapshotStatus::ErrorDeleting => write!(f, "errorDeleting"),
        }
    }
}

/// Attachment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentStatus {
    Creating,
    Available,
    Deleting,
    Error,
    ErrorDeleting,
}

impl AttachmentStatus {
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            AttachmentStatus::Creating | AttachmentStatus::Deleting
        )
    }
}

impl std::fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentStatus::Creating => write!(f, "creating"),
            AttachmentStatus::Available => write!(f, "available"),
            AttachmentStatus::Deleting => write!(f, "deleting"),
            AttachmentStatus::Error => write!(f, "error"),
            AttachmentStatus::ErrorDeleting => write!(f, "errorDeleting"),
        }
    }
}

// =============================================================================
// Resources
// =============================================================================

/// A managed block volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Opaque unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Current lifecycle state
    pub status: VolumeStatus,
    /// Size in whole gibibytes
    pub size_gib: u64,
    /// Pool the volume is provisioned against
    pub pool_name: String,
    /// Optional snapshot the volume is seeded from
    pub snapshot_id: Option<String>,
    /// Whether the seed snapshot lives in the object store rather than on
    /// the local backend
    #[serde(default)]
    pub snapshot_from_cloud: bool,
    /// Backend-private identifiers (e.g. the logical-volume path)
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: SnapshotStatus,
    /// Size in whole gibibytes, inherited from the source volume
    pub size_gib: u64,
    /// Source volume
    pub volume_id: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An export of a volume to a requesting host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub volume_id: String,
    pub status: AttachmentStatus,
    /// The host the volume is exported to
    pub host_info: HostInfo,
    /// Export descriptor, filled once the connection is initialized
    pub connection_info: Option<ConnectionInfo>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A backend storage aggregate usable as a provisioning target.
///
/// Pools are discovered by querying the backend, never created by the control
/// plane; their identity is a deterministic function of the backend aggregate
/// so repeated discovery yields the same pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub total_capacity_gib: u64,
    pub free_capacity_gib: u64,
    pub storage_type: String,
    pub availability_zone: String,
    /// Backend-declared extras from static configuration
    pub extras: BTreeMap<String, String>,
}

/// A grouping of volumes managed as a unit. Optional capability: backends may
/// answer every group operation with `NotImplemented`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub volume_ids: Vec<String>,
}

// =============================================================================
// Connection Data
// =============================================================================

/// Storage protocol an export is addressed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Iscsi,
    FibreChannel,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Iscsi => write!(f, "iscsi"),
            Protocol::FibreChannel => write!(f, "fibre_channel"),
        }
    }
}

/// Export descriptor produced when a volume or snapshot is exported.
///
/// Ephemeral: held by the caller for the duration of an attach/detach cycle.
/// The `data` map is protocol-specific and opaque to the control plane
/// (target IQN/WWNs, LUN, CHAP secrets, portal address).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub protocol: Protocol,
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Identity of the host requesting an export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name
    pub host: String,
    /// Host IP the export is scoped to; `None` means export to all
    pub ip: Option<String>,
    /// Initiator name the export is scoped to; `None` means export to all
    pub initiator: Option<String>,
    /// Host platform (architecture)
    pub platform: Option<String>,
    /// Host operating system
    pub os_type: Option<String>,
}

/// Host-identifying data gathered from the connecting host's hardware,
/// used by a driver to scope an export to one initiator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiatorInfo {
    pub host_name: String,
    pub initiator_data: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let s = serde_json::to_string(&VolumeStatus::ErrorDeleting).unwrap();
        assert_eq!(s, "\"errorDeleting\"");
        let s = serde_json::to_string(&VolumeStatus::Creating).unwrap();
        assert_eq!(s, "\"creating\"");
        let s = serde_json::to_string(&Protocol::FibreChannel).unwrap();
        assert_eq!(s, "\"fibre_channel\"");
    }

    #[test]
    fn test_transitional_statuses() {
        assert!(VolumeStatus::Creating.is_transitional());
        assert!(VolumeStatus::Extending.is_transitional());
        assert!(VolumeStatus::Deleting.is_transitional());
        assert!(!VolumeStatus::Available.is_transitional());
        assert!(!VolumeStatus::ErrorDeleting.is_transitional());

        assert!(SnapshotStatus::Creating.is_transitional());
        assert!(!SnapshotStatus::Error.is_transitional());
    }
}
